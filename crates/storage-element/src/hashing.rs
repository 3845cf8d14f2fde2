use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

/// Shared state a [`HashingReader`] updates as bytes pass through it and the
/// caller reads out afterwards, once the wrapped reader has been fully
/// drained by `write_file`, which hashes the bytes on the fly as they're
/// streamed to disk rather than re-reading the file afterwards.
#[derive(Default)]
struct HashState {
    hasher: Sha256,
    size: u64,
}

#[derive(Clone)]
pub struct HashHandle(Arc<Mutex<HashState>>);

impl HashHandle {
    /// Finalized hex digest and total byte count observed so far. Safe to
    /// call once the reader has reached EOF; earlier it reflects a partial
    /// hash, which callers must not treat as final.
    pub fn finalize(&self) -> (String, u64) {
        let state = self.0.lock().expect("hash state mutex poisoned");
        let digest = state.hasher.clone().finalize();
        (hex_encode(&digest), state.size)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Wraps an [`AsyncRead`], updating a shared SHA-256 digest and byte count
/// with every chunk that passes through `poll_read`. Used to compute a
/// file's checksum as it streams to the backend, instead of buffering the
/// whole body to hash it separately.
pub struct HashingReader<R> {
    inner: R,
    state: Arc<Mutex<HashState>>,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> (Self, HashHandle) {
        let state = Arc::new(Mutex::new(HashState::default()));
        (Self { inner, state: state.clone() }, HashHandle(state))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if res.is_ready() {
            let chunk = &buf.filled()[before..];
            if !chunk.is_empty() {
                let mut state = this.state.lock().expect("hash state mutex poisoned");
                state.hasher.update(chunk);
                state.size += chunk.len() as u64;
            }
        }
        res
    }
}
