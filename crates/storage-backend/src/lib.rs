pub mod backend;
pub mod error;
pub mod local;
pub mod s3;

pub use backend::{FileSource, StorageBackend};
pub use error::StorageBackendError;
pub use local::LocalBackend;
pub use s3::S3Backend;
