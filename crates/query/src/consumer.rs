use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult, Value};
use std::sync::Arc;
use storage_domain::FileEvent;
use tracing::{error, warn};

use crate::cache::Cache;

/// Consumes the `file-events` stream via a Redis consumer group. Two loops
/// run against the same group: [`Self::consume_loop`] reads fresh entries,
/// [`Self::reclaim_idle_once`] re-delivers anything left idle in the PEL
/// past `pending_idle_ms` (a crash or panic mid-handler).
#[derive(Clone)]
pub struct EventConsumer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer_name: String,
    batch_size: usize,
    block_ms: usize,
    pending_idle_ms: i64,
    cache: Arc<Cache>,
}

impl EventConsumer {
    /// A clone of the underlying connection, cheap to hand to callers (like
    /// the readiness check) that just need to ping Redis and have no
    /// business touching the consumer group.
    pub fn conn_handle(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub async fn connect(
        redis_url: &str,
        stream: String,
        group: String,
        consumer_name: String,
        batch_size: u32,
        block_ms: u64,
        pending_idle_ms: u64,
        cache: Arc<Cache>,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_connection_manager().await?;

        let created: RedisResult<()> = conn.xgroup_create_mkstream(&stream, &group, "0").await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e);
            }
        }

        Ok(EventConsumer {
            conn,
            stream,
            group,
            consumer_name,
            batch_size: batch_size.max(1) as usize,
            block_ms: block_ms as usize,
            pending_idle_ms: pending_idle_ms as i64,
            cache,
        })
    }

    /// `XREADGROUP group=… consumer=… streams=file-events > count=… block=…`,
    /// looping forever. A read error backs off briefly rather than spinning.
    pub async fn consume_loop(mut self) {
        loop {
            let opts = StreamReadOptions::default().group(&self.group, &self.consumer_name).count(self.batch_size).block(self.block_ms);
            let reply: RedisResult<StreamReadReply> = self.conn.xread_options(&[self.stream.as_str()], &[">"], &opts).await;
            match reply {
                Ok(reply) => {
                    for stream_key in reply.keys {
                        for id in stream_key.ids {
                            self.handle_entry(&id.id, &id.map).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "xreadgroup failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Every `interval`, re-claims and re-handles entries idle past
    /// `pending_idle_ms`, looping forever.
    pub async fn pending_retry_loop(mut self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            self.reclaim_idle_once().await;
        }
    }

    async fn reclaim_idle_once(&mut self) {
        let pending: RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.pending_idle_ms)
            .arg("-")
            .arg("+")
            .arg(100)
            .query_async(&mut self.conn)
            .await;

        let ids: Vec<String> = match pending {
            Ok(rows) => rows.into_iter().map(|(id, ..)| id).collect(),
            Err(e) => {
                warn!(error = %e, "xpending failed");
                return;
            }
        };
        if ids.is_empty() {
            return;
        }

        let claimed: RedisResult<StreamClaimReply> =
            self.conn.xclaim(&self.stream, &self.group, &self.consumer_name, self.pending_idle_ms, &ids).await;
        match claimed {
            Ok(reply) => {
                for stream_id in reply.ids {
                    self.handle_entry(&stream_id.id, &stream_id.map).await;
                }
            }
            Err(e) => warn!(error = %e, "xclaim failed"),
        }
    }

    async fn handle_entry(&mut self, id: &str, fields: &HashMap<String, Value>) {
        let payload: Option<String> = fields.get("payload").and_then(|v| redis::from_redis_value(v).ok());
        let Some(payload) = payload else {
            warn!(id, "stream entry missing a payload field, acking to drop the poison entry");
            let _: RedisResult<()> = self.conn.xack(&self.stream, &self.group, &[id]).await;
            return;
        };

        match serde_json::from_str::<FileEvent>(&payload) {
            Ok(event) => {
                self.cache.apply(&event).await;
                let ack: RedisResult<()> = self.conn.xack(&self.stream, &self.group, &[id]).await;
                if let Err(e) = ack {
                    warn!(id, error = %e, "xack failed after a successfully applied event");
                }
            }
            Err(e) => {
                error!(id, error = %e, "failed to parse file event, leaving unacked for retry");
            }
        }
    }
}
