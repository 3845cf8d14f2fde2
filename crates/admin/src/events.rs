use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use storage_domain::FileEvent;
use tracing::warn;

/// Stream name the Query module's consumer group reads from. Kept as a
/// constant rather than a config field since both Admin and Query must agree
/// on it to talk to each other at all.
pub const FILE_EVENTS_STREAM: &str = "file-events";

/// Publishes [`FileEvent`]s onto the `file-events` Redis stream for Query's
/// consumer group to pick up. A thin wrapper over `XADD`.
#[derive(Clone)]
pub struct EventPublisher {
    conn: Option<ConnectionManager>,
}

impl EventPublisher {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(EventPublisher { conn: Some(conn) })
    }

    /// A publisher with nowhere to send events, for tests that exercise the
    /// registry/HTTP paths without a Redis instance.
    pub fn disabled() -> Self {
        EventPublisher { conn: None }
    }

    /// Best-effort publish: a failed publish is logged and swallowed rather
    /// than propagated, since Admin's registry mutation has already
    /// committed by the time this is called and cannot be rolled back for a
    /// downstream cache-sync failure.
    pub async fn publish(&self, event: &FileEvent) {
        let Some(conn) = &self.conn else { return };

        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialize file event, dropping");
                return;
            }
        };

        let mut conn = conn.clone();
        let result: Result<String, redis::RedisError> =
            conn.xadd(FILE_EVENTS_STREAM, "*", &[("payload", payload.as_str())]).await;

        if let Err(e) = result {
            warn!(error = %e, "failed to publish file event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_domain::{FileId, SeId};

    // EventPublisher::connect requires a reachable Redis; exercised via the
    // in-memory coordination/registry test suites elsewhere. This module's
    // serialization path is covered directly since it has no network
    // dependency.
    #[test]
    fn file_event_serializes_with_expected_event_type_tag() {
        let event = FileEvent::Created {
            file_id: FileId::new(),
            storage_element_id: SeId::new("se-1"),
            metadata: None,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "file:created");
    }
}
