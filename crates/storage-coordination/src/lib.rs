pub mod error;
pub mod leader;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::CoordinationError;
pub use leader::{LeaderElector, LEADER_RENEWAL_INTERVAL, LEADER_TTL};
pub use memory::InMemoryCoordinationStore;
pub use redis_store::RedisCoordinationStore;
pub use store::CoordinationStore;
