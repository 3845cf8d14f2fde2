mod admin;
mod common;
pub mod error;
mod ingester;
mod query;
mod se;

pub use admin::{load_admin_config, AdminConfig, SchedulerConfig};
pub use error::ConfigError;
pub use ingester::{load_ingester_config, CapacityMonitorConfig, IngesterConfig};
pub use query::{load_query_config, QueryConfig};
pub use se::{load_se_config, BackendConfig, SeConfig};
