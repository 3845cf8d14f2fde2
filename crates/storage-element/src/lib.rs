pub mod app;
pub mod cache;
pub mod consistency;
pub mod error;
pub mod handlers;
pub mod hashing;
pub mod lock;
pub mod partition;
pub mod partition_lock;
pub mod service;
pub mod state;
pub mod wal;

pub use app::build_app;
pub use error::SeError;
pub use service::FileService;
pub use state::AppState;
