pub mod app;
pub mod error;
pub mod events;
pub mod gc;
pub mod handlers;
pub mod se_registry;
pub mod state;

pub use app::build_app;
pub use error::AdminError;
pub use state::AppState;
