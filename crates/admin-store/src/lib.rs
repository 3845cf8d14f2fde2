pub mod error;
pub mod events;
pub mod memory;
pub mod postgres_registry;
pub mod registry;

pub use error::RegistryError;
pub use events::AdminAuditEvent;
pub use memory::InMemoryRegistry;
pub use postgres_registry::PostgresRegistry;
pub use registry::{DurableRegistry, FileListFilter};
