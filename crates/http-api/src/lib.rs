pub mod auth;
pub mod error;
pub mod health;
pub mod layers;

pub use auth::{
    require_admin_role, require_bearer_token, AuthError, Claims, HasTokenVerifier, Role, StaticTokenVerifier,
    TokenVerifier,
};
pub use error::ApiError;
pub use health::{ready, HasReadinessCheck};
pub use layers::with_standard_layers;
