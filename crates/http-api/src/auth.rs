use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// The two roles the static bearer-token scheme distinguishes. Every
/// service's own endpoints resolve to `Admin` today since none of them
/// (besides Admin itself) has a second class of caller; `User` exists for
/// Admin's two-tier token, where operator-only routes gate on `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Identity extracted from a verified bearer token, attached to the request
/// by [`require_bearer_token`] so downstream middleware and handlers can
/// read it via `Extension<Claims>`.
#[derive(Debug, Clone, Copy)]
pub struct Claims {
    pub role: Role,
}

#[derive(Debug)]
pub enum AuthError {
    MissingBearer,
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingBearer => write!(f, "missing bearer token"),
            AuthError::InvalidToken => write!(f, "invalid bearer token"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Verifies a bearer token against whatever each service considers valid
/// credentials and resolves it to a role. Kept behind a trait rather than a
/// single shared secret comparison so a service can later swap in
/// rotating/JWT-based verification without touching the middleware.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, bearer: &str) -> Result<Claims, AuthError>;
}

/// Compares the presented token against one or two fixed shared secrets.
pub struct StaticTokenVerifier {
    admin_token: String,
    user_token: String,
}

impl StaticTokenVerifier {
    /// Distinct admin/user tokens, each resolving to its own [`Role`].
    pub fn new(admin_token: impl Into<String>, user_token: impl Into<String>) -> Self {
        StaticTokenVerifier { admin_token: admin_token.into(), user_token: user_token.into() }
    }

    /// A single shared secret for services with no role distinction of
    /// their own — any caller holding it resolves to [`Role::Admin`].
    pub fn single(token: impl Into<String>) -> Self {
        let token = token.into();
        StaticTokenVerifier { admin_token: token.clone(), user_token: token }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, bearer: &str) -> Result<Claims, AuthError> {
        if bearer == self.admin_token {
            Ok(Claims { role: Role::Admin })
        } else if bearer == self.user_token {
            Ok(Claims { role: Role::User })
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Implemented by each service's `AppState` so [`require_bearer_token`] can
/// be used generically across the four HTTP services.
pub trait HasTokenVerifier {
    fn token_verifier(&self) -> &Arc<dyn TokenVerifier>;
}

/// Axum middleware requiring a valid `Authorization: Bearer <token>` header.
/// Returns 401 for missing, malformed, or incorrect tokens; on success,
/// inserts the resolved [`Claims`] into the request's extensions for
/// downstream middleware (e.g. [`require_admin_role`]) and handlers to read.
/// Intended to be applied to every route except health/ready.
pub async fn require_bearer_token<S>(State(state): State<S>, mut request: Request, next: Next) -> Response
where
    S: HasTokenVerifier + Clone + Send + Sync + 'static,
{
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let claims = match provided {
        Some(token) => state.token_verifier().verify(token),
        None => Err(AuthError::MissingBearer),
    };

    match claims {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(_) => (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response(),
    }
}

/// Axum middleware gating a route to [`Role::Admin`] callers, applied after
/// [`require_bearer_token`] has already populated `Extension<Claims>`.
/// Returns 403 for a validly-authenticated non-admin caller.
pub async fn require_admin_role(request: Request, next: Next) -> Response {
    match request.extensions().get::<Claims>() {
        Some(claims) if claims.role == Role::Admin => next.run(request).await,
        _ => (StatusCode::FORBIDDEN, "Forbidden\n").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_verifier_accepts_only_exact_match() {
        let verifier = StaticTokenVerifier::single("secret".to_string());
        assert!(verifier.verify("secret").is_ok());
        assert!(verifier.verify("wrong").is_err());
        assert!(verifier.verify("").is_err());
    }

    #[test]
    fn two_tier_verifier_distinguishes_roles() {
        let verifier = StaticTokenVerifier::new("admin-secret", "user-secret");
        assert_eq!(verifier.verify("admin-secret").unwrap().role, Role::Admin);
        assert_eq!(verifier.verify("user-secret").unwrap().role, Role::User);
        assert!(verifier.verify("neither").is_err());
    }
}
