//! Authentication
//!
//! The gateway authenticates a session once, at connect time, through the
//! [`AuthCheck`] contract: token in, `(user, permission)` out. The shipped
//! verifier checks RS256 JWTs against `AUTH_PUBLIC_KEY`; when no key is
//! configured a permissive driver is used and a warning logged.

mod token;

pub use token::{Claims, JwtAuth};

use async_trait::async_trait;
use std::sync::Arc;

/// What an authenticated session may do in its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// May receive updates and send awareness, but its document updates are
    /// dropped.
    ReadOnly,
    /// Full participation.
    ReadWrite,
}

/// The result of a successful auth check.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user_id: String,
    pub permission: Permission,
}

/// Auth failures. All of them close the session with 4001.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token not valid for room {0}")]
    RoomMismatch(String),
}

/// Token verification contract, injected into the gateway.
#[async_trait]
pub trait AuthCheck: Send + Sync {
    /// Verify `token` for `room`.
    async fn check(&self, token: &str, room: &str) -> Result<Authenticated, AuthError>;
}

/// Accepts any non-empty token with read-write permission. Development and
/// test deployments only; selected when `AUTH_PUBLIC_KEY` is unset.
#[derive(Debug, Default)]
pub struct PermissiveAuth;

#[async_trait]
impl AuthCheck for PermissiveAuth {
    async fn check(&self, token: &str, _room: &str) -> Result<Authenticated, AuthError> {
        let user_id = if token.is_empty() {
            "anonymous".to_string()
        } else {
            token.to_string()
        };
        Ok(Authenticated {
            user_id,
            permission: Permission::ReadWrite,
        })
    }
}

/// Build the auth driver from configuration.
///
/// # Errors
/// Returns an error when the configured public key is not a valid RS256 PEM.
pub fn auth_from_config(public_key: Option<&str>) -> Result<Arc<dyn AuthCheck>, AuthError> {
    match public_key {
        Some(pem) => Ok(Arc::new(JwtAuth::from_rsa_pem(pem)?)),
        None => {
            tracing::warn!("AUTH_PUBLIC_KEY not set, running with permissive auth");
            Ok(Arc::new(PermissiveAuth))
        }
    }
}
