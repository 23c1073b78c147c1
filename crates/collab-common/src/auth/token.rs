//! JWT verification using the `jsonwebtoken` crate.

use super::{AuthCheck, AuthError, Authenticated, Permission};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Expiration time (Unix timestamp). Enforced by the decoder.
    pub exp: i64,
    /// Room the token is scoped to. A missing claim means any room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Whether the holder may write. Defaults to true.
    #[serde(default = "default_rw")]
    pub rw: bool,
}

fn default_rw() -> bool {
    true
}

impl Claims {
    #[must_use]
    pub fn permission(&self) -> Permission {
        if self.rw {
            Permission::ReadWrite
        } else {
            Permission::ReadOnly
        }
    }
}

/// RS256 token verifier.
pub struct JwtAuth {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    /// Create a verifier from an RSA public key in PEM format.
    ///
    /// # Errors
    /// Returns an error if the PEM cannot be parsed.
    pub fn from_rsa_pem(pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::InvalidToken(format!("bad public key: {e}")))?;
        Ok(Self {
            decoding_key,
            validation: Validation::new(Algorithm::RS256),
        })
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[async_trait]
impl AuthCheck for JwtAuth {
    async fn check(&self, token: &str, room: &str) -> Result<Authenticated, AuthError> {
        let claims = self.verify(token)?;
        if let Some(scoped) = &claims.room {
            if scoped != room {
                return Err(AuthError::RoomMismatch(room.to_string()));
            }
        }
        Ok(Authenticated {
            user_id: claims.sub.clone(),
            permission: claims.permission(),
        })
    }
}

impl std::fmt::Debug for JwtAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuth").finish_non_exhaustive()
    }
}
