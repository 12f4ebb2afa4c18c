//! HS256 JWT verification.
//!
//! The user id is taken from the `sub` claim. Expiry is enforced by
//! `jsonwebtoken`'s default validation.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use super::IdentityResolver;
use crate::domain::UserId;
use crate::error::GatewayError;

/// Claims the gateway reads from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiry as a Unix timestamp.
    pub exp: u64,
}

/// Verifies HS256-signed JWTs with a shared secret.
pub struct JwtResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtResolver {
    /// Creates a resolver for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl std::fmt::Debug for JwtResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityResolver for JwtResolver {
    async fn resolve(&self, token: &str) -> Result<UserId, GatewayError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| GatewayError::Authentication(e.to_string()))?;
        if data.claims.sub.is_empty() {
            return Err(GatewayError::Authentication("empty subject".to_string()));
        }
        Ok(UserId::new(data.claims.sub))
    }
}
