//! Identity collaborator: resolves a bearer credential to a user id.
//!
//! The connection manager calls [`IdentityResolver::resolve`] during the
//! authentication handshake. Two resolvers ship with the gateway: a static
//! token table for development and tests, and an HS256 JWT verifier.

pub mod jwt;
pub mod static_tokens;

use async_trait::async_trait;

pub use jwt::JwtResolver;
pub use static_tokens::StaticTokenResolver;

use crate::domain::UserId;
use crate::error::GatewayError;

/// Resolves bearer tokens to user identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns the user the token belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Authentication`] if the token is unknown,
    /// malformed or expired.
    async fn resolve(&self, token: &str) -> Result<UserId, GatewayError>;
}
