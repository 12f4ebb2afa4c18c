//! Fixed token → user table.

use std::collections::HashMap;

use async_trait::async_trait;

use super::IdentityResolver;
use crate::domain::UserId;
use crate::error::GatewayError;

/// Resolves tokens from a fixed table loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenResolver {
    /// Creates an empty resolver that rejects every token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token for `user_id`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    /// Parses a `token=user,token2=user2` list. Malformed entries are
    /// skipped.
    #[must_use]
    pub fn parse(entries: &str) -> Self {
        let tokens = entries
            .split(',')
            .filter_map(|entry| entry.split_once('='))
            .map(|(token, user)| (token.trim(), user.trim()))
            .filter(|(token, user)| !token.is_empty() && !user.is_empty())
            .map(|(token, user)| (token.to_string(), UserId::new(user)))
            .collect();
        Self { tokens }
    }

    /// Number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<UserId, GatewayError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::Authentication("invalid token".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn resolves_known_token() {
        let resolver = StaticTokenResolver::new().with_token("secret", UserId::new("u1"));
        let user = assert_ok!(resolver.resolve("secret").await);
        assert_eq!(user.as_str(), "u1");
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let resolver = StaticTokenResolver::new();
        let result = resolver.resolve("nope").await;
        assert!(matches!(result, Err(GatewayError::Authentication(_))));
    }

    #[test]
    fn parse_skips_malformed_entries() {
        let resolver = StaticTokenResolver::parse("a=alice, b = bob ,broken,=nobody,c=");
        assert_eq!(resolver.len(), 2);
        assert!(!resolver.is_empty());
        assert!(StaticTokenResolver::parse("").is_empty());
    }
}
