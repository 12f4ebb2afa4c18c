//! Shared DTO types used across multiple endpoints.

use serde::Deserialize;
use utoipa::IntoParams;

/// Upper bound for `limit` query parameters.
pub const MAX_LIMIT: usize = 500;

/// `?limit=` query parameter for list endpoints.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct LimitParams {
    /// Maximum number of items to return (1..=500). Defaults to 50.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

impl LimitParams {
    /// Returns `limit` clamped to the allowed range.
    #[must_use]
    pub fn clamped(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(LimitParams { limit: 0 }.clamped(), 1);
        assert_eq!(LimitParams { limit: 10_000 }.clamped(), MAX_LIMIT);
        assert_eq!(LimitParams::default().clamped(), 50);
    }
}
