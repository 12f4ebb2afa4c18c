//! Event-name pattern matching.
//!
//! Names and patterns are dot-segmented. A `*` segment matches exactly one
//! segment, so `task.*` matches `task.created` but not `task.created.extra`.
//! A pattern made of a single `*` is the catch-all and matches every name.

/// Wildcard segment.
pub const WILDCARD: &str = "*";

/// Returns `true` if `name` matches `pattern`.
///
/// ```
/// use relay_gateway::domain::pattern::matches;
///
/// assert!(matches("task.created", "task.*"));
/// assert!(matches("task.created", "*.created"));
/// assert!(!matches("task.created.extra", "task.*"));
/// assert!(matches("task.created.extra", "*"));
/// ```
#[must_use]
pub fn matches(name: &str, pattern: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }

    let mut names = name.split('.');
    for segment in pattern.split('.') {
        let Some(part) = names.next() else {
            return false;
        };
        if segment != WILDCARD && segment != part {
            return false;
        }
    }

    names.next().is_none()
}

/// Checks that a subscription pattern is usable.
///
/// # Errors
///
/// Returns a description of the problem if the pattern is empty or has an
/// empty segment (e.g. `"task..created"` or `"task."`).
pub fn validate(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("pattern must not be empty".to_string());
    }
    if pattern.split('.').any(str::is_empty) {
        return Err(format!("empty segment in {pattern:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(matches("task.created", "task.created"));
        assert!(!matches("task.created", "task.updated"));
    }

    #[test]
    fn single_segment_wildcard() {
        assert!(matches("task.created", "task.*"));
        assert!(matches("task.updated", "task.*"));
        assert!(matches("task.created", "*.created"));
        assert!(!matches("project.updated", "*.created"));
    }

    #[test]
    fn trailing_wildcard_does_not_swallow_extra_segments() {
        assert!(!matches("task.created.extra", "task.*"));
        assert!(!matches("task", "task.*"));
    }

    #[test]
    fn inner_wildcard_requires_equal_length() {
        assert!(matches("task.42.extra", "task.*.extra"));
        assert!(!matches("task.42.extra.more", "task.*.extra"));
        assert!(!matches("task.extra", "task.*.extra"));
    }

    #[test]
    fn segment_counts_must_agree() {
        assert!(!matches("task.created.extra", "task.created"));
        assert!(!matches("task", "task.created"));
        assert!(matches("a.b.c", "*.*.*"));
        assert!(!matches("a.b", "*.*.*"));
    }

    #[test]
    fn lone_wildcard_matches_any_name() {
        assert!(matches("task", "*"));
        assert!(matches("task.created", "*"));
        assert!(matches("module.review.approved", "*"));
    }

    #[test]
    fn validate_rejects_empty_segments() {
        assert!(validate("").is_err());
        assert!(validate("task..created").is_err());
        assert!(validate("task.").is_err());
        assert!(validate("task.*").is_ok());
    }
}
