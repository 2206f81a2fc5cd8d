//! Limit/offset clamping for list endpoints.

/// Default page size for history listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 25;

/// Upper bound for a single history page.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Clamp a user-provided limit to valid bounds.
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).max(1).min(max)
}

/// Clamp a user-provided offset to non-negative.
pub fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_when_absent() {
        assert_eq!(clamp_limit(None, 25, 100), 25);
    }

    #[test]
    fn limit_is_bounded() {
        assert_eq!(clamp_limit(Some(0), 25, 100), 1);
        assert_eq!(clamp_limit(Some(500), 25, 100), 100);
    }

    #[test]
    fn negative_offset_becomes_zero() {
        assert_eq!(clamp_offset(Some(-4)), 0);
        assert_eq!(clamp_offset(Some(10)), 10);
    }
}
