use std::time::Duration;

use rand::Rng;

use super::QueryError;

/// Attempts allowed when a descriptor opts into retry with a plain `true`.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Initial backoff delay before the first automatic retry.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound on a single backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Automatic retry behaviour for one query.
///
/// Nothing in this client retries by default: failures stay in `Error`
/// until a refetch, an invalidation or a session change triggers a new
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Disabled,
    /// Retry up to this many times after the first failure.
    Limited(u32),
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// policy is exhausted or the error is not worth retrying.
    pub fn backoff(&self, attempt: u32, error: &QueryError) -> Option<Duration> {
        let limit = match self {
            RetryPolicy::Disabled => return None,
            RetryPolicy::Limited(limit) => *limit,
        };
        // A rejected session will not start working on its own
        if attempt >= limit || error.is_expected() {
            return None;
        }

        let base = INITIAL_BACKOFF_MS
            .saturating_mul(1u64 << attempt.min(16))
            .min(MAX_BACKOFF_MS);
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Some(Duration::from_millis(base + jitter))
    }
}

impl From<bool> for RetryPolicy {
    fn from(retry: bool) -> Self {
        if retry {
            RetryPolicy::Limited(DEFAULT_RETRY_COUNT)
        } else {
            RetryPolicy::Disabled
        }
    }
}

impl From<u32> for RetryPolicy {
    fn from(count: u32) -> Self {
        if count == 0 {
            RetryPolicy::Disabled
        } else {
            RetryPolicy::Limited(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> QueryError {
        QueryError::transport(Some(500), "boom")
    }

    #[test]
    fn test_disabled_never_retries() {
        assert_eq!(RetryPolicy::Disabled.backoff(0, &server_error()), None);
        assert_eq!(RetryPolicy::default(), RetryPolicy::Disabled);
    }

    #[test]
    fn test_limited_is_bounded() {
        let policy = RetryPolicy::Limited(2);
        assert!(policy.backoff(0, &server_error()).is_some());
        assert!(policy.backoff(1, &server_error()).is_some());
        assert_eq!(policy.backoff(2, &server_error()), None);
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::Limited(5);
        let first = policy.backoff(0, &server_error()).unwrap();
        let third = policy.backoff(2, &server_error()).unwrap();
        assert!(first >= Duration::from_millis(1000));
        assert!(first <= Duration::from_millis(1250));
        assert!(third >= Duration::from_millis(4000));
    }

    #[test]
    fn test_unauthorized_is_never_retried() {
        assert_eq!(RetryPolicy::Limited(3).backoff(0, &QueryError::Unauthorized), None);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(RetryPolicy::from(true), RetryPolicy::Limited(DEFAULT_RETRY_COUNT));
        assert_eq!(RetryPolicy::from(false), RetryPolicy::Disabled);
        assert_eq!(RetryPolicy::from(0u32), RetryPolicy::Disabled);
        assert_eq!(RetryPolicy::from(4u32), RetryPolicy::Limited(4));
    }
}
