//! Dispatcher policy.

use std::time::Duration;

/// How many bytes of a receiver's response body are kept on the row.
///
/// The truncation is intentional: the body is stored for diagnostics only
/// and receivers may answer with arbitrarily large pages.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 1024;

/// Delivery policy for a [`Dispatcher`](crate::processors::Dispatcher).
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPolicy {
    /// Backoff unit; the n-th retry waits `base_backoff × multiplier^n`.
    pub base_backoff: Duration,
    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,
    /// Timeout for one HTTP delivery attempt, connect included.
    pub request_timeout: Duration,
    /// See [`DEFAULT_RESPONSE_BODY_LIMIT`].
    pub response_body_limit: usize,
    /// Deliveries in flight at once within one batch.
    pub concurrency: usize,
    /// A row left in `processing` longer than this is considered abandoned
    /// by a crashed dispatcher and may be claimed again.
    pub claim_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            concurrency: 8,
            claim_timeout: Duration::from_secs(5 * 60),
        }
    }
}
