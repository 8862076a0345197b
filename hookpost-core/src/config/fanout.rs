//! Fan-out defaults.

/// Values applied to new delivery rows when the matching subscription does
/// not set its own policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanoutDefaults {
    /// Used when a subscription's `max_retries` is not positive.
    pub max_attempts: i32,
    /// Used when a subscription's `retry_backoff_multiplier` is not a
    /// positive, finite number.
    pub backoff_multiplier: f64,
}

impl Default for FanoutDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
        }
    }
}
