//! Time source for the emitter and dispatcher.
//!
//! Every timestamp is truncated to microseconds, the precision Postgres
//! stores. A `processed_at` value read back from the database must compare
//! equal to the one that was written, because claims are guarded on it.

use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Drop sub-microsecond precision.
pub fn truncate_to_micros(at: OffsetDateTime) -> OffsetDateTime {
    let nanos = at.nanosecond();
    at.replace_nanosecond(nanos - nanos % 1_000).unwrap_or(at)
}

/// Wall clock, UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        truncate_to_micros(OffsetDateTime::now_utc())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(truncate_to_micros(start)),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = truncate_to_micros(*now + by);
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = truncate_to_micros(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_micros() {
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_706_400_000_123_456_789).unwrap();
        assert_eq!(truncate_to_micros(at).nanosecond(), 123_456_000);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = OffsetDateTime::from_unix_timestamp(1_706_400_000).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(time::Duration::seconds(120));
        assert_eq!(clock.now(), start + time::Duration::seconds(120));
    }
}
