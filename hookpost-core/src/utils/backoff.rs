/// Returns the delay before the next delivery attempt.
///
/// `base × multiplier^attempts`, where `attempts` is the number of failed
/// attempts so far (already incremented for the failure being handled).
/// The result is clamped to `max`; non-finite or sub-1 multipliers are
/// treated as `1.0` so the delay never shrinks as attempts grow.
pub fn retry_delay(
    base: std::time::Duration,
    multiplier: f64,
    attempts: u32,
    max: std::time::Duration,
) -> std::time::Duration {
    let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    };
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let seconds = base.as_secs_f64() * multiplier.powi(exponent);
    if !seconds.is_finite() || seconds >= max.as_secs_f64() {
        return max;
    }
    std::time::Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BASE: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_retry_delay_calculation() {
        assert_eq!(retry_delay(BASE, 2.0, 0, MAX), Duration::from_secs(60));
        assert_eq!(retry_delay(BASE, 2.0, 1, MAX), Duration::from_secs(120));
        assert_eq!(retry_delay(BASE, 2.0, 2, MAX), Duration::from_secs(240));
        assert_eq!(retry_delay(BASE, 1.5, 2, MAX), Duration::from_secs(135));
        // Capped
        assert_eq!(retry_delay(BASE, 2.0, 20, MAX), MAX);
        assert_eq!(retry_delay(BASE, 2.0, u32::MAX, MAX), MAX);
    }

    #[test]
    fn test_retry_delay_non_decreasing() {
        for multiplier in [1.0, 1.25, 2.0, 3.0, 10.0] {
            let mut previous = Duration::ZERO;
            for attempts in 0..40 {
                let delay = retry_delay(BASE, multiplier, attempts, MAX);
                assert!(delay >= previous, "multiplier {multiplier} attempt {attempts}");
                assert!(delay <= MAX);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_retry_delay_degenerate_multiplier() {
        assert_eq!(retry_delay(BASE, 0.5, 3, MAX), BASE);
        assert_eq!(retry_delay(BASE, f64::NAN, 3, MAX), BASE);
        assert_eq!(retry_delay(BASE, f64::INFINITY, 3, MAX), BASE);
    }
}
