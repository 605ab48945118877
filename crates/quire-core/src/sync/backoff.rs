//! Retry delay after consecutive failed cycles

use std::time::Duration;

/// First retry delay
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound for any retry delay
pub const BACKOFF_CEILING: Duration = Duration::from_secs(15 * 60);

/// Delay before the next attempt: zero without failures, then `base`
/// doubling per consecutive failure, capped at `ceiling`.
pub fn backoff(consecutive_failures: u32, base: Duration, ceiling: Duration) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (consecutive_failures - 1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(ceiling, |delay| delay.min(ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(failures: u32) -> Duration {
        backoff(failures, BACKOFF_BASE, BACKOFF_CEILING)
    }

    #[test]
    fn no_failures_means_no_delay() {
        assert_eq!(delay(0), Duration::ZERO);
    }

    #[test]
    fn doubles_per_failure() {
        assert_eq!(delay(1), Duration::from_secs(5));
        assert_eq!(delay(2), Duration::from_secs(10));
        assert_eq!(delay(3), Duration::from_secs(20));
        assert_eq!(delay(8), Duration::from_secs(640));
    }

    #[test]
    fn caps_at_ceiling() {
        assert_eq!(delay(9), BACKOFF_CEILING);
        assert_eq!(delay(40), BACKOFF_CEILING);
        assert_eq!(delay(u32::MAX), BACKOFF_CEILING);
    }
}
