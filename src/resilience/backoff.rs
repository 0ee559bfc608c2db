//! Exponential backoff.

use std::time::Duration;
use rand::Rng;

/// `base * 2^retry_count`, capped at `cap`. Deterministic.
///
/// Used for request re-scheduling, where the not-before instant is persisted
/// and reported back to callers.
pub fn exponential_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Exponential backoff with up to 10% jitter, for in-process transport retries.
///
/// `attempt` is 1-based; attempt 0 never waits.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);

        assert_eq!(calculate_backoff(0, 100, 1000), Duration::ZERO);
    }

    #[test]
    fn exponential_delay_doubles_until_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(300);
        assert_eq!(exponential_delay(0, base, cap), Duration::from_secs(1));
        assert_eq!(exponential_delay(3, base, cap), Duration::from_secs(8));
        assert_eq!(exponential_delay(9, base, cap), Duration::from_secs(300));
        assert_eq!(exponential_delay(64, base, cap), cap);
    }

    #[test]
    fn exponential_delay_scales_base() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        assert_eq!(exponential_delay(2, base, cap), Duration::from_secs(20));
        assert_eq!(exponential_delay(6, base, cap), cap);
    }
}
