//! Retry backoff math for the job processor.
//!
//! The source uses a single formula for every failure kind, independent of
//! `ErrorCategory` — see `DESIGN.md` for why this diverges from the
//! teacher's per-category exponential backoff.

use std::time::Duration;

/// `attempt^4 + 15` seconds, where `attempt` is the broker's 1-based
/// delivery count. Attempts 1, 2, 3 give 16s, 31s, 96s.
pub fn nak_delay(attempt: u32) -> Duration {
    let attempt = attempt as u64;
    Duration::from_secs(attempt.saturating_pow(4) + 15)
}

/// Whether a handler should be retried again given `attempt` (the
/// delivery count just observed) and the envelope's `retry` field (max
/// *additional* attempts after the first).
pub fn should_retry(attempt: u32, retry: u32) -> bool {
    let max_attempts = retry + 1;
    attempt < max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_worked_example() {
        assert_eq!(nak_delay(1), Duration::from_secs(16));
        assert_eq!(nak_delay(2), Duration::from_secs(31));
        assert_eq!(nak_delay(3), Duration::from_secs(96));
    }

    #[test]
    fn strictly_increasing() {
        let mut prev = nak_delay(1);
        for attempt in 2..10 {
            let next = nak_delay(attempt);
            assert!(next > prev, "delay must strictly increase with attempt");
            prev = next;
        }
    }

    #[test]
    fn retry_count_matches_envelope_policy() {
        // retry = 2 -> max_attempts = 3: attempts 1 and 2 retry, 3 does not.
        assert!(should_retry(1, 2));
        assert!(should_retry(2, 2));
        assert!(!should_retry(3, 2));
    }

    #[test]
    fn zero_retry_never_retries() {
        assert!(!should_retry(1, 0));
    }
}
