//! Upload failure classification and retry backoff.
//!
//! Every failed upload attempt falls into one [`FailureClass`]. The class
//! decides what the scheduler and the upload watcher do next; the mapping
//! lives here so it can be tested without a network.

use std::time::Duration;

/// Outcome class of a failed upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Network or I/O trouble; retry once connectivity allows.
    Transient,
    /// The server rejected the credentials (401 or 403).
    Unauthorized(u16),
    /// Anything else; not retried for this attempt.
    Fatal,
}

impl FailureClass {
    /// Classify an HTTP status returned by the remote log.
    ///
    /// Only authorization statuses are special; other statuses are fatal for
    /// the attempt (the pending row stays and is retried on the next trigger).
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureClass::Unauthorized(status),
            _ => FailureClass::Fatal,
        }
    }

    /// What the upload watcher should do about this failure.
    pub fn decision(&self) -> UploadDecision {
        match self {
            FailureClass::Transient => UploadDecision::Retry,
            FailureClass::Unauthorized(status) => UploadDecision::Halt { status: *status },
            FailureClass::Fatal => UploadDecision::GiveUp,
        }
    }
}

/// Follow-up for a failed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    /// Re-enqueue; the scheduler applies backoff and the network constraint.
    Retry,
    /// Publish the unauthorized signal and stop scheduling uploads.
    Halt {
        /// Status the server answered with.
        status: u16,
    },
    /// Log and wait for the next scheduling trigger.
    GiveUp,
}

/// Exponential retry backoff with random jitter.
///
/// Delay for attempt `n` is `min(max, base * 2^n) + random(0..=max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay unit for the first retry.
    pub base: Duration,
    /// Cap before jitter.
    pub max: Duration,
    /// Upper bound of the random jitter.
    pub max_jitter: Duration,
}

impl Backoff {
    /// Seconds-based backoff capped at `max_secs`, with up to 5s of jitter.
    pub fn with_max_secs(max_secs: u64) -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(max_secs),
            max_jitter: Duration::from_millis(5_000),
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let base = self.base.saturating_mul(factor).min(self.max);
        base + random_jitter(self.max_jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::with_max_secs(30)
    }
}

/// Random duration in `0..=max`. Falls back to no jitter if the OS RNG is
/// unavailable.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_unauthorized() {
        assert_eq!(FailureClass::from_status(401), FailureClass::Unauthorized(401));
        assert_eq!(FailureClass::from_status(403), FailureClass::Unauthorized(403));
    }

    #[test]
    fn other_statuses_are_fatal() {
        for status in [400, 404, 409, 500, 503] {
            assert_eq!(FailureClass::from_status(status), FailureClass::Fatal);
        }
    }

    #[test]
    fn decisions_follow_class() {
        assert_eq!(FailureClass::Transient.decision(), UploadDecision::Retry);
        assert_eq!(
            FailureClass::Unauthorized(401).decision(),
            UploadDecision::Halt { status: 401 }
        );
        assert_eq!(FailureClass::Fatal.decision(), UploadDecision::GiveUp);
    }

    #[test]
    fn backoff_increases_exponentially() {
        let backoff = Backoff::default();
        let d1 = backoff.delay(1);
        let d2 = backoff.delay(2);
        let d3 = backoff.delay(3);

        // Base delays: 2s, 4s, 8s (plus up to 5s jitter)
        assert!(d1 >= Duration::from_secs(2));
        assert!(d1 <= Duration::from_secs(7));

        assert!(d2 >= Duration::from_secs(4));
        assert!(d2 <= Duration::from_secs(9));

        assert!(d3 >= Duration::from_secs(8));
        assert!(d3 <= Duration::from_secs(13));
    }

    #[test]
    fn backoff_caps_at_max() {
        let backoff = Backoff::with_max_secs(30);
        let d = backoff.delay(20);
        assert!(d >= Duration::from_secs(30));
        assert!(d <= Duration::from_secs(35));
    }

    #[test]
    fn backoff_none_is_zero() {
        assert_eq!(Backoff::none().delay(7), Duration::ZERO);
    }

    #[test]
    fn backoff_has_jitter() {
        let backoff = Backoff::default();
        let delays: Vec<Duration> = (0..10).map(|_| backoff.delay(1)).collect();
        let first = delays[0];
        assert!(
            delays.iter().any(|d| *d != first),
            "jitter should make delays differ"
        );
    }
}
