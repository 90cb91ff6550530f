//! # Retry Policy
//!
//! Exponential backoff with jitter, evaluated statelessly from the persisted
//! `retry_count` and `last_attempt_at` of each operation.
//!
//! ## Backoff Curve
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  backoff(n) = min(max_delay, base_delay × 2ⁿ × (1 + jitter))            │
//! │               jitter ~ Uniform[-0.3, 0.3]                               │
//! │                                                                         │
//! │  n = 0  →   1s  (0.7s ..   1.3s)                                       │
//! │  n = 1  →   2s  (1.4s ..   2.6s)                                       │
//! │  n = 2  →   4s  (2.8s ..   5.2s)                                       │
//! │  n = 3  →   8s  (5.6s ..  10.4s)                                       │
//! │  n = 4  →  16s  (11.2s .. 20.8s)                                       │
//! │  n = 5  →  32s  (22.4s .. 41.6s)                                       │
//! │  ...                                                                    │
//! │  cap    → 300s  (applied AFTER jitter)                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::operation::{OperationStatus, QueuedOperation};
use crate::{DEFAULT_JITTER, DEFAULT_MAX_RETRIES};

/// Highest exponent fed to `2ⁿ`; beyond this every delay is capped anyway.
const MAX_EXPONENT: u32 = 62;

/// Backoff and retry-ceiling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Symmetric jitter bound; `0.3` means ±30%.
    pub jitter: f64,

    /// Failures after which an operation is never retried.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: DEFAULT_JITTER,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Checks that the arithmetic below stays meaningful.
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(CoreError::InvalidRetryPolicy(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.base_delay.is_zero() {
            return Err(CoreError::InvalidRetryPolicy(
                "base_delay must be greater than 0".into(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(CoreError::InvalidRetryPolicy(
                "max_delay must be at least base_delay".into(),
            ));
        }
        Ok(())
    }

    /// Backoff for `retry_count` with a caller-chosen jitter factor.
    ///
    /// `jitter` is clamped to `[-self.jitter, self.jitter]`.
    pub fn backoff_with_jitter(&self, retry_count: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(-self.jitter, self.jitter);
        let exponent = retry_count.min(MAX_EXPONENT) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * (1.0 + jitter);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Backoff for `retry_count` with jitter drawn uniformly from `[-j, j]`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.backoff_with_jitter(retry_count, jitter)
    }

    /// Whether a failed operation may be attempted again at `now`.
    ///
    /// ```text
    /// status != Failed                  → false
    /// retry_count >= max_retries        → false
    /// no previous attempt               → true
    /// otherwise                         → now > last_attempt_at + backoff(retry_count)
    /// ```
    pub fn should_retry(&self, op: &QueuedOperation, now: DateTime<Utc>) -> bool {
        self.should_retry_after(op, now, |n| self.backoff(n))
    }

    /// [`should_retry`](Self::should_retry) with a fixed jitter factor.
    pub fn should_retry_with_jitter(
        &self,
        op: &QueuedOperation,
        now: DateTime<Utc>,
        jitter: f64,
    ) -> bool {
        self.should_retry_after(op, now, |n| self.backoff_with_jitter(n, jitter))
    }

    fn should_retry_after<F>(&self, op: &QueuedOperation, now: DateTime<Utc>, delay: F) -> bool
    where
        F: FnOnce(u32) -> Duration,
    {
        if op.status != OperationStatus::Failed {
            return false;
        }
        if op.retry_count >= self.max_retries {
            return false;
        }
        let Some(last_attempt) = op.last_attempt_at else {
            return true;
        };
        // A wait past chrono's range never elapses.
        ChronoDuration::from_std(delay(op.retry_count))
            .ok()
            .and_then(|wait| last_attempt.checked_add_signed(wait))
            .map_or(false, |due| now > due)
    }

    /// Whether an operation may enter the next drain batch.
    pub fn is_eligible(&self, op: &QueuedOperation, now: DateTime<Utc>) -> bool {
        match op.status {
            OperationStatus::Pending => true,
            OperationStatus::Failed => self.should_retry(op, now),
            OperationStatus::InProgress | OperationStatus::Completed => false,
        }
    }

    /// Whether an operation has used up its attempts.
    pub fn is_exhausted(&self, op: &QueuedOperation) -> bool {
        op.status == OperationStatus::Failed && op.retry_count >= self.max_retries
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{NewOperation, OperationType};

    fn failed_op(retry_count: u32, last_attempt: Option<DateTime<Utc>>) -> QueuedOperation {
        let mut op = QueuedOperation::new(
            NewOperation::new(OperationType::Update, "/checkins/1"),
            Utc::now(),
        );
        op.status = OperationStatus::Failed;
        op.retry_count = retry_count;
        op.last_attempt_at = last_attempt;
        op
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert_eq!(policy.max_retries, 5);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_backoff_zero_within_jitter_band() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.backoff(0).as_secs_f64();
            assert!((0.7..=1.3).contains(&d), "backoff(0) = {d}");
        }
    }

    #[test]
    fn test_backoff_monotonic_without_jitter() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for n in 0..=5 {
            let d = policy.backoff_with_jitter(n, 0.0);
            assert!(d >= previous);
            assert_eq!(d, Duration::from_secs(1 << n));
            previous = d;
        }
    }

    #[test]
    fn test_backoff_capped_after_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_with_jitter(8, 0.3), Duration::from_secs(300));
        assert_eq!(policy.backoff_with_jitter(40, -0.3), Duration::from_secs(300));
        assert_eq!(policy.backoff_with_jitter(u32::MAX, 0.0), Duration::from_secs(300));
        for _ in 0..100 {
            assert!(policy.backoff(12) <= Duration::from_secs(300));
        }
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_with_jitter(0, 5.0),
            Duration::from_secs_f64(1.3)
        );
    }

    #[test]
    fn test_should_retry_rules() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let mut pending = failed_op(0, None);
        pending.status = OperationStatus::Pending;
        assert!(!policy.should_retry(&pending, now));

        assert!(policy.should_retry(&failed_op(1, None), now));

        let recent = failed_op(1, Some(now));
        assert!(!policy.should_retry_with_jitter(&recent, now, 0.0));
        assert!(!policy.should_retry_with_jitter(
            &recent,
            now + ChronoDuration::seconds(2),
            0.0
        ));
        assert!(policy.should_retry_with_jitter(
            &recent,
            now + ChronoDuration::milliseconds(2001),
            0.0
        ));
    }

    #[test]
    fn test_retry_ceiling_ignores_elapsed_time() {
        let policy = RetryPolicy::default();
        let long_ago = Utc::now() - ChronoDuration::days(365);
        let op = failed_op(5, Some(long_ago));
        assert!(!policy.should_retry(&op, Utc::now()));
        assert!(policy.is_exhausted(&op));
        assert!(!policy.is_eligible(&op, Utc::now()));
    }

    #[test]
    fn test_unrepresentable_backoff_is_never_due() {
        let policy = RetryPolicy {
            base_delay: Duration::MAX,
            max_delay: Duration::MAX,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(policy.backoff_with_jitter(4, 0.0), Duration::MAX);

        let now = Utc::now();
        let op = failed_op(1, Some(now - ChronoDuration::days(365)));
        assert!(!policy.should_retry_with_jitter(&op, now, 0.0));
        assert!(!policy.is_eligible(&op, now));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut policy = RetryPolicy::default();
        policy.jitter = 1.5;
        assert!(policy.validate().is_err());

        let mut policy = RetryPolicy::default();
        policy.max_delay = Duration::from_millis(10);
        assert!(policy.validate().is_err());
    }
}
