//! Core data types for the job queue system.

use {
    rand::Rng,
    serde::{Deserialize, Serialize},
    tidechat_common::now_ms,
};

/// Lifecycle of a job. `Completed` and `Failed` are terminal; only `Failed`
/// can leave a terminal state, and only through an explicit replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible to run as soon as a worker slot frees up.
    Pending,
    /// Currently executing (or awaiting an external acknowledgment).
    Active,
    /// Waiting out a retry backoff or a scheduled start time.
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    /// States that hold the dedup key: a second enqueue of the same
    /// `(queue, key)` is a no-op while one of these is outstanding.
    #[must_use]
    pub fn holds_dedup_key(self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Delayed)
    }
}

/// A unit of work. Identity is `(queue, key)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub queue: String,
    /// Dedup key derived from business identity, e.g. `audio-send-{messageId}`.
    pub key: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Epoch millis before which the job must not run.
    pub next_eligible_at_ms: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Job {
    #[must_use]
    pub fn new(queue: impl Into<String>, key: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            key: key.into(),
            payload,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            next_eligible_at_ms: now,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}

/// Outcome of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// A job with the same key is already outstanding.
    Deduped,
}

/// Exponential backoff with a cap and a little jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Deterministic backoff for the given (1-based) attempt number:
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms)
    }

    /// Backoff with up to 10% random jitter added, to spread thundering herds.
    #[must_use]
    pub fn jittered_backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.backoff_ms(attempt);
        let jitter = rand::rng().random_range(0..=base / 10);
        base + jitter
    }
}

/// Static configuration of one named queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    /// Max jobs processed in parallel on this queue.
    pub concurrency: usize,
    pub policy: RetryPolicy,
}

impl QueueConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: 4,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        };
        assert_eq!(policy.backoff_ms(1), 1_000);
        assert_eq!(policy.backoff_ms(2), 2_000);
        assert_eq!(policy.backoff_ms(3), 4_000);
        assert_eq!(policy.backoff_ms(4), 5_000);
        assert_eq!(policy.backoff_ms(10), 5_000);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let base = policy.backoff_ms(attempt);
            for _ in 0..20 {
                let jittered = policy.jittered_backoff_ms(attempt);
                assert!(jittered >= base);
                assert!(jittered <= base + base / 10);
            }
        }
    }

    #[test]
    fn test_dedup_states() {
        assert!(JobState::Pending.holds_dedup_key());
        assert!(JobState::Active.holds_dedup_key());
        assert!(JobState::Delayed.holds_dedup_key());
        assert!(!JobState::Completed.holds_dedup_key());
        assert!(!JobState::Failed.holds_dedup_key());
    }

    #[test]
    fn test_job_roundtrip() {
        let job = Job::new("audio-send", "audio-send-42", serde_json::json!({"messageId": 42}));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(job, back);
    }
}
