//! Persistence trait for jobs.

use async_trait::async_trait;

use crate::{Result, types::Job};

/// Persistence backend for the broker's job store.
///
/// Dedup-sensitive writes happen under the orchestrator's enqueue lock, so
/// implementations only need plain reads and upserts.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Job>>;
    async fn upsert(&self, job: &Job) -> Result<()>;
    async fn get(&self, queue: &str, key: &str) -> Result<Option<Job>>;
    /// Jobs on `queue` that are pending/delayed and eligible at `now_ms`.
    async fn due(&self, queue: &str, now_ms: u64, limit: usize) -> Result<Vec<Job>>;
    /// Failed jobs on `queue`, for inspection and manual replay.
    async fn failed(&self, queue: &str) -> Result<Vec<Job>>;
    /// Remove a job entirely (cancellation of not-yet-started work).
    async fn delete(&self, queue: &str, key: &str) -> Result<()>;
}
