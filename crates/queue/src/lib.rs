//! Durable, retryable job queues with bounded worker concurrency.
//!
//! One named queue per workload class. Each queue has a retry policy
//! (exponential backoff, max attempts) and deduplicates on a business key:
//! enqueuing a key that is already pending, active, or delayed is a no-op.
//! Retry state (attempt count, next-eligible time) is persisted with the
//! job so retries survive process restarts.

pub mod error;
pub mod names;
pub mod orchestrator;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    orchestrator::{Completion, JobHandler, JobQueues},
    store::JobStore,
    store_memory::MemoryJobStore,
    store_sqlite::SqliteJobStore,
    types::{EnqueueOutcome, Job, JobState, QueueConfig, RetryPolicy},
};

/// Run database migrations for the job broker store.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
