//! In-memory job store for tests.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::Mutex};

use crate::{
    Result,
    store::JobStore,
    types::{Job, JobState},
};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<(String, String), Job>>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_all(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .await
            .insert((job.queue.clone(), job.key.clone()), job.clone());
        Ok(())
    }

    async fn get(&self, queue: &str, key: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .get(&(queue.to_string(), key.to_string()))
            .cloned())
    }

    async fn due(&self, queue: &str, now_ms: u64, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut due: Vec<Job> = jobs
            .values()
            .filter(|j| {
                j.queue == queue
                    && matches!(j.state, JobState::Pending | JobState::Delayed)
                    && j.next_eligible_at_ms <= now_ms
            })
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_eligible_at_ms);
        due.truncate(limit);
        Ok(due)
    }

    async fn failed(&self, queue: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Failed)
            .cloned()
            .collect())
    }

    async fn delete(&self, queue: &str, key: &str) -> Result<()> {
        self.jobs
            .lock()
            .await
            .remove(&(queue.to_string(), key.to_string()));
        Ok(())
    }
}
