//! The queue orchestrator: dispatcher loops, worker pools, retry policy.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tidechat_common::now_ms,
    tidechat_pubsub::{PipelineEvent, PubSub},
    tokio::{
        sync::{Mutex, Notify, RwLock, Semaphore},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    store::JobStore,
    types::{EnqueueOutcome, Job, JobState, QueueConfig},
};

/// How a handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The work is done; mark the job completed.
    Done,
    /// The work was submitted upstream; the job stays active until
    /// [`JobQueues::resolve_ack`] settles it.
    AwaitAck,
}

/// Executes jobs for one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion>;
}

/// Active jobs older than this are assumed lost (e.g. an ack that never
/// arrived) and are requeued, at startup and on every dispatch pass.
const STUCK_THRESHOLD_MS: u64 = 30 * 60 * 1000;

/// Max due jobs fetched per dispatcher pass.
const DISPATCH_BATCH: usize = 16;

struct QueueRuntime {
    config: QueueConfig,
    handler: Arc<dyn JobHandler>,
    /// Bounds this queue's worker pool.
    slots: Arc<Semaphore>,
    wake: Arc<Notify>,
}

/// The set of named queues and their worker pools.
pub struct JobQueues {
    store: Arc<dyn JobStore>,
    pubsub: PubSub,
    queues: RwLock<HashMap<String, Arc<QueueRuntime>>>,
    /// Serializes enqueue's find-then-insert so duplicate keys cannot race in.
    enqueue_lock: Mutex<()>,
    accepting: AtomicBool,
    running: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueues {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, pubsub: PubSub) -> Arc<Self> {
        Arc::new(Self {
            store,
            pubsub,
            queues: RwLock::new(HashMap::new()),
            enqueue_lock: Mutex::new(()),
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            dispatchers: Mutex::new(Vec::new()),
        })
    }

    /// Register a queue with its handler. Must happen before [`start`].
    ///
    /// [`start`]: JobQueues::start
    pub async fn register(&self, config: QueueConfig, handler: Arc<dyn JobHandler>) {
        let runtime = Arc::new(QueueRuntime {
            slots: Arc::new(Semaphore::new(config.concurrency)),
            wake: Arc::new(Notify::new()),
            config,
            handler,
        });
        self.queues
            .write()
            .await
            .insert(runtime.config.name.clone(), runtime);
    }

    /// Recover persisted jobs and spawn one dispatcher per queue.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.recover().await?;
        self.running.store(true, Ordering::SeqCst);

        let queues = self.queues.read().await;
        let mut dispatchers = self.dispatchers.lock().await;
        for runtime in queues.values() {
            let orchestrator = Arc::clone(self);
            let runtime = Arc::clone(runtime);
            dispatchers.push(tokio::spawn(async move {
                orchestrator.dispatch_loop(runtime).await;
            }));
        }
        info!(queues = queues.len(), "job queues started");
        Ok(())
    }

    /// Requeue jobs that were active when the process last died.
    async fn recover(&self) -> Result<()> {
        let now = now_ms();
        let jobs = self.store.load_all().await?;
        let mut requeued = 0;
        for mut job in jobs {
            let stuck = job.state == JobState::Active
                && now.saturating_sub(job.updated_at_ms) > STUCK_THRESHOLD_MS;
            if job.state == JobState::Active && !stuck {
                // Fresh restart: the process cannot still be running it.
                job.state = JobState::Pending;
                job.updated_at_ms = now;
                self.store.upsert(&job).await?;
                requeued += 1;
            } else if stuck {
                warn!(queue = %job.queue, key = %job.key, "requeuing stuck active job");
                job.state = JobState::Pending;
                job.updated_at_ms = now;
                self.store.upsert(&job).await?;
                requeued += 1;
            }
        }
        if requeued > 0 {
            info!(requeued, "recovered interrupted jobs");
        }
        Ok(())
    }

    /// Enqueue a unit of work. Returns [`EnqueueOutcome::Deduped`] if a job
    /// with this key is already pending, active, or delayed.
    pub async fn enqueue(
        &self,
        queue: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<EnqueueOutcome> {
        self.enqueue_at(queue, key, payload, now_ms()).await
    }

    /// Enqueue work that must not run before `at_ms` (scheduled messages,
    /// deferred cleanups). Same dedup semantics as [`enqueue`].
    ///
    /// [`enqueue`]: JobQueues::enqueue
    pub async fn enqueue_at(
        &self,
        queue: &str,
        key: &str,
        payload: serde_json::Value,
        at_ms: u64,
    ) -> Result<EnqueueOutcome> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let runtime = self.runtime(queue).await?;

        let _guard = self.enqueue_lock.lock().await;
        if let Some(existing) = self.store.get(queue, key).await? {
            if existing.state.holds_dedup_key() {
                debug!(queue, key, "enqueue deduped");
                return Ok(EnqueueOutcome::Deduped);
            }
        }

        let mut job = Job::new(queue, key, payload);
        job.next_eligible_at_ms = at_ms;
        if at_ms > now_ms() {
            job.state = JobState::Delayed;
        }
        self.store.upsert(&job).await?;
        drop(_guard);

        runtime.wake.notify_one();
        debug!(queue, key, "job enqueued");
        Ok(EnqueueOutcome::Accepted)
    }

    /// Settle a job that was left active awaiting an external acknowledgment.
    /// Success completes it; failure sends it down the retry path.
    pub async fn resolve_ack(
        &self,
        queue: &str,
        key: &str,
        outcome: std::result::Result<(), String>,
    ) -> Result<()> {
        let runtime = self.runtime(queue).await?;
        let mut job = self
            .store
            .get(queue, key)
            .await?
            .ok_or_else(|| Error::job_not_found(queue, key))?;

        if job.state != JobState::Active {
            debug!(queue, key, state = ?job.state, "ack for non-active job ignored");
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                job.state = JobState::Completed;
                job.last_error = None;
                job.updated_at_ms = now_ms();
                self.store.upsert(&job).await?;
                debug!(queue, key, "job completed by ack");
                Ok(())
            },
            Err(reason) => {
                self.handle_failure(&runtime, job, &reason).await?;
                runtime.wake.notify_one();
                Ok(())
            },
        }
    }

    /// Cancel a job that has not started yet. Returns `true` if the job was
    /// removed; active, completed, and failed jobs are left untouched.
    pub async fn cancel(&self, queue: &str, key: &str) -> Result<bool> {
        self.runtime(queue).await?;

        let _guard = self.enqueue_lock.lock().await;
        let Some(job) = self.store.get(queue, key).await? else {
            return Ok(false);
        };
        if !matches!(job.state, JobState::Pending | JobState::Delayed) {
            debug!(queue, key, state = ?job.state, "cancel ignored, job already started");
            return Ok(false);
        }
        self.store.delete(queue, key).await?;
        info!(queue, key, "job cancelled");
        Ok(true)
    }

    /// Reset a failed job for another round of attempts.
    pub async fn replay(&self, queue: &str, key: &str) -> Result<()> {
        let runtime = self.runtime(queue).await?;
        let mut job = self
            .store
            .get(queue, key)
            .await?
            .ok_or_else(|| Error::job_not_found(queue, key))?;

        if job.state != JobState::Failed {
            return Ok(());
        }
        job.state = JobState::Pending;
        job.attempts = 0;
        job.next_eligible_at_ms = now_ms();
        job.updated_at_ms = now_ms();
        self.store.upsert(&job).await?;
        runtime.wake.notify_one();
        info!(queue, key, "failed job replayed");
        Ok(())
    }

    /// Failed jobs on a queue, for inspection.
    pub async fn failed(&self, queue: &str) -> Result<Vec<Job>> {
        self.store.failed(queue).await
    }

    /// Fetch one job by identity.
    pub async fn get(&self, queue: &str, key: &str) -> Result<Option<Job>> {
        self.store.get(queue, key).await
    }

    /// Stop accepting new jobs and wait for in-flight ones up to `grace`.
    pub async fn drain(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        // Wake every dispatcher so the loops observe `running == false`.
        for runtime in self.queues.read().await.values() {
            runtime.wake.notify_one();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            // Arm the wakeup before the check so a job finishing in between
            // cannot be missed.
            let wait = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                warn!(
                    in_flight = self.in_flight.load(Ordering::SeqCst),
                    "drain grace period elapsed with jobs still running"
                );
                break;
            }
        }

        let mut dispatchers = self.dispatchers.lock().await;
        for handle in dispatchers.drain(..) {
            handle.abort();
        }
        info!("job queues drained");
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn runtime(&self, queue: &str) -> Result<Arc<QueueRuntime>> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .ok_or_else(|| Error::unknown_queue(queue))
    }

    async fn dispatch_loop(self: &Arc<Self>, runtime: Arc<QueueRuntime>) {
        let queue = runtime.config.name.clone();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let sleep_ms = self.dispatch_due(&runtime).await;

            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                () = runtime.wake.notified() => {
                    debug!(queue, "dispatcher woken");
                },
            }
        }
        debug!(queue, "dispatcher stopped");
    }

    /// Run everything due on this queue (up to free worker slots); return
    /// milliseconds until the next eligible job, for the sleep.
    async fn dispatch_due(self: &Arc<Self>, runtime: &Arc<QueueRuntime>) -> u64 {
        let now = now_ms();
        if let Err(e) = self.requeue_stuck(&runtime.config.name, now).await {
            error!(queue = %runtime.config.name, error = %e, "stuck-job sweep failed");
        }
        let due = match self.store.due(&runtime.config.name, now, DISPATCH_BATCH).await {
            Ok(due) => due,
            Err(e) => {
                error!(queue = %runtime.config.name, error = %e, "failed to fetch due jobs");
                return 1_000;
            },
        };

        for mut job in due {
            let Ok(permit) = Arc::clone(&runtime.slots).try_acquire_owned() else {
                // Pool saturated; the finishing worker wakes us.
                return 50;
            };

            // Mark active before spawning so the next pass skips it.
            job.state = JobState::Active;
            job.attempts += 1;
            job.updated_at_ms = now;
            if let Err(e) = self.store.upsert(&job).await {
                error!(queue = %job.queue, key = %job.key, error = %e, "failed to mark job active");
                continue;
            }

            let orchestrator = Arc::clone(self);
            let runtime = Arc::clone(runtime);
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                orchestrator.execute(&runtime, job).await;
                drop(permit);
                if orchestrator.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    orchestrator.idle.notify_waiters();
                }
                runtime.wake.notify_one();
            });
        }

        // Sleep until the soonest delayed job, or a slow poll tick.
        match self.next_eligible_in(&runtime.config.name).await {
            Some(ms) => ms.clamp(10, 30_000),
            None => 30_000,
        }
    }

    /// Requeue active jobs whose last update is older than the stuck
    /// threshold: a worker died mid-job, or an awaited ack never arrived.
    /// Requeued jobs re-enter the retry path instead of holding their
    /// dedup key forever.
    async fn requeue_stuck(&self, queue: &str, now: u64) -> Result<()> {
        let jobs = self.store.load_all().await?;
        for mut job in jobs {
            if job.queue == queue
                && job.state == JobState::Active
                && now.saturating_sub(job.updated_at_ms) > STUCK_THRESHOLD_MS
            {
                warn!(queue = %job.queue, key = %job.key, "requeuing stuck active job");
                job.state = JobState::Pending;
                job.next_eligible_at_ms = now;
                job.updated_at_ms = now;
                self.store.upsert(&job).await?;
            }
        }
        Ok(())
    }

    async fn next_eligible_in(&self, queue: &str) -> Option<u64> {
        let far_future = now_ms() + 7 * 24 * 3600 * 1000;
        let jobs = self.store.due(queue, far_future, DISPATCH_BATCH).await.ok()?;
        let now = now_ms();
        jobs.iter()
            .map(|j| j.next_eligible_at_ms.saturating_sub(now))
            .min()
    }

    async fn execute(self: &Arc<Self>, runtime: &Arc<QueueRuntime>, job: Job) {
        debug!(queue = %job.queue, key = %job.key, attempt = job.attempts, "executing job");

        match runtime.handler.run(&job).await {
            Ok(Completion::Done) => {
                let mut job = job;
                job.state = JobState::Completed;
                job.last_error = None;
                job.updated_at_ms = now_ms();
                if let Err(e) = self.store.upsert(&job).await {
                    error!(queue = %job.queue, key = %job.key, error = %e, "failed to persist completion");
                }
            },
            Ok(Completion::AwaitAck) => {
                debug!(queue = %job.queue, key = %job.key, "job awaiting external ack");
            },
            Err(e) => {
                let reason = format!("{e:#}");
                if let Err(e) = self.handle_failure(runtime, job, &reason).await {
                    error!(error = %e, "failed to persist job failure");
                }
            },
        }
    }

    /// Shared retry path: reschedule with backoff or park as failed.
    async fn handle_failure(
        &self,
        runtime: &Arc<QueueRuntime>,
        mut job: Job,
        reason: &str,
    ) -> Result<()> {
        let policy = &runtime.config.policy;
        job.last_error = Some(reason.to_string());
        job.updated_at_ms = now_ms();

        if job.attempts < policy.max_attempts {
            let delay = policy.jittered_backoff_ms(job.attempts);
            job.state = JobState::Delayed;
            job.next_eligible_at_ms = now_ms() + delay;
            warn!(
                queue = %job.queue,
                key = %job.key,
                attempt = job.attempts,
                max = policy.max_attempts,
                delay_ms = delay,
                error = reason,
                "job failed, retrying with backoff"
            );
        } else {
            job.state = JobState::Failed;
            error!(
                queue = %job.queue,
                key = %job.key,
                attempts = job.attempts,
                error = reason,
                "job failed permanently"
            );
            self.pubsub.publish(PipelineEvent::JobFailed {
                queue: job.queue.clone(),
                job_key: job.key.clone(),
                error: reason.to_string(),
            });
        }
        self.store.upsert(&job).await
    }
}
