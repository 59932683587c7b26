use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("job not found: {queue}/{key}")]
    JobNotFound { queue: String, key: String },

    #[error("queue is shutting down, enqueue rejected")]
    ShuttingDown,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn unknown_queue(queue: impl Into<String>) -> Self {
        Self::UnknownQueue {
            queue: queue.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(queue: impl Into<String>, key: impl Into<String>) -> Self {
        Self::JobNotFound {
            queue: queue.into(),
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
