use {thiserror::Error, tidechat_common::MessageId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("message not found: {message_id}")]
    MessageNotFound { message_id: MessageId },

    #[error("tenant routing failed: {message}")]
    Routing { message: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn message_not_found(message_id: MessageId) -> Self {
        Self::MessageNotFound { message_id }
    }

    #[must_use]
    pub fn routing(message: impl std::fmt::Display) -> Self {
        Self::Routing {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
