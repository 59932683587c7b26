use {thiserror::Error, tidechat_common::ChannelId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("channel not found: {channel_id}")]
    ChannelNotFound { channel_id: ChannelId },

    #[error("a live session already exists for channel {channel_id}")]
    AlreadyOpen { channel_id: ChannelId },

    #[error("channel {channel_id} is terminated")]
    Terminated { channel_id: ChannelId },

    #[error("gateway error: {message}")]
    Session { message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn channel_not_found(channel_id: ChannelId) -> Self {
        Self::ChannelNotFound { channel_id }
    }

    #[must_use]
    pub fn already_open(channel_id: ChannelId) -> Self {
        Self::AlreadyOpen { channel_id }
    }

    #[must_use]
    pub fn session(message: impl std::fmt::Display) -> Self {
        Self::Session {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
