use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed event: {detail}")]
    MalformedEvent { detail: String },

    #[error("unknown event kind: {kind}")]
    UnknownEventKind { kind: String },
}

impl Error {
    #[must_use]
    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::MalformedEvent {
            detail: detail.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownEventKind { kind: kind.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
