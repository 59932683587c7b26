//! Command error shape shared by all command handlers.

use serde::{Deserialize, Serialize};

pub mod error_codes {
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_params(message: impl std::fmt::Display) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message.to_string())
    }

    #[must_use]
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(error_codes::INTERNAL, message.to_string())
    }
}

/// Response frame returned by `POST /commands/{method}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl CommandResponse {
    #[must_use]
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    #[must_use]
    pub fn err(error: ErrorShape) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}
