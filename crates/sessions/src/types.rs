//! Channel data types and the connection status machine.

use {
    serde::{Deserialize, Serialize},
    tidechat_common::{ChannelId, TenantId, now_ms},
};

/// Connection status of a channel.
///
/// Happy path: `disconnected → connecting → awaiting_scan → connected`.
/// Any state may fall to `error`; recoverable disconnects go through
/// `reconnecting → connecting`. `terminated` is reached only on explicit
/// channel deletion and is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Disconnected,
    AwaitingScan,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Terminated,
}

impl ChannelStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }

    /// Terminated channels accept no further transitions or events.
    #[must_use]
    pub fn is_final(self) -> bool {
        self == Self::Terminated
    }
}

/// Why the gateway dropped a session. Terminal reasons require manual
/// re-initiation; everything else is retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Network blip, gateway restart, timeout.
    ConnectionLost,
    /// The gateway process reported an internal error.
    GatewayError,
    /// The account was logged out on the phone. Terminal.
    LoggedOut,
    /// Another client took over the session. Terminal.
    Replaced,
    /// The account was banned by the upstream network. Terminal.
    Banned,
}

impl DisconnectReason {
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::ConnectionLost | Self::GatewayError)
    }
}

/// A configured connection point to the external gateway for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    /// Instance name registered with the external gateway.
    pub external_instance_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub status: ChannelStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Channel {
    #[must_use]
    pub fn new(tenant_id: TenantId, external_instance_name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: ChannelId::new(),
            tenant_id,
            external_instance_name: external_instance_name.into(),
            phone_number: None,
            status: ChannelStatus::Disconnected,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_classification() {
        assert!(DisconnectReason::ConnectionLost.is_recoverable());
        assert!(DisconnectReason::GatewayError.is_recoverable());
        assert!(!DisconnectReason::LoggedOut.is_recoverable());
        assert!(!DisconnectReason::Replaced.is_recoverable());
        assert!(!DisconnectReason::Banned.is_recoverable());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let v = serde_json::to_value(ChannelStatus::AwaitingScan).unwrap();
        assert_eq!(v, "awaiting_scan");
    }

    #[test]
    fn test_only_terminated_is_final() {
        for status in [
            ChannelStatus::Disconnected,
            ChannelStatus::AwaitingScan,
            ChannelStatus::Connecting,
            ChannelStatus::Connected,
            ChannelStatus::Reconnecting,
            ChannelStatus::Error,
        ] {
            assert!(!status.is_final());
        }
        assert!(ChannelStatus::Terminated.is_final());
    }
}
