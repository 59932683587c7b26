//! Message data types.

use {
    serde::{Deserialize, Serialize},
    tidechat_common::{ChatId, MessageId, TenantId, now_ms},
};

/// Canonical delivery status. The happy path is strictly ordered
/// (`pending < sent < delivered < read`); `failed` is terminal and reachable
/// from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position in the happy-path ordering; `None` for `failed`, which sits
    /// outside the progression.
    #[must_use]
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// Whether the message left us or arrived from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// A message row in a tenant's chat history. Never deleted; chat history
/// soft-references it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    pub direction: Direction,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at_ms: Option<u64>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Message {
    /// A fresh outbound message awaiting a send.
    #[must_use]
    pub fn outbound(tenant_id: TenantId, chat_id: ChatId, body: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: MessageId::new(),
            chat_id,
            tenant_id,
            external_message_id: None,
            direction: Direction::Outbound,
            status: MessageStatus::Pending,
            body: Some(body.into()),
            delivered_at_ms: None,
            read_at_ms: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// An inbound message ingested from the gateway.
    #[must_use]
    pub fn inbound(
        tenant_id: TenantId,
        chat_id: ChatId,
        external_message_id: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: MessageId::new(),
            chat_id,
            tenant_id,
            external_message_id: Some(external_message_id.into()),
            direction: Direction::Inbound,
            status: MessageStatus::Delivered,
            body,
            delivered_at_ms: Some(now),
            read_at_ms: None,
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
    fn test_rank_is_strictly_increasing() {
        let order = [
            MessageStatus::Pending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(MessageStatus::Failed.rank(), None);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::outbound(TenantId::new(), ChatId::new(), "hi");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
