//! Wire types for gateway webhook events.

use {
    serde::{Deserialize, Serialize},
    tidechat_common::ChatId,
    tidechat_sessions::DisconnectReason,
};

use crate::{Error, Result};

/// One event delivered by the gateway webhook, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// A fresh pairing artifact for a channel awaiting a scan.
    PairingArtifact { instance: String, artifact: String },
    /// The gateway's session for an instance changed connection state.
    ConnectionUpdate {
        instance: String,
        #[serde(flatten)]
        state: ConnectionState,
    },
    /// A batch of inbound messages received on an instance.
    MessageBatch {
        instance: String,
        messages: Vec<InboundItem>,
    },
    /// A batch of delivery status updates for previously sent messages.
    StatusBatch {
        instance: String,
        updates: Vec<StatusItem>,
    },
    /// The gateway acknowledged (or refused) an asynchronous send.
    SendAck {
        instance: String,
        queue: String,
        job_key: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected { reason: DisconnectReason },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundItem {
    pub external_message_id: String,
    pub chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusItem {
    pub external_message_id: String,
    /// Numeric delivery code as sent by the gateway (2 sent, 3 delivered,
    /// 4 read; anything else is ignored downstream).
    pub code: i64,
}

const KNOWN_KINDS: &[&str] = &[
    "pairing_artifact",
    "connection_update",
    "message_batch",
    "status_batch",
    "send_ack",
];

impl WebhookEvent {
    /// Decode a raw webhook body, classifying failures.
    ///
    /// A body that is not JSON, or a known kind with missing fields, is
    /// [`Error::MalformedEvent`]; a well-formed body with an unrecognized
    /// `kind` is [`Error::UnknownEventKind`].
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(Error::malformed)?;

        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::malformed("missing kind field"))?;
        if !KNOWN_KINDS.contains(&kind) {
            return Err(Error::unknown_kind(kind));
        }

        serde_json::from_value(value).map_err(Error::malformed)
    }
}
