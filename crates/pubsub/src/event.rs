//! Events emitted by the pipeline for real-time read-side updates.

use {
    serde::{Deserialize, Serialize},
    tidechat_common::{ChannelId, ChatId, MessageId, TenantId},
};

/// Events broadcast by the pipeline.
///
/// Status fields carry the serialized form of the component's own enum so
/// subscribers stay decoupled from internal crate types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A channel moved to a new connection status.
    ChannelStatusChanged {
        channel_id: ChannelId,
        tenant_id: TenantId,
        status: String,
    },
    /// A fresh pairing artifact (QR payload) is available for scanning.
    /// Replaces any previously published artifact for the channel.
    PairingArtifact {
        channel_id: ChannelId,
        tenant_id: TenantId,
        artifact: String,
    },
    /// A message advanced to a later delivery status.
    MessageStatusChanged {
        message_id: MessageId,
        chat_id: ChatId,
        tenant_id: TenantId,
        status: String,
    },
    /// An inbound message was ingested into a chat.
    InboundMessage {
        message_id: MessageId,
        chat_id: ChatId,
        tenant_id: TenantId,
        channel_id: ChannelId,
        preview: Option<String>,
    },
    /// A tenant's lifecycle status changed (provisioning outcome included).
    TenantStatusChanged { tenant_id: TenantId, status: String },
    /// A job exhausted its retries and was moved to the failed state.
    JobFailed {
        queue: String,
        job_key: String,
        error: String,
    },
}
