//! Typed internal events consumed by a channel's session worker.

use crate::types::DisconnectReason;

/// One item on a channel's ordered event queue.
///
/// Event ingestion enqueues these instead of invoking callbacks directly,
/// so pairing and connection updates for a channel are processed strictly
/// in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new pairing artifact (QR payload) replacing any previous one.
    PairingArtifact(String),
    /// The gateway finished the handshake.
    Connected,
    /// The gateway dropped the session.
    Disconnected(DisconnectReason),
}
