//! Broadcast fan-out for pipeline state changes.
//!
//! Session transitions, message status changes, and job failures are pushed
//! to read-side subscribers (the dashboard) over a tokio broadcast channel.
//! Delivery is at-most-once per currently connected subscriber; anyone who
//! needs durability must also read from persisted state.

pub mod event;

pub use event::PipelineEvent;

use {
    tokio::sync::broadcast,
    tracing::{debug, warn},
};

/// Default buffer size before lagging subscribers start dropping events.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast medium connecting the pipeline to its read-side collaborators.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct PubSub {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PubSub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all currently connected subscribers.
    ///
    /// Publishing with no subscribers is a no-op. Slow subscribers lag and
    /// drop events rather than blocking the publisher.
    pub fn publish(&self, event: PipelineEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "published pipeline event"),
            Err(_) => debug!("no subscribers for pipeline event"),
        }
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Drain a receiver into a vec without waiting, logging on lag.
pub fn drain_ready(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "pubsub subscriber lagged");
            },
            Err(_) => break,
        }
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tidechat_common::ChannelId, tidechat_common::TenantId};

    fn status_event() -> PipelineEvent {
        PipelineEvent::ChannelStatusChanged {
            channel_id: ChannelId::new(),
            tenant_id: TenantId::new(),
            status: "connected".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = PubSub::default();
        bus.publish(status_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = PubSub::default();
        let mut rx = bus.subscribe();
        let ev = status_event();
        bus.publish(ev.clone());
        let got = rx.recv().await.unwrap();
        assert_eq!(
            serde_json::to_value(&got).unwrap(),
            serde_json::to_value(&ev).unwrap()
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = PubSub::default();
        bus.publish(status_event());
        let mut rx = bus.subscribe();
        assert!(drain_ready(&mut rx).is_empty());
    }
}
