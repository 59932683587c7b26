//! Routes decoded webhook events to the component that owns them.
//!
//! Dispatch is a pure routing table: event kind to handler. Handler errors
//! are isolated per event (and per batch item) and logged; one bad event
//! never aborts the ingestion stream.

use {
    std::sync::Arc,
    tidechat_messaging::{Message, MessageStore, Reconciler},
    tidechat_pubsub::{PipelineEvent, PubSub},
    tidechat_queue::JobQueues,
    tidechat_sessions::{SessionEvent, SessionManager},
    tracing::{debug, warn},
};

use crate::event::{ConnectionState, InboundItem, StatusItem, WebhookEvent};

/// Max characters of message body forwarded as the read-side preview.
const PREVIEW_LEN: usize = 80;

pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    reconciler: Arc<Reconciler>,
    messages: Arc<dyn MessageStore>,
    queues: Arc<JobQueues>,
    pubsub: PubSub,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        reconciler: Arc<Reconciler>,
        messages: Arc<dyn MessageStore>,
        queues: Arc<JobQueues>,
        pubsub: PubSub,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            reconciler,
            messages,
            queues,
            pubsub,
        })
    }

    /// Route one decoded event. Downstream failures are logged and
    /// swallowed so the stream keeps flowing.
    pub async fn dispatch(&self, event: WebhookEvent) {
        match event {
            WebhookEvent::PairingArtifact { instance, artifact } => {
                self.sessions
                    .handle_event(&instance, SessionEvent::PairingArtifact(artifact))
                    .await;
            },
            WebhookEvent::ConnectionUpdate { instance, state } => {
                let event = match state {
                    ConnectionState::Connected => SessionEvent::Connected,
                    ConnectionState::Disconnected { reason } => SessionEvent::Disconnected(reason),
                };
                self.sessions.handle_event(&instance, event).await;
            },
            WebhookEvent::MessageBatch { instance, messages } => {
                self.ingest_inbound(&instance, messages).await;
            },
            WebhookEvent::StatusBatch { instance, updates } => {
                self.apply_statuses(&instance, updates).await;
            },
            WebhookEvent::SendAck {
                queue,
                job_key,
                success,
                error,
                ..
            } => {
                let outcome = if success {
                    Ok(())
                } else {
                    Err(error.unwrap_or_else(|| "send refused by gateway".to_string()))
                };
                if let Err(e) = self.queues.resolve_ack(&queue, &job_key, outcome).await {
                    warn!(queue, job_key, error = %e, "send ack could not be resolved");
                }
            },
        }
    }

    async fn ingest_inbound(&self, instance: &str, items: Vec<InboundItem>) {
        let Some(channel) = self.sessions.channel_for_instance(instance).await else {
            warn!(instance, "inbound batch for unknown instance dropped");
            return;
        };

        for item in items {
            let existing = match self
                .messages
                .get_by_external_id(channel.tenant_id, &item.external_message_id)
                .await
            {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(instance, external_id = %item.external_message_id, error = %e,
                        "inbound lookup failed, item skipped");
                    continue;
                },
            };
            if existing.is_some() {
                debug!(external_id = %item.external_message_id, "inbound message redelivered, ignored");
                continue;
            }

            let message = Message::inbound(
                channel.tenant_id,
                item.chat_id,
                &item.external_message_id,
                item.body,
            );
            if let Err(e) = self.messages.upsert(&message).await {
                warn!(instance, external_id = %item.external_message_id, error = %e,
                    "inbound message could not be persisted");
                continue;
            }

            self.pubsub.publish(PipelineEvent::InboundMessage {
                message_id: message.id,
                chat_id: message.chat_id,
                tenant_id: message.tenant_id,
                channel_id: channel.id,
                preview: message.body.as_deref().map(preview),
            });
        }
    }

    async fn apply_statuses(&self, instance: &str, items: Vec<StatusItem>) {
        let Some(channel) = self.sessions.channel_for_instance(instance).await else {
            warn!(instance, "status batch for unknown instance dropped");
            return;
        };

        for item in items {
            if let Err(e) = self
                .reconciler
                .apply_code(channel.tenant_id, &item.external_message_id, item.code)
                .await
            {
                warn!(instance, external_id = %item.external_message_id, code = item.code,
                    error = %e, "status update failed, item skipped");
            }
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_LEN).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        std::time::Duration,
        tidechat_common::{ChatId, TenantId},
        tidechat_messaging::{MemoryMessageStore, MessageStatus, ReconcilerConfig},
        tidechat_queue::{Completion, Job, JobHandler, JobState, MemoryJobStore, QueueConfig},
        tidechat_sessions::{
            Channel, GatewayClient, MemoryChannelStore, ReconnectBackoff,
            Result as SessionResult,
        },
    };

    struct NoopGateway;

    #[async_trait]
    impl GatewayClient for NoopGateway {
        async fn create_instance(&self, _instance: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn connect(&self, _instance: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn logout(&self, _instance: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn delete_instance(&self, _instance: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn send_text(&self, _i: &str, _to: &str, _text: &str) -> SessionResult<String> {
            Ok("ext-out".into())
        }
        async fn send_audio(&self, _i: &str, _to: &str, _url: &str) -> SessionResult<String> {
            Ok("ext-audio".into())
        }
    }

    struct AckingHandler;

    #[async_trait]
    impl JobHandler for AckingHandler {
        async fn run(&self, _job: &Job) -> anyhow::Result<Completion> {
            Ok(Completion::AwaitAck)
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        messages: Arc<MemoryMessageStore>,
        queues: Arc<JobQueues>,
        pubsub: PubSub,
        channel: Channel,
    }

    async fn fixture() -> Fixture {
        let pubsub = PubSub::default();
        let messages = Arc::new(MemoryMessageStore::new());
        let sessions = SessionManager::new(
            Arc::new(MemoryChannelStore::new()),
            Arc::new(NoopGateway),
            pubsub.clone(),
            ReconnectBackoff::default(),
        );
        let channel = sessions
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        let reconciler = Reconciler::new(
            Arc::clone(&messages) as Arc<dyn MessageStore>,
            pubsub.clone(),
            ReconcilerConfig::default(),
        );
        let queues = JobQueues::new(Arc::new(MemoryJobStore::new()), pubsub.clone());
        let dispatcher = Dispatcher::new(
            sessions,
            reconciler,
            Arc::clone(&messages) as Arc<dyn MessageStore>,
            Arc::clone(&queues),
            pubsub.clone(),
        );
        Fixture {
            dispatcher,
            messages,
            queues,
            pubsub,
            channel,
        }
    }

    fn inbound_item(id: &str, chat_id: ChatId, body: &str) -> InboundItem {
        InboundItem {
            external_message_id: id.into(),
            chat_id,
            body: Some(body.into()),
        }
    }

    #[tokio::test]
    async fn test_inbound_batch_creates_and_publishes() {
        let fx = fixture().await;
        let chat_id = ChatId::new();
        let mut rx = fx.pubsub.subscribe();

        fx.dispatcher
            .dispatch(WebhookEvent::MessageBatch {
                instance: "acme-main".into(),
                messages: vec![
                    inbound_item("ext-1", chat_id, "hello"),
                    inbound_item("ext-2", chat_id, "world"),
                ],
            })
            .await;

        let mut previews = Vec::new();
        while previews.len() < 2 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Ok(PipelineEvent::InboundMessage { preview, .. })) => {
                    previews.push(preview.unwrap_or_default());
                }
                Ok(Ok(_)) => {}
                _ => panic!("expected two inbound message events"),
            }
        }
        assert_eq!(previews, ["hello", "world"]);

        let stored = fx
            .messages
            .get_by_external_id(fx.channel.tenant_id, "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.body.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_inbound_redelivery_is_idempotent() {
        let fx = fixture().await;
        let chat_id = ChatId::new();
        let batch = WebhookEvent::MessageBatch {
            instance: "acme-main".into(),
            messages: vec![inbound_item("ext-1", chat_id, "hello")],
        };

        fx.dispatcher.dispatch(batch.clone()).await;
        let first = fx
            .messages
            .get_by_external_id(fx.channel.tenant_id, "ext-1")
            .await
            .unwrap()
            .unwrap();

        fx.dispatcher.dispatch(batch).await;
        let second = fx
            .messages
            .get_by_external_id(fx.channel.tenant_id, "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_status_batch_applies_per_item() {
        let fx = fixture().await;
        let mut message = Message::outbound(fx.channel.tenant_id, ChatId::new(), "hi");
        message.external_message_id = Some("ext-out-1".into());
        fx.messages.upsert(&message).await.unwrap();

        // The unmapped code in the middle must not block the items after it.
        fx.dispatcher
            .dispatch(WebhookEvent::StatusBatch {
                instance: "acme-main".into(),
                updates: vec![
                    StatusItem {
                        external_message_id: "ext-out-1".into(),
                        code: 2,
                    },
                    StatusItem {
                        external_message_id: "ext-out-1".into(),
                        code: 99,
                    },
                    StatusItem {
                        external_message_id: "ext-out-1".into(),
                        code: 3,
                    },
                ],
            })
            .await;

        let updated = fx
            .messages
            .get(fx.channel.tenant_id, message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, MessageStatus::Delivered);
        assert!(updated.delivered_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_send_ack_settles_awaiting_job() {
        let fx = fixture().await;
        fx.queues
            .register(QueueConfig::new("audio-send"), Arc::new(AckingHandler))
            .await;
        fx.queues.start().await.unwrap();
        fx.queues
            .enqueue("audio-send", "msg-1", serde_json::json!({}))
            .await
            .unwrap();

        // Wait for the handler to leave the job active awaiting its ack.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let job = fx.queues.get("audio-send", "msg-1").await.unwrap();
            if job.is_some_and(|j| j.state == JobState::Active) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never became active");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        fx.dispatcher
            .dispatch(WebhookEvent::SendAck {
                instance: "acme-main".into(),
                queue: "audio-send".into(),
                job_key: "msg-1".into(),
                success: true,
                error: None,
            })
            .await;

        let job = fx.queues.get("audio-send", "msg-1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_unknown_instance_batches_are_dropped() {
        let fx = fixture().await;
        fx.dispatcher
            .dispatch(WebhookEvent::MessageBatch {
                instance: "nobody".into(),
                messages: vec![inbound_item("ext-1", ChatId::new(), "hello")],
            })
            .await;
        assert!(
            fx.messages
                .get_by_external_id(fx.channel.tenant_id, "ext-1")
                .await
                .unwrap()
                .is_none()
        );
    }
}
