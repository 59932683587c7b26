//! Delivery-status reconciliation.
//!
//! External delivery codes: 2 → sent, 3 → delivered, 4 → read. Everything
//! else (including 1 "pending" and 5 "played") is logged and ignored. A
//! status is applied only if it is strictly later in the ordering
//! `pending < sent < delivered < read`; `failed` applies from any
//! non-terminal status. Stale or duplicate updates are discarded, which is
//! what makes reconciliation idempotent under webhook redelivery.

use std::{sync::Arc, time::Duration};

use {
    tidechat_common::{MessageId, TenantId, now_ms},
    tidechat_pubsub::{PipelineEvent, PubSub},
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    store::MessageStore,
    types::{Message, MessageStatus},
};

/// Map an external delivery code to a canonical status.
#[must_use]
pub fn status_for_code(code: i64) -> Option<MessageStatus> {
    match code {
        2 => Some(MessageStatus::Sent),
        3 => Some(MessageStatus::Delivered),
        4 => Some(MessageStatus::Read),
        _ => None,
    }
}

/// Outcome of applying one status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The message advanced to the new status.
    Applied(MessageStatus),
    /// Duplicate or out-of-order update; discarded.
    Stale,
    /// Unmapped delivery code; logged only.
    Ignored,
    /// The referenced message is not persisted yet; queued for retry.
    Parked,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How many times a parked update is retried before being dropped.
    pub max_park_attempts: u32,
    /// Delay between parked-update retry passes.
    pub park_retry_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_park_attempts: 5,
            park_retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
struct ParkedUpdate {
    tenant_id: TenantId,
    external_id: String,
    code: i64,
    attempts: u32,
}

/// The message status reconciler. Sole mutator of message delivery state.
pub struct Reconciler {
    store: Arc<dyn MessageStore>,
    pubsub: PubSub,
    config: ReconcilerConfig,
    parked: Mutex<Vec<ParkedUpdate>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, pubsub: PubSub, config: ReconcilerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            pubsub,
            config,
            parked: Mutex::new(Vec::new()),
        })
    }

    /// Apply an external delivery code to the message carrying this external
    /// id. Unknown messages are parked and retried by the retry loop.
    pub async fn apply_code(
        &self,
        tenant_id: TenantId,
        external_id: &str,
        code: i64,
    ) -> Result<Applied> {
        let Some(new_status) = status_for_code(code) else {
            debug!(tenant = %tenant_id, external_id, code, "unmapped delivery code ignored");
            return Ok(Applied::Ignored);
        };

        match self.store.get_by_external_id(tenant_id, external_id).await? {
            Some(message) => self.apply(message, new_status).await,
            None => {
                debug!(tenant = %tenant_id, external_id, code, "message not yet persisted, parking update");
                self.parked.lock().await.push(ParkedUpdate {
                    tenant_id,
                    external_id: external_id.to_string(),
                    code,
                    attempts: 0,
                });
                Ok(Applied::Parked)
            },
        }
    }

    /// Move a message to `failed` (e.g. a send job exhausted its retries).
    /// No-op if the message is already terminal.
    pub async fn mark_failed(&self, tenant_id: TenantId, message_id: MessageId) -> Result<Applied> {
        let message = self
            .store
            .get(tenant_id, message_id)
            .await?
            .ok_or_else(|| crate::Error::message_not_found(message_id))?;
        self.apply(message, MessageStatus::Failed).await
    }

    /// The monotonic application rule.
    async fn apply(&self, mut message: Message, new_status: MessageStatus) -> Result<Applied> {
        let advances = match (new_status.rank(), message.status.rank()) {
            // Happy-path statuses only ever move forward.
            (Some(new), Some(current)) => new > current,
            // Failed applies from any non-terminal status.
            (None, _) => !message.status.is_terminal(),
            // Nothing applies on top of failed.
            (Some(_), None) => false,
        };

        if !advances {
            debug!(
                message = %message.id,
                current = message.status.as_str(),
                update = new_status.as_str(),
                "stale status update discarded"
            );
            return Ok(Applied::Stale);
        }

        let now = now_ms();
        message.status = new_status;
        message.updated_at_ms = now;
        match new_status {
            MessageStatus::Delivered => message.delivered_at_ms = Some(now),
            MessageStatus::Read => {
                // A read implies delivery even when code 3 never arrived.
                if message.delivered_at_ms.is_none() {
                    message.delivered_at_ms = Some(now);
                }
                message.read_at_ms = Some(now);
            },
            _ => {},
        }

        self.store.upsert(&message).await?;
        self.pubsub.publish(PipelineEvent::MessageStatusChanged {
            message_id: message.id,
            chat_id: message.chat_id,
            tenant_id: message.tenant_id,
            status: new_status.as_str().to_string(),
        });
        Ok(Applied::Applied(new_status))
    }

    /// One retry pass over parked updates. Updates that still miss their
    /// message go back with an incremented attempt count until the bound.
    pub async fn retry_parked(&self) {
        let pending = std::mem::take(&mut *self.parked.lock().await);
        if pending.is_empty() {
            return;
        }

        let mut still_parked = Vec::new();
        for mut update in pending {
            let found = self
                .store
                .get_by_external_id(update.tenant_id, &update.external_id)
                .await;
            match found {
                Ok(Some(message)) => {
                    if let Some(status) = status_for_code(update.code) {
                        if let Err(e) = self.apply(message, status).await {
                            warn!(external_id = %update.external_id, error = %e,
                                "failed to apply parked status update");
                        }
                    }
                },
                Ok(None) | Err(_) => {
                    update.attempts += 1;
                    if update.attempts >= self.config.max_park_attempts {
                        warn!(
                            external_id = %update.external_id,
                            attempts = update.attempts,
                            "dropping parked status update, message never appeared"
                        );
                    } else {
                        still_parked.push(update);
                    }
                },
            }
        }

        if !still_parked.is_empty() {
            self.parked.lock().await.extend(still_parked);
        }
    }

    /// Number of currently parked updates.
    pub async fn parked_len(&self) -> usize {
        self.parked.lock().await.len()
    }

    /// Spawn the parked-update retry loop.
    pub fn spawn_retry_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        let delay = reconciler.config.park_retry_delay;
        info!(delay_ms = delay.as_millis() as u64, "starting parked-update retry loop");
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                reconciler.retry_parked().await;
            }
        })
    }
}
