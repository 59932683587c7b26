//! Job handlers for the named queues, wired at startup.

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    sqlx::sqlite::SqlitePoolOptions,
    std::{
        path::PathBuf,
        sync::Arc,
        time::{Duration, SystemTime},
    },
    tidechat_common::{ChannelId, MessageId, TenantId},
    tidechat_messaging::{MessageStore, Reconciler},
    tidechat_pubsub::{PipelineEvent, PubSub},
    tidechat_queue::{Completion, Job, JobHandler, JobQueues, names},
    tidechat_sessions::{ChannelStatus, GatewayClient, SessionManager},
    tidechat_tenancy::{HostConstraints, RoutingTable, TenantCreate, TenantStatus},
    tracing::{debug, info, warn},
};

use crate::transcode::transcode_to_opus;

// ── Job payloads ─────────────────────────────────────────────────────────────

/// Payload for `scheduled-send` jobs (and the key material for their dedup).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJobPayload {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub to: String,
    pub text: String,
}

/// Payload for `audio-send` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSendPayload {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub to: String,
    /// Local path of the uploaded source audio, any container format.
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPayload {
    pub tenant_id: TenantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSyncPayload {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
    pub paths: Vec<String>,
}

// ── Provisioning ─────────────────────────────────────────────────────────────

/// Assigns a database host and activates the tenant.
pub struct ProvisioningHandler {
    pub routing: Arc<RoutingTable>,
    pub pubsub: PubSub,
    pub default_region: Option<String>,
    pub default_tier: Option<String>,
}

#[async_trait]
impl JobHandler for ProvisioningHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let create: TenantCreate = serde_json::from_value(job.payload.clone())
            .context("provisioning payload")?;
        let constraints = HostConstraints {
            region: create.region.clone().or_else(|| self.default_region.clone()),
            tier: create.tier.clone().or_else(|| self.default_tier.clone()),
        };

        let tenant = self.routing.assign_host(&create, &constraints).await?;
        let tenant = self
            .routing
            .set_tenant_status(tenant.id, TenantStatus::Active)
            .await?;

        info!(tenant = %tenant.id, slug = %tenant.slug, host = %tenant.host_id, "tenant provisioned");
        self.pubsub.publish(PipelineEvent::TenantStatusChanged {
            tenant_id: tenant.id,
            status: "active".to_string(),
        });
        Ok(Completion::Done)
    }
}

// ── Migration ────────────────────────────────────────────────────────────────

/// Runs tenant schema migrations on the tenant's own database.
pub struct MigrationHandler {
    pub routing: Arc<RoutingTable>,
    pub data_dir: PathBuf,
}

#[async_trait]
impl JobHandler for MigrationHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let payload: MigrationPayload =
            serde_json::from_value(job.payload.clone()).context("migration payload")?;
        let params = self.routing.resolve_connection(payload.tenant_id).await?;

        let db_path = self.data_dir.join(format!("{}.db", params.database_name));
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .with_context(|| format!("opening tenant database {}", params.database_name))?;

        tidechat_messaging::run_migrations(&pool).await?;
        pool.close().await;

        info!(tenant = %payload.tenant_id, database = %params.database_name, "tenant migrated");
        Ok(Completion::Done)
    }
}

// ── Channel sync ─────────────────────────────────────────────────────────────

/// Re-registers a channel's instance with the external gateway so the
/// gateway-side state matches ours after drift or gateway restarts.
pub struct ChannelSyncHandler {
    pub sessions: Arc<SessionManager>,
    pub gateway: Arc<dyn GatewayClient>,
}

#[async_trait]
impl JobHandler for ChannelSyncHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let payload: ChannelSyncPayload =
            serde_json::from_value(job.payload.clone()).context("channel-sync payload")?;
        let channel = self.sessions.get(payload.channel_id).await?;

        // Instance creation is idempotent upstream.
        self.gateway
            .create_instance(&channel.external_instance_name)
            .await?;
        debug!(channel = %channel.id, instance = %channel.external_instance_name, "channel synced");
        Ok(Completion::Done)
    }
}

// ── Scheduled send ───────────────────────────────────────────────────────────

/// Sends a text message whose job became eligible (scheduled messages ride
/// the queue machinery as delayed jobs).
pub struct ScheduledSendHandler {
    pub sessions: Arc<SessionManager>,
    pub gateway: Arc<dyn GatewayClient>,
    pub messages: Arc<dyn MessageStore>,
    pub reconciler: Arc<Reconciler>,
}

#[async_trait]
impl JobHandler for ScheduledSendHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let payload: SendJobPayload =
            serde_json::from_value(job.payload.clone()).context("send payload")?;
        let channel = self.sessions.get(payload.channel_id).await?;
        if channel.status != ChannelStatus::Connected {
            bail!("channel {} is {}", channel.id, channel.status.as_str());
        }

        let external_id = self
            .gateway
            .send_text(&channel.external_instance_name, &payload.to, &payload.text)
            .await?;

        attach_external_id(
            &*self.messages,
            &self.reconciler,
            channel.tenant_id,
            payload.message_id,
            &external_id,
        )
        .await?;
        Ok(Completion::Done)
    }
}

// ── Audio send ───────────────────────────────────────────────────────────────

/// Transcodes source audio to Opus and submits it to the gateway. The job
/// stays active until the gateway's send acknowledgment settles it.
pub struct AudioSendHandler {
    pub sessions: Arc<SessionManager>,
    pub gateway: Arc<dyn GatewayClient>,
    pub messages: Arc<dyn MessageStore>,
    pub reconciler: Arc<Reconciler>,
    pub queues: Arc<JobQueues>,
    pub media_dir: PathBuf,
}

#[async_trait]
impl JobHandler for AudioSendHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let payload: AudioSendPayload =
            serde_json::from_value(job.payload.clone()).context("audio-send payload")?;
        let channel = self.sessions.get(payload.channel_id).await?;
        if channel.status != ChannelStatus::Connected {
            bail!("channel {} is {}", channel.id, channel.status.as_str());
        }

        let output = self.media_dir.join(format!("{}.ogg", payload.message_id));
        transcode_to_opus(payload.source_path.as_ref(), &output).await?;

        // The media directory is shared with the gateway container.
        let external_id = self
            .gateway
            .send_audio(
                &channel.external_instance_name,
                &payload.to,
                &output.display().to_string(),
            )
            .await?;

        attach_external_id(
            &*self.messages,
            &self.reconciler,
            channel.tenant_id,
            payload.message_id,
            &external_id,
        )
        .await?;

        // The transcode output is no longer needed once the gateway has it.
        let cleanup = CleanupPayload {
            paths: vec![
                payload.source_path.clone(),
                output.display().to_string(),
            ],
        };
        if let Err(e) = self
            .queues
            .enqueue(
                names::ATTACHMENT_CLEANUP,
                &format!("audio-artifacts-{}", payload.message_id),
                serde_json::to_value(&cleanup)?,
            )
            .await
        {
            warn!(message = %payload.message_id, error = %e, "cleanup enqueue failed");
        }

        Ok(Completion::AwaitAck)
    }
}

// ── Attachment cleanup ───────────────────────────────────────────────────────

/// Deletes the exact files named in the payload.
pub struct AttachmentCleanupHandler;

#[async_trait]
impl JobHandler for AttachmentCleanupHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<Completion> {
        let payload: CleanupPayload =
            serde_json::from_value(job.payload.clone()).context("cleanup payload")?;
        for path in &payload.paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path, "attachment removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path, error = %e, "attachment removal failed"),
            }
        }
        Ok(Completion::Done)
    }
}

/// Sweeps the media directory for stale files left behind by interrupted
/// sends (process crash between transcode and cleanup).
pub struct AttachmentOrphanCleanupHandler {
    pub media_dir: PathBuf,
    pub max_age: Duration,
}

#[async_trait]
impl JobHandler for AttachmentOrphanCleanupHandler {
    async fn run(&self, _job: &Job) -> anyhow::Result<Completion> {
        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&self.media_dir)
            .await
            .context("reading media directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .is_some_and(|age| age > self.max_age);
            if stale {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "orphan removal failed"),
                }
            }
        }
        if removed > 0 {
            info!(removed, "orphaned attachments swept");
        }
        Ok(Completion::Done)
    }
}

// ── Shared ───────────────────────────────────────────────────────────────────

/// Record the gateway's message id on the row and advance it to `sent`
/// through the reconciler.
async fn attach_external_id(
    messages: &dyn MessageStore,
    reconciler: &Reconciler,
    tenant_id: TenantId,
    message_id: MessageId,
    external_id: &str,
) -> anyhow::Result<()> {
    let mut message = messages
        .get(tenant_id, message_id)
        .await?
        .with_context(|| format!("message {message_id} missing for send"))?;
    message.external_message_id = Some(external_id.to_string());
    message.updated_at_ms = tidechat_common::now_ms();
    messages.upsert(&message).await?;

    // Code 2 is the gateway's "sent" delivery code.
    reconciler.apply_code(tenant_id, external_id, 2).await?;
    Ok(())
}
