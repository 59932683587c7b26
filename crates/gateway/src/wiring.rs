//! Startup wiring: construct every component from configuration and
//! register the job handlers on their queues.

use {
    anyhow::Context,
    sqlx::sqlite::SqlitePoolOptions,
    std::{path::PathBuf, sync::Arc, time::Duration},
    tidechat_config::TidechatConfig,
    tidechat_ingest::Dispatcher,
    tidechat_messaging::{MessageStore, Reconciler, ReconcilerConfig},
    tidechat_pubsub::PubSub,
    tidechat_queue::{JobQueues, QueueConfig, RetryPolicy, SqliteJobStore, names},
    tidechat_sessions::{
        GatewayClient, HttpGatewayClient, ReconnectBackoff, SessionManager, SqliteChannelStore,
    },
    tidechat_tenancy::{RoutingTable, SqliteTenancyStore},
    tracing::info,
};

use crate::{
    commands::CommandRegistry,
    handlers::{
        AttachmentCleanupHandler, AttachmentOrphanCleanupHandler, AudioSendHandler,
        ChannelSyncHandler, MigrationHandler, ProvisioningHandler, ScheduledSendHandler,
    },
    state::{AppState, AuthzCheck},
    storage::RoutedMessageStore,
};

/// How long orphaned media files survive before the sweep removes them.
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the orphan sweep job is enqueued.
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Build the full application state from configuration.
///
/// Opens the broker pool, runs all platform migrations, loads the routing
/// table, and wires sessions, reconciler, queues, and dispatcher together.
/// Queue worker loops are registered but not started; call
/// [`start_queues`] once the state exists.
pub async fn build_state(
    config: TidechatConfig,
    data_dir: PathBuf,
    authz: AuthzCheck,
) -> anyhow::Result<Arc<AppState>> {
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("creating data directory")?;
    let media_dir = data_dir.join("media");
    tokio::fs::create_dir_all(&media_dir)
        .await
        .context("creating media directory")?;

    let broker_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.broker.database_url)
        .await
        .with_context(|| format!("connecting broker at {}", config.broker.database_url))?;

    tidechat_queue::run_migrations(&broker_pool).await?;
    tidechat_tenancy::run_migrations(&broker_pool).await?;
    tidechat_sessions::run_migrations(&broker_pool).await?;

    let pubsub = PubSub::default();

    let routing = Arc::new(
        RoutingTable::load(Arc::new(SqliteTenancyStore::with_pool(broker_pool.clone()))).await?,
    );

    let gateway: Arc<dyn GatewayClient> = Arc::new(HttpGatewayClient::new(
        &config.gateway.base_url,
        &config.gateway.api_key,
        Duration::from_secs(config.gateway.request_timeout_secs),
    )?);

    let sessions = SessionManager::new(
        Arc::new(SqliteChannelStore::with_pool(broker_pool.clone())),
        Arc::clone(&gateway),
        pubsub.clone(),
        ReconnectBackoff::default(),
    );
    let restored = sessions.restore().await?;
    info!(restored, "session manager ready");

    let messages: Arc<dyn MessageStore> = Arc::new(RoutedMessageStore::new(
        Arc::clone(&routing),
        data_dir.clone(),
    ));

    let reconciler = Reconciler::new(
        Arc::clone(&messages),
        pubsub.clone(),
        ReconcilerConfig::default(),
    );
    reconciler.spawn_retry_loop();

    let queues = JobQueues::new(
        Arc::new(SqliteJobStore::with_pool(broker_pool.clone())),
        pubsub.clone(),
    );

    let dispatcher = Dispatcher::new(
        Arc::clone(&sessions),
        Arc::clone(&reconciler),
        Arc::clone(&messages),
        Arc::clone(&queues),
        pubsub.clone(),
    );

    let state = Arc::new(AppState {
        config,
        broker_pool,
        routing,
        sessions,
        gateway,
        reconciler,
        messages,
        queues,
        dispatcher,
        pubsub,
        authz,
        media_dir,
    });

    register_handlers(&state, &data_dir).await;
    Ok(state)
}

/// Register every named queue with its handler and tuning.
async fn register_handlers(state: &Arc<AppState>, data_dir: &std::path::Path) {
    let register = |name: &'static str| queue_config(&state.config, name);

    state
        .queues
        .register(
            register(names::PROVISIONING),
            Arc::new(ProvisioningHandler {
                routing: Arc::clone(&state.routing),
                pubsub: state.pubsub.clone(),
                default_region: state.config.provisioning.default_region.clone(),
                default_tier: state.config.provisioning.default_tier.clone(),
            }),
        )
        .await;

    state
        .queues
        .register(
            register(names::MIGRATION),
            Arc::new(MigrationHandler {
                routing: Arc::clone(&state.routing),
                data_dir: data_dir.to_path_buf(),
            }),
        )
        .await;

    state
        .queues
        .register(
            register(names::CHANNEL_SYNC),
            Arc::new(ChannelSyncHandler {
                sessions: Arc::clone(&state.sessions),
                gateway: Arc::clone(&state.gateway),
            }),
        )
        .await;

    state
        .queues
        .register(
            register(names::SCHEDULED_SEND),
            Arc::new(ScheduledSendHandler {
                sessions: Arc::clone(&state.sessions),
                gateway: Arc::clone(&state.gateway),
                messages: Arc::clone(&state.messages),
                reconciler: Arc::clone(&state.reconciler),
            }),
        )
        .await;

    state
        .queues
        .register(
            register(names::AUDIO_SEND),
            Arc::new(AudioSendHandler {
                sessions: Arc::clone(&state.sessions),
                gateway: Arc::clone(&state.gateway),
                messages: Arc::clone(&state.messages),
                reconciler: Arc::clone(&state.reconciler),
                queues: Arc::clone(&state.queues),
                media_dir: state.media_dir.clone(),
            }),
        )
        .await;

    state
        .queues
        .register(
            register(names::ATTACHMENT_CLEANUP),
            Arc::new(AttachmentCleanupHandler),
        )
        .await;

    state
        .queues
        .register(
            register(names::ATTACHMENT_ORPHAN_CLEANUP),
            Arc::new(AttachmentOrphanCleanupHandler {
                media_dir: state.media_dir.clone(),
                max_age: ORPHAN_MAX_AGE,
            }),
        )
        .await;

    info!(queues = names::ALL.len(), "job handlers registered");
}

/// Start the queue dispatchers (recovers persisted jobs first), the
/// terminal-failure listener, and the periodic orphan sweep.
pub async fn start_queues(state: &Arc<AppState>) -> anyhow::Result<()> {
    state.queues.start().await?;
    spawn_failure_listener(state);

    let queues = Arc::clone(&state.queues);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ORPHAN_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match queues
                .enqueue(
                    names::ATTACHMENT_ORPHAN_CLEANUP,
                    "sweep",
                    serde_json::json!({}),
                )
                .await
            {
                Ok(_) => {},
                Err(tidechat_queue::Error::ShuttingDown) => break,
                Err(e) => tracing::warn!(error = %e, "orphan sweep enqueue failed"),
            }
        }
    });
    Ok(())
}

/// Surface permanently failed jobs as domain state: a dead send marks its
/// message `failed`, a dead provisioning job marks its tenant `failed`.
fn spawn_failure_listener(state: &Arc<AppState>) {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SendRef {
        channel_id: tidechat_common::ChannelId,
        message_id: tidechat_common::MessageId,
    }

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let mut rx = state.pubsub.subscribe();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "failure listener lagged");
                    continue;
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let tidechat_pubsub::PipelineEvent::JobFailed { queue, job_key, error } = event else {
                continue;
            };

            match queue.as_str() {
                names::SCHEDULED_SEND | names::AUDIO_SEND => {
                    let job = match state.queues.get(&queue, &job_key).await {
                        Ok(Some(job)) => job,
                        _ => continue,
                    };
                    let Ok(send) = serde_json::from_value::<SendRef>(job.payload) else {
                        continue;
                    };
                    let Ok(channel) = state.sessions.get(send.channel_id).await else {
                        continue;
                    };
                    if let Err(e) = state
                        .reconciler
                        .mark_failed(channel.tenant_id, send.message_id)
                        .await
                    {
                        tracing::warn!(message = %send.message_id, error = %e,
                            "could not mark message failed");
                    } else {
                        info!(message = %send.message_id, queue, error, "send permanently failed");
                    }
                },
                names::PROVISIONING => {
                    let Some(slug) = job_key.strip_prefix("provision-") else {
                        continue;
                    };
                    let Some(tenant) = state.routing.find_by_slug(slug).await else {
                        continue;
                    };
                    if let Err(e) = state
                        .routing
                        .set_tenant_status(tenant.id, tidechat_tenancy::TenantStatus::Failed)
                        .await
                    {
                        tracing::warn!(tenant = %tenant.id, error = %e,
                            "could not mark tenant failed");
                    } else {
                        info!(tenant = %tenant.id, error, "provisioning permanently failed");
                    }
                },
                _ => {},
            }
        }
    });
}

/// Default command registry for the gateway's command surface.
#[must_use]
pub fn command_registry() -> Arc<CommandRegistry> {
    Arc::new(CommandRegistry::new())
}

fn queue_config(config: &TidechatConfig, name: &str) -> QueueConfig {
    let queues = &config.queues;
    let tuning = queues.overrides.get(name);

    let defaults = RetryPolicy::default();
    let policy = RetryPolicy {
        max_attempts: tuning
            .and_then(|t| t.max_attempts)
            .unwrap_or(queues.default_max_attempts),
        base_delay_ms: tuning
            .and_then(|t| t.base_delay_ms)
            .unwrap_or(defaults.base_delay_ms),
        max_delay_ms: tuning
            .and_then(|t| t.max_delay_ms)
            .unwrap_or(defaults.max_delay_ms),
    };

    QueueConfig::new(name)
        .with_concurrency(
            tuning
                .and_then(|t| t.concurrency)
                .unwrap_or(queues.default_concurrency),
        )
        .with_policy(policy)
}
