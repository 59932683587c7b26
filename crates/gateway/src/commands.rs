//! Typed command service consumed over `POST /commands/{method}`.
//!
//! Each command is either an enqueue into the job queues or a direct state
//! mutation. Authorization is an injected opaque `(actor, action)` check;
//! the gateway holds no identity model of its own.

use {
    serde::Deserialize,
    std::{collections::HashMap, future::Future, pin::Pin, sync::Arc},
    tidechat_common::{ChannelId, ChatId, TenantId, now_ms},
    tidechat_messaging::Message,
    tidechat_queue::{EnqueueOutcome, names},
    tidechat_sessions::ChannelStatus,
    tracing::{debug, warn},
};

use crate::{
    error::{CommandResponse, ErrorShape, error_codes},
    handlers::SendJobPayload,
    state::AppState,
};

/// Context passed to every command handler.
pub struct CommandContext {
    pub method: String,
    pub actor: String,
    pub params: serde_json::Value,
    pub state: Arc<AppState>,
}

pub type CommandResult = Result<serde_json::Value, ErrorShape>;

/// A boxed async command handler.
pub type HandlerFn =
    Box<dyn Fn(CommandContext) -> Pin<Box<dyn Future<Output = CommandResult> + Send>> + Send + Sync>;

pub struct CommandRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse<T: for<'de> Deserialize<'de>>(params: serde_json::Value) -> Result<T, ErrorShape> {
    serde_json::from_value(params).map_err(ErrorShape::invalid_params)
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register_channel_commands();
        registry.register_tenant_commands();
        registry.register_scheduling_commands();
        registry
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, ctx: CommandContext) -> CommandResponse {
        let method = ctx.method.clone();
        let actor = ctx.actor.clone();

        if !(ctx.state.authz)(&actor, &method) {
            warn!(method, actor, "command denied");
            return CommandResponse::err(ErrorShape::new(
                error_codes::UNAUTHORIZED,
                format!("{actor} may not call {method}"),
            ));
        }

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, "unknown command");
            return CommandResponse::err(ErrorShape::new(
                error_codes::NOT_FOUND,
                format!("unknown command: {method}"),
            ));
        };

        debug!(method, actor, "dispatching command");
        match handler(ctx).await {
            Ok(payload) => CommandResponse::ok(payload),
            Err(err) => {
                warn!(method, code = %err.code, message = %err.message, "command failed");
                CommandResponse::err(err)
            },
        }
    }

    // ── Channel commands ─────────────────────────────────────────────────

    fn register_channel_commands(&mut self) {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateParams {
            tenant_id: TenantId,
            instance_name: String,
        }

        self.register(
            "channel.create",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: CreateParams = parse(ctx.params)?;
                    // The tenant must exist and be usable before it gets a
                    // channel.
                    let tenant = ctx
                        .state
                        .routing
                        .get_tenant(params.tenant_id)
                        .await
                        .map_err(|e| ErrorShape::new(error_codes::NOT_FOUND, e.to_string()))?;
                    if tenant.status != tidechat_tenancy::TenantStatus::Active {
                        return Err(ErrorShape::new(
                            error_codes::UNAVAILABLE,
                            format!("tenant {} is not active", tenant.id),
                        ));
                    }

                    let channel = ctx
                        .state
                        .sessions
                        .create_channel(params.tenant_id, params.instance_name)
                        .await
                        .map_err(ErrorShape::internal)?;
                    serde_json::to_value(&channel).map_err(ErrorShape::internal)
                })
            }),
        );

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ChannelParams {
            channel_id: ChannelId,
        }

        self.register(
            "channel.connect",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ChannelParams = parse(ctx.params)?;
                    ctx.state
                        .sessions
                        .open(params.channel_id)
                        .await
                        .map_err(session_error)?;
                    Ok(serde_json::json!({ "channelId": params.channel_id, "opened": true }))
                })
            }),
        );

        self.register(
            "channel.delete",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ChannelParams = parse(ctx.params)?;
                    ctx.state
                        .sessions
                        .terminate(params.channel_id)
                        .await
                        .map_err(session_error)?;
                    Ok(serde_json::json!({ "channelId": params.channel_id, "terminated": true }))
                })
            }),
        );

        // Pull-side view for dashboards that missed the broadcast: the
        // channel record plus the most recent pairing artifact, if any.
        self.register(
            "channel.status",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ChannelParams = parse(ctx.params)?;
                    let channel = ctx
                        .state
                        .sessions
                        .get(params.channel_id)
                        .await
                        .map_err(session_error)?;
                    let artifact = ctx.state.sessions.pairing_artifact(params.channel_id).await;
                    Ok(serde_json::json!({
                        "channel": channel,
                        "pairingArtifact": artifact,
                    }))
                })
            }),
        );

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TestMessageParams {
            channel_id: ChannelId,
            to: String,
            text: String,
            chat_id: Option<ChatId>,
        }

        // Sends immediately, bypassing the queues: operators use this to
        // verify a freshly paired channel end to end.
        self.register(
            "channel.send_test_message",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: TestMessageParams = parse(ctx.params)?;
                    let channel = ctx
                        .state
                        .sessions
                        .get(params.channel_id)
                        .await
                        .map_err(session_error)?;
                    if channel.status != ChannelStatus::Connected {
                        return Err(ErrorShape::new(
                            error_codes::UNAVAILABLE,
                            format!("channel is {}", channel.status.as_str()),
                        ));
                    }

                    let chat_id = params.chat_id.unwrap_or_else(ChatId::new);
                    let message = Message::outbound(channel.tenant_id, chat_id, &params.text);
                    ctx.state
                        .messages
                        .upsert(&message)
                        .await
                        .map_err(ErrorShape::internal)?;

                    let external_id = ctx
                        .state
                        .gateway
                        .send_text(&channel.external_instance_name, &params.to, &params.text)
                        .await
                        .map_err(ErrorShape::internal)?;

                    let mut sent = message.clone();
                    sent.external_message_id = Some(external_id.clone());
                    sent.updated_at_ms = now_ms();
                    ctx.state
                        .messages
                        .upsert(&sent)
                        .await
                        .map_err(ErrorShape::internal)?;
                    ctx.state
                        .reconciler
                        .apply_code(channel.tenant_id, &external_id, 2)
                        .await
                        .map_err(ErrorShape::internal)?;

                    Ok(serde_json::json!({
                        "messageId": message.id,
                        "externalMessageId": external_id,
                    }))
                })
            }),
        );
    }

    // ── Tenant commands ──────────────────────────────────────────────────

    fn register_tenant_commands(&mut self) {
        self.register(
            "tenant.provision",
            Box::new(|ctx| {
                Box::pin(async move {
                    let create: tidechat_tenancy::TenantCreate = parse(ctx.params)?;
                    if create.slug.is_empty() {
                        return Err(ErrorShape::invalid_params("slug must not be empty"));
                    }
                    let key = format!("provision-{}", create.slug);
                    let outcome = ctx
                        .state
                        .queues
                        .enqueue(
                            names::PROVISIONING,
                            &key,
                            serde_json::to_value(&create).map_err(ErrorShape::internal)?,
                        )
                        .await
                        .map_err(ErrorShape::internal)?;
                    Ok(serde_json::json!({
                        "jobKey": key,
                        "outcome": outcome_str(outcome),
                    }))
                })
            }),
        );
    }

    // ── Scheduled messages ───────────────────────────────────────────────

    fn register_scheduling_commands(&mut self) {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ScheduleParams {
            channel_id: ChannelId,
            to: String,
            text: String,
            send_at_ms: u64,
            chat_id: Option<ChatId>,
        }

        self.register(
            "scheduled_messages.create",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ScheduleParams = parse(ctx.params)?;
                    let channel = ctx
                        .state
                        .sessions
                        .get(params.channel_id)
                        .await
                        .map_err(session_error)?;

                    let chat_id = params.chat_id.unwrap_or_else(ChatId::new);
                    let message = Message::outbound(channel.tenant_id, chat_id, &params.text);
                    ctx.state
                        .messages
                        .upsert(&message)
                        .await
                        .map_err(ErrorShape::internal)?;

                    let payload = SendJobPayload {
                        channel_id: channel.id,
                        message_id: message.id,
                        to: params.to,
                        text: params.text,
                    };
                    let key = format!("scheduled-{}", message.id);
                    let outcome = ctx
                        .state
                        .queues
                        .enqueue_at(
                            names::SCHEDULED_SEND,
                            &key,
                            serde_json::to_value(&payload).map_err(ErrorShape::internal)?,
                            params.send_at_ms,
                        )
                        .await
                        .map_err(ErrorShape::internal)?;

                    Ok(serde_json::json!({
                        "messageId": message.id,
                        "jobKey": key,
                        "outcome": outcome_str(outcome),
                    }))
                })
            }),
        );

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CancelParams {
            job_key: String,
        }

        self.register(
            "scheduled_messages.cancel",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: CancelParams = parse(ctx.params)?;
                    let cancelled = ctx
                        .state
                        .queues
                        .cancel(names::SCHEDULED_SEND, &params.job_key)
                        .await
                        .map_err(ErrorShape::internal)?;
                    Ok(serde_json::json!({ "jobKey": params.job_key, "cancelled": cancelled }))
                })
            }),
        );
    }
}

fn outcome_str(outcome: EnqueueOutcome) -> &'static str {
    match outcome {
        EnqueueOutcome::Accepted => "accepted",
        EnqueueOutcome::Deduped => "deduped",
    }
}

fn session_error(err: tidechat_sessions::Error) -> ErrorShape {
    use tidechat_sessions::Error as E;
    match &err {
        E::ChannelNotFound { .. } => ErrorShape::new(error_codes::NOT_FOUND, err.to_string()),
        E::AlreadyOpen { .. } | E::Terminated { .. } => {
            ErrorShape::new(error_codes::UNAVAILABLE, err.to_string())
        },
        _ => ErrorShape::internal(err),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::state::allow_all,
        async_trait::async_trait,
        sqlx::sqlite::SqlitePoolOptions,
        tidechat_messaging::{MemoryMessageStore, MessageStore, Reconciler, ReconcilerConfig},
        tidechat_pubsub::PubSub,
        tidechat_queue::{
            Completion, Job, JobHandler, JobQueues, JobState, MemoryJobStore, QueueConfig,
        },
        tidechat_sessions::{
            GatewayClient, MemoryChannelStore, ReconnectBackoff, Result as SessionResult,
            SessionManager,
        },
        tidechat_tenancy::{
            DatabaseHost, HostConstraints, HostStatus, MemoryTenancyStore, RoutingTable,
            TenantCreate, TenantStatus,
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
            Ok("ext-test".into())
        }
        async fn send_audio(&self, _i: &str, _to: &str, _url: &str) -> SessionResult<String> {
            Ok("ext-audio".into())
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn run(&self, _job: &Job) -> anyhow::Result<Completion> {
            Ok(Completion::Done)
        }
    }

    async fn fixture(authz: crate::state::AuthzCheck) -> Arc<AppState> {
        let pubsub = PubSub::default();
        let broker_pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let routing = Arc::new(
            RoutingTable::load(Arc::new(MemoryTenancyStore::new()))
                .await
                .unwrap(),
        );
        let gateway: Arc<dyn GatewayClient> = Arc::new(NoopGateway);
        let sessions = SessionManager::new(
            Arc::new(MemoryChannelStore::new()),
            Arc::clone(&gateway),
            pubsub.clone(),
            ReconnectBackoff::default(),
        );
        let messages: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let reconciler = Reconciler::new(
            Arc::clone(&messages),
            pubsub.clone(),
            ReconcilerConfig::default(),
        );
        let queues = JobQueues::new(Arc::new(MemoryJobStore::new()), pubsub.clone());
        queues
            .register(QueueConfig::new(names::PROVISIONING), Arc::new(NoopHandler))
            .await;
        queues
            .register(QueueConfig::new(names::SCHEDULED_SEND), Arc::new(NoopHandler))
            .await;
        let dispatcher = tidechat_ingest::Dispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&reconciler),
            Arc::clone(&messages),
            Arc::clone(&queues),
            pubsub.clone(),
        );
        Arc::new(AppState {
            config: tidechat_config::TidechatConfig::default(),
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
            media_dir: std::env::temp_dir(),
        })
    }

    async fn active_tenant(state: &AppState) -> TenantId {
        state
            .routing
            .register_host(DatabaseHost {
                id: tidechat_common::HostId::new(),
                address: "db.internal".into(),
                port: 5432,
                region: None,
                tier: None,
                max_tenants: 8,
                disk_capacity_gb: 64,
                is_default: true,
                status: HostStatus::Active,
            })
            .await
            .unwrap();
        let tenant = state
            .routing
            .assign_host(
                &TenantCreate {
                    slug: "acme".into(),
                    region: None,
                    tier: None,
                },
                &HostConstraints::default(),
            )
            .await
            .unwrap();
        state
            .routing
            .set_tenant_status(tenant.id, TenantStatus::Active)
            .await
            .unwrap()
            .id
    }

    async fn call(
        state: &Arc<AppState>,
        registry: &CommandRegistry,
        method: &str,
        params: serde_json::Value,
    ) -> CommandResponse {
        registry
            .dispatch(CommandContext {
                method: method.to_string(),
                actor: "test-operator".to_string(),
                params,
                state: Arc::clone(state),
            })
            .await
    }

    #[tokio::test]
    async fn test_channel_create_requires_active_tenant() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();

        let missing = call(
            &state,
            &registry,
            "channel.create",
            serde_json::json!({ "tenantId": TenantId::new(), "instanceName": "x" }),
        )
        .await;
        assert_eq!(missing.error.unwrap().code, error_codes::NOT_FOUND);

        let tenant_id = active_tenant(&state).await;
        let created = call(
            &state,
            &registry,
            "channel.create",
            serde_json::json!({ "tenantId": tenant_id, "instanceName": "acme-main" }),
        )
        .await;
        assert!(created.ok, "{:?}", created.error);
        let payload = created.payload.unwrap();
        assert_eq!(payload["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_unknown_command_and_denied_actor() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();
        let unknown = call(&state, &registry, "nope.nothing", serde_json::json!({})).await;
        assert_eq!(unknown.error.unwrap().code, error_codes::NOT_FOUND);

        let state = fixture(Arc::new(|_actor, _action| false)).await;
        let denied = call(&state, &registry, "channel.connect", serde_json::json!({})).await;
        assert_eq!(denied.error.unwrap().code, error_codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_send_test_message_requires_connected_channel() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();
        let tenant_id = active_tenant(&state).await;
        let channel = state
            .sessions
            .create_channel(tenant_id, "acme-main")
            .await
            .unwrap();

        let refused = call(
            &state,
            &registry,
            "channel.send_test_message",
            serde_json::json!({ "channelId": channel.id, "to": "+15550001111", "text": "hi" }),
        )
        .await;
        assert_eq!(refused.error.unwrap().code, error_codes::UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_undecodable_params_are_invalid_params() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();

        let missing_field = call(&state, &registry, "channel.connect", serde_json::json!({})).await;
        assert_eq!(
            missing_field.error.unwrap().code,
            error_codes::INVALID_PARAMS
        );

        let wrong_type = call(
            &state,
            &registry,
            "channel.connect",
            serde_json::json!({ "channelId": 42 }),
        )
        .await;
        let err = wrong_type.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn test_channel_status_reports_record_without_artifact() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();
        let tenant_id = active_tenant(&state).await;
        let channel = state
            .sessions
            .create_channel(tenant_id, "acme-main")
            .await
            .unwrap();

        let status = call(
            &state,
            &registry,
            "channel.status",
            serde_json::json!({ "channelId": channel.id }),
        )
        .await;
        assert!(status.ok, "{:?}", status.error);
        let payload = status.payload.unwrap();
        assert_eq!(payload["channel"]["status"], "disconnected");
        assert!(payload["pairingArtifact"].is_null());

        let missing = call(
            &state,
            &registry,
            "channel.status",
            serde_json::json!({ "channelId": ChannelId::new() }),
        )
        .await;
        assert_eq!(missing.error.unwrap().code, error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scheduled_message_create_then_cancel() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();
        let tenant_id = active_tenant(&state).await;
        let channel = state
            .sessions
            .create_channel(tenant_id, "acme-main")
            .await
            .unwrap();

        let created = call(
            &state,
            &registry,
            "scheduled_messages.create",
            serde_json::json!({
                "channelId": channel.id,
                "to": "+15550001111",
                "text": "later",
                "sendAtMs": now_ms() + 60_000,
            }),
        )
        .await;
        assert!(created.ok, "{:?}", created.error);
        let payload = created.payload.unwrap();
        let job_key = payload["jobKey"].as_str().unwrap().to_string();
        assert_eq!(payload["outcome"], "accepted");

        let job = state
            .queues
            .get(names::SCHEDULED_SEND, &job_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Delayed);

        // The pending message row exists already.
        let message_id: tidechat_common::MessageId =
            serde_json::from_value(payload["messageId"].clone()).unwrap();
        assert!(
            state
                .messages
                .get(tenant_id, message_id)
                .await
                .unwrap()
                .is_some()
        );

        let cancelled = call(
            &state,
            &registry,
            "scheduled_messages.cancel",
            serde_json::json!({ "jobKey": job_key }),
        )
        .await;
        assert_eq!(cancelled.payload.unwrap()["cancelled"], true);
        assert!(
            state
                .queues
                .get(names::SCHEDULED_SEND, &job_key)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_tenant_provision_enqueues_with_dedup() {
        let state = fixture(allow_all()).await;
        let registry = CommandRegistry::new();

        let first = call(
            &state,
            &registry,
            "tenant.provision",
            serde_json::json!({ "slug": "acme" }),
        )
        .await;
        assert_eq!(first.payload.unwrap()["outcome"], "accepted");

        let second = call(
            &state,
            &registry,
            "tenant.provision",
            serde_json::json!({ "slug": "acme" }),
        )
        .await;
        assert_eq!(second.payload.unwrap()["outcome"], "deduped");
    }
}
