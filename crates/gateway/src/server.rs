//! HTTP surface: webhook intake, health, and the command service.

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
    },
    std::{future::Future, sync::Arc, time::Duration},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use tidechat_ingest::WebhookEvent;

use crate::{
    commands::{CommandContext, CommandRegistry},
    error::error_codes,
    state::AppState,
};

#[derive(Clone)]
struct AppCtx {
    state: Arc<AppState>,
    commands: Arc<CommandRegistry>,
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_router(state: Arc<AppState>, commands: Arc<CommandRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/{provider}", post(webhook_handler))
        .route("/commands/{method}", post(command_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppCtx { state, commands })
}

/// Serve until `shutdown` resolves, then drain: stop job intake, wait for
/// in-flight jobs up to the grace period, close every live session, and
/// release the broker pool.
pub async fn start_server(
    state: Arc<AppState>,
    commands: Arc<CommandRegistry>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.bind, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gateway listening");

    let app = build_router(Arc::clone(&state), commands);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("shutting down");
    let grace = Duration::from_secs(state.config.server.shutdown_grace_secs);
    state.queues.drain(grace).await;
    state.sessions.close_all().await;
    state.broker_pool.close().await;
    info!("shutdown complete");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Webhook intake. Decodes just enough to classify the event, then hands it
/// to the dispatcher on a spawned task so the gateway sees a 200 fast.
async fn webhook_handler(
    State(ctx): State<AppCtx>,
    Path(provider): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    match WebhookEvent::decode(&body) {
        Ok(event) => {
            let dispatcher = Arc::clone(&ctx.state.dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(event).await;
            });
            (StatusCode::OK, Json(serde_json::json!({ "accepted": true })))
        },
        Err(e) => {
            warn!(provider, error = %e, "webhook rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "accepted": false, "error": e.to_string() })),
            )
        },
    }
}

async fn health_handler(State(ctx): State<AppCtx>) -> impl IntoResponse {
    let broker_ok = sqlx::query("SELECT 1")
        .execute(&ctx.state.broker_pool)
        .await
        .is_ok();

    let status = if broker_ok { "healthy" } else { "degraded" };
    let code = if broker_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "status": status,
            "dependencies": {
                "broker": if broker_ok { "ok" } else { "error" },
            },
            "subscribers": ctx.state.pubsub.subscriber_count(),
        })),
    )
}

async fn command_handler(
    State(ctx): State<AppCtx>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(params): Json<serde_json::Value>,
) -> impl IntoResponse {
    let actor = headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let response = ctx
        .commands
        .dispatch(CommandContext {
            method,
            actor,
            params,
            state: Arc::clone(&ctx.state),
        })
        .await;

    let code = match &response.error {
        None => StatusCode::OK,
        Some(err) if err.code == error_codes::NOT_FOUND => StatusCode::NOT_FOUND,
        Some(err) if err.code == error_codes::UNAUTHORIZED => StatusCode::FORBIDDEN,
        Some(err) if err.code == error_codes::INVALID_PARAMS => StatusCode::BAD_REQUEST,
        Some(err) if err.code == error_codes::UNAVAILABLE => StatusCode::CONFLICT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(response))
}
