//! Shared application state wired at startup.

use {
    sqlx::SqlitePool,
    std::{path::PathBuf, sync::Arc},
    tidechat_config::TidechatConfig,
    tidechat_ingest::Dispatcher,
    tidechat_messaging::{MessageStore, Reconciler},
    tidechat_pubsub::PubSub,
    tidechat_queue::JobQueues,
    tidechat_sessions::{GatewayClient, SessionManager},
    tidechat_tenancy::RoutingTable,
};

/// Opaque authorization check: `(actor, action) -> allowed`.
///
/// The gateway does not own identity; a collaborator injects the policy.
pub type AuthzCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub struct AppState {
    pub config: TidechatConfig,
    /// Broker database pool (jobs and platform tables, not tenant data).
    pub broker_pool: SqlitePool,
    pub routing: Arc<RoutingTable>,
    pub sessions: Arc<SessionManager>,
    pub gateway: Arc<dyn GatewayClient>,
    pub reconciler: Arc<Reconciler>,
    pub messages: Arc<dyn MessageStore>,
    pub queues: Arc<JobQueues>,
    pub dispatcher: Arc<Dispatcher>,
    pub pubsub: PubSub,
    pub authz: AuthzCheck,
    /// Scratch space for media transcodes and attachment staging.
    pub media_dir: PathBuf,
}

/// An authz check that allows every actor. For tests and single-operator
/// deployments without an injected policy.
#[must_use]
pub fn allow_all() -> AuthzCheck {
    Arc::new(|_actor, _action| true)
}
