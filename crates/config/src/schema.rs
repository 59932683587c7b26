//! Config schema types (server, broker, upstream gateway, storage, queues).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TidechatConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub gateway: GatewayUpstreamConfig,
    pub storage: StorageConfig,
    pub queues: QueuesConfig,
    pub provisioning: ProvisioningConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Seconds to wait for in-flight jobs on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8320,
            shutdown_grace_secs: 30,
        }
    }
}

/// Durable job broker store (shared across tenants, not a tenant database).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// SQLite URL for the job store, e.g. `sqlite://tidechat-broker.db`.
    pub database_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tidechat-broker.db?mode=rwc".into(),
        }
    }
}

/// The external chat-protocol gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayUpstreamConfig {
    pub base_url: String,
    /// API key sent as the `apikey` header. Supports `${ENV_VAR}`.
    pub api_key: String,
    pub request_timeout_secs: u64,
}

impl Default for GatewayUpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            api_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Object storage for media attachments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
}

/// Per-queue worker tuning, keyed by queue name; unlisted queues use
/// the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueuesConfig {
    pub default_concurrency: usize,
    pub default_max_attempts: u32,
    pub overrides: HashMap<String, QueueTuning>,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 4,
            default_max_attempts: 3,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueTuning {
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Defaults applied when provisioning a tenant without explicit constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisioningConfig {
    pub default_region: Option<String>,
    pub default_tier: Option<String>,
}
