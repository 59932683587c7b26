//! Configuration loading, validation, and env substitution.
//!
//! Config file: `tidechat.toml`, searched in `./` then `/etc/tidechat/`.
//! Supports `${ENV_VAR}` substitution in all string values and
//! `TIDECHAT_*` env overrides for the common knobs.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    env_subst::substitute_env,
    loader::{apply_env_overrides, discover_and_load, load_config},
    schema::{
        BrokerConfig, GatewayUpstreamConfig, ProvisioningConfig, QueueTuning, QueuesConfig,
        ServerConfig, StorageConfig, TidechatConfig,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
