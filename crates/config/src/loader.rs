//! Config file discovery, parsing, and env overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Result, env_subst::substitute_env, schema::TidechatConfig};

const CONFIG_FILE: &str = "tidechat.toml";

/// Load and parse a config file, substituting `${ENV_VAR}` placeholders
/// before parsing so credentials never live in the file itself.
pub fn load_config(path: &Path) -> Result<TidechatConfig> {
    let raw = std::fs::read_to_string(path)?;
    let substituted = substitute_env(&raw);
    let mut config: TidechatConfig = toml::from_str(&substituted)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Find `tidechat.toml` in `./` then `/etc/tidechat/`; fall back to defaults
/// (with env overrides applied) when no file exists.
pub fn discover_and_load() -> TidechatConfig {
    for candidate in search_paths() {
        if candidate.exists() {
            match load_config(&candidate) {
                Ok(config) => {
                    debug!(path = %candidate.display(), "loaded config");
                    return config;
                },
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "ignoring unreadable config");
                },
            }
        }
    }
    let mut config = TidechatConfig::default();
    apply_env_overrides(&mut config);
    config
}

fn search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(CONFIG_FILE),
        PathBuf::from("/etc/tidechat").join(CONFIG_FILE),
    ]
}

/// Apply `TIDECHAT_*` environment overrides on top of the parsed config.
pub fn apply_env_overrides(config: &mut TidechatConfig) {
    if let Ok(bind) = std::env::var("TIDECHAT_BIND") {
        config.server.bind = bind;
    }
    if let Ok(port) = std::env::var("TIDECHAT_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(port, "ignoring invalid TIDECHAT_PORT"),
        }
    }
    if let Ok(url) = std::env::var("TIDECHAT_BROKER_URL") {
        config.broker.database_url = url;
    }
    if let Ok(url) = std::env::var("TIDECHAT_GATEWAY_URL") {
        config.gateway.base_url = url;
    }
    if let Ok(key) = std::env::var("TIDECHAT_GATEWAY_API_KEY") {
        config.gateway.api_key = key;
    }
}
