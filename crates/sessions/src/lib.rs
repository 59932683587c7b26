//! Session orchestration for channels on the external chat gateway.
//!
//! The session manager owns at most one live gateway session per channel and
//! drives its connection lifecycle. Inbound gateway events are delivered on
//! an ordered per-channel queue consumed by a per-channel worker task, so
//! pairing/connection callbacks never race each other.

pub mod backoff;
pub mod error;
pub mod events;
pub mod gateway;
pub mod manager;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    backoff::ReconnectBackoff,
    error::{Error, Result},
    events::SessionEvent,
    gateway::{GatewayClient, HttpGatewayClient},
    manager::SessionManager,
    store::ChannelStore,
    store_memory::MemoryChannelStore,
    store_sqlite::SqliteChannelStore,
    types::{Channel, ChannelStatus, DisconnectReason},
};

/// Run database migrations for the sessions crate (the `channels` table).
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
