//! Message rows and the delivery-status reconciler.
//!
//! External delivery codes map to canonical statuses; application is
//! monotonic and idempotent, so reordered or duplicated webhook deliveries
//! can never regress a message.

pub mod error;
pub mod reconciler;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    reconciler::{Applied, Reconciler, ReconcilerConfig},
    store::MessageStore,
    store_memory::MemoryMessageStore,
    store_sqlite::SqliteMessageStore,
    types::{Direction, Message, MessageStatus},
};

/// Run database migrations for a tenant message database.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
