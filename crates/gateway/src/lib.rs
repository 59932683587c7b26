//! The tidechat gateway: HTTP intake for webhook events, the typed command
//! service, and the job handlers that do the platform's outbound work.

pub mod commands;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod storage;
pub mod transcode;
pub mod wiring;

pub use {
    commands::{CommandContext, CommandRegistry},
    error::{CommandResponse, ErrorShape, error_codes},
    server::{build_router, start_server},
    state::{AppState, AuthzCheck, allow_all},
    storage::RoutedMessageStore,
    wiring::{build_state, command_registry, start_queues},
};
