//! Webhook event ingestion and dispatch.
//!
//! Decodes raw gateway webhook bodies into typed [`WebhookEvent`]s and
//! routes each to its owning component: session events onto the per-channel
//! queue, inbound messages into the tenant's message store, status updates
//! through the reconciler, and send acknowledgments back to the job queues.

pub mod dispatcher;
pub mod error;
pub mod event;

pub use {
    dispatcher::Dispatcher,
    error::{Error, Result},
    event::{ConnectionState, InboundItem, StatusItem, WebhookEvent},
};
