use {thiserror::Error, tidechat_common::TenantId};

use crate::types::TenantStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("tenant {tenant_id} is {status:?} and cannot be routed")]
    TenantUnavailable {
        tenant_id: TenantId,
        status: TenantStatus,
    },

    #[error("no active host satisfies the requested constraints with free capacity")]
    NoCapacity,

    #[error("host not found: {host_id}")]
    HostNotFound { host_id: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn tenant_not_found(tenant_id: TenantId) -> Self {
        Self::TenantNotFound { tenant_id }
    }

    #[must_use]
    pub fn tenant_unavailable(tenant_id: TenantId, status: TenantStatus) -> Self {
        Self::TenantUnavailable { tenant_id, status }
    }

    #[must_use]
    pub fn host_not_found(host_id: impl std::fmt::Display) -> Self {
        Self::HostNotFound {
            host_id: host_id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
