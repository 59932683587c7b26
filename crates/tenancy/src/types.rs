//! Core data types for tenants and database hosts.

use {
    serde::{Deserialize, Serialize},
    tidechat_common::{HostId, TenantId},
};

/// Tenant lifecycle. `Deleted` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Provisioning,
    Active,
    Suspended,
    Deleted,
    Failed,
}

impl TenantStatus {
    /// Terminal statuses accept no further lifecycle changes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }
}

/// An isolated customer organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub slug: String,
    pub host_id: HostId,
    pub database_name: String,
    pub region: Option<String>,
    pub tier: Option<String>,
    pub status: TenantStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Input for creating a tenant (the provisioning job fills in the rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCreate {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// Host pool availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Active,
    Draining,
    Offline,
}

/// A physical database host in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseHost {
    pub id: HostId,
    pub address: String,
    pub port: u16,
    pub region: Option<String>,
    pub tier: Option<String>,
    pub max_tenants: u32,
    pub disk_capacity_gb: u32,
    pub is_default: bool,
    pub status: HostStatus,
}

impl DatabaseHost {
    /// Whether this host can take another tenant given its current count.
    #[must_use]
    pub fn has_capacity(&self, tenant_count: u32) -> bool {
        self.status == HostStatus::Active && tenant_count < self.max_tenants
    }

    /// Whether this host satisfies the assignment constraints.
    #[must_use]
    pub fn matches(&self, constraints: &HostConstraints) -> bool {
        let region_ok = match &constraints.region {
            Some(region) => self.region.as_deref() == Some(region.as_str()),
            None => true,
        };
        let tier_ok = match &constraints.tier {
            Some(tier) => self.tier.as_deref() == Some(tier.as_str()),
            None => true,
        };
        region_ok && tier_ok
    }
}

/// Constraints for host assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConstraints {
    pub region: Option<String>,
    pub tier: Option<String>,
}

/// Everything needed to open a connection to a tenant's database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub tenant_id: TenantId,
    pub address: String,
    pub port: u16,
    pub database_name: String,
}
