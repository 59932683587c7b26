//! Typed identifiers.
//!
//! Every pipeline operation carries a [`TenantId`] and is routed through the
//! tenant routing table before touching storage; the newtypes make it
//! impossible to pass, say, a channel id where a tenant id is expected.

use {serde::Deserialize, serde::Serialize, uuid::Uuid};

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// An isolated customer organization with its own database and channels.
    TenantId
);
uuid_id!(
    /// A configured connection point to the external messaging gateway.
    ChannelId
);
uuid_id!(
    /// A message row within a tenant's chat history.
    MessageId
);
uuid_id!(
    /// A conversation within a tenant.
    ChatId
);
uuid_id!(
    /// A physical database host in the pool.
    HostId
);
