//! Well-known queue names, one per workload class.

pub const PROVISIONING: &str = "provisioning";
pub const MIGRATION: &str = "migration";
pub const CHANNEL_SYNC: &str = "channel-sync";
pub const AUDIO_SEND: &str = "audio-send";
pub const SCHEDULED_SEND: &str = "scheduled-send";
pub const ATTACHMENT_CLEANUP: &str = "attachment-cleanup";
pub const ATTACHMENT_ORPHAN_CLEANUP: &str = "attachment-orphan-cleanup";

/// All queue names, for registration loops.
pub const ALL: &[&str] = &[
    PROVISIONING,
    MIGRATION,
    CHANNEL_SYNC,
    AUDIO_SEND,
    SCHEDULED_SEND,
    ATTACHMENT_CLEANUP,
    ATTACHMENT_ORPHAN_CLEANUP,
];
