//! Replay metadata types shared by stores and sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Network protocol version and build changelist a replay was recorded with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayVersion {
    /// Network protocol version (0 = any when filtering)
    #[serde(default)]
    pub network_version: u32,

    /// Engine changelist / build id (0 = any when filtering)
    #[serde(default)]
    pub changelist: u32,
}

impl ReplayVersion {
    /// Create a version pair
    pub fn new(network_version: u32, changelist: u32) -> Self {
        Self {
            network_version,
            changelist,
        }
    }

    /// Filter that matches every replay
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether a replay recorded with `recorded` passes this filter
    pub fn matches(&self, recorded: &ReplayVersion) -> bool {
        (self.network_version == 0 || self.network_version == recorded.network_version)
            && (self.changelist == 0 || self.changelist == recorded.changelist)
    }
}

/// What a recorder supplies when creating a replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDescriptor {
    /// Display name shown in listings
    pub friendly_name: String,

    /// Users participating in the recording
    #[serde(default)]
    pub user_names: Vec<String>,

    /// Version the replay is recorded with
    pub version: ReplayVersion,
}

/// Metadata-only summary of a stored replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayInfo {
    /// Unique stream name
    pub name: String,

    /// Display name
    pub friendly_name: String,

    /// When the replay was created (or last written, for file stores)
    pub timestamp: DateTime<Utc>,

    /// Total persisted bytes (header, main stream, metadata)
    pub size_in_bytes: u64,

    /// Whether the replay is still being recorded
    pub is_live: bool,

    /// Recorded duration in milliseconds
    pub length_in_ms: u32,

    /// Version the replay was recorded with
    pub version: ReplayVersion,

    /// Users participating in the recording
    #[serde(default)]
    pub user_names: Vec<String>,
}

impl ReplayInfo {
    /// Whether `user` participated in the replay; `None` matches every replay
    pub fn has_user(&self, user: Option<&str>) -> bool {
        user.is_none_or(|user| self.user_names.iter().any(|name| name == user))
    }
}

/// Session state machine position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// No stream bound
    #[default]
    Idle,
    /// Writing a new replay
    Recording,
    /// Reading an existing replay
    Playback,
}
