//! Error types for replay streaming operations

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Error types for the replay stream store
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Operation requires an open stream but the session is idle
    #[error("Session is not streaming")]
    NotStreaming,

    /// Start was requested while a stream is already bound
    #[error("Session is already streaming: {0}")]
    AlreadyStreaming(String),

    /// Operation is not valid in the current session mode
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Playback was requested without a stream name
    #[error("A stream name is required for playback")]
    MissingStreamName,

    /// Stream name cannot be used as a storage key
    #[error("Invalid stream name: {0}")]
    InvalidStreamName(String),

    /// Named stream does not exist in the registry
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Checkpoint index outside the replay's checkpoint list
    #[error("Checkpoint index {index} out of range ({count} checkpoints)")]
    CheckpointOutOfRange {
        /// Requested index
        index: usize,
        /// Number of checkpoints in the replay
        count: usize,
    },

    /// Checkpoint flushed with a timestamp earlier than its predecessor
    #[error("Checkpoint at {timestamp_ms}ms precedes previous checkpoint at {previous_ms}ms")]
    NonMonotonicCheckpoint {
        /// Rejected timestamp
        timestamp_ms: u32,
        /// Timestamp of the last sealed checkpoint
        previous_ms: u32,
    },

    /// Playback checkpoint archive requested before any goto
    #[error("No checkpoint loaded")]
    NoCheckpointLoaded,

    /// Archive used against its open mode (reading a writer or writing a reader)
    #[error("Archive error: {0}")]
    ArchiveMode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ReplayError {
    /// Coarse classification used for a session's last-error query
    pub fn kind(&self) -> StreamerErrorKind {
        match self {
            ReplayError::MissingStreamName
            | ReplayError::StreamNotFound(_)
            | ReplayError::InvalidStreamName(_) => StreamerErrorKind::NotFound,
            ReplayError::CheckpointOutOfRange { .. } | ReplayError::NoCheckpointLoaded => {
                StreamerErrorKind::CheckpointUnavailable
            }
            ReplayError::Io(_) | ReplayError::Serialization(_) => {
                StreamerErrorKind::ServiceUnavailable
            }
            _ => StreamerErrorKind::InvalidUsage,
        }
    }
}

/// Last-error categories reported by a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamerErrorKind {
    /// Stream name missing or unknown
    NotFound,
    /// Requested checkpoint could not be loaded
    CheckpointUnavailable,
    /// Underlying storage failed
    ServiceUnavailable,
    /// Call made in the wrong session state
    InvalidUsage,
}

impl From<String> for ReplayError {
    fn from(s: String) -> Self {
        ReplayError::Other(s)
    }
}

impl From<&str> for ReplayError {
    fn from(s: &str) -> Self {
        ReplayError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        for err in [
            ReplayError::MissingStreamName,
            ReplayError::StreamNotFound("a".to_string()),
            ReplayError::InvalidStreamName("a/b".to_string()),
        ] {
            assert_eq!(err.kind(), StreamerErrorKind::NotFound);
        }
        assert_eq!(
            ReplayError::NoCheckpointLoaded.kind(),
            StreamerErrorKind::CheckpointUnavailable
        );
        assert_eq!(
            ReplayError::from(std::io::Error::other("disk")).kind(),
            StreamerErrorKind::ServiceUnavailable
        );
        assert_eq!(ReplayError::NotStreaming.kind(), StreamerErrorKind::InvalidUsage);
    }
}
