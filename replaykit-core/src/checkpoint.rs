//! Checkpoint index and seek resolution
//!
//! A checkpoint pairs a recording timestamp with the main-stream write position
//! at the moment it was flushed. Entries are appended in non-decreasing order of
//! both fields, so the index can answer "where do I resume to reach time T" by
//! picking the closest checkpoint at or before T and reporting the leftover time
//! the caller must fast-forward through.

use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, Result};

/// Event group under which checkpoints are recorded
pub const CHECKPOINT_GROUP: &str = "checkpoint";

/// One sealed checkpoint in a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Recording time of the snapshot in milliseconds
    pub timestamp_ms: u32,

    /// Main-stream byte offset to resume reading from
    pub byte_offset: u64,
}

/// Where a seek lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "index", rename_all = "snake_case")]
pub enum SeekTarget {
    /// Rewind to the very beginning of the main stream
    StreamStart,
    /// Resume from the checkpoint at this index
    Checkpoint(usize),
}

impl SeekTarget {
    /// Checkpoint index, or `None` for the stream start
    pub fn index(self) -> Option<usize> {
        match self {
            SeekTarget::StreamStart => None,
            SeekTarget::Checkpoint(index) => Some(index),
        }
    }
}

impl From<Option<usize>> for SeekTarget {
    fn from(index: Option<usize>) -> Self {
        index.map_or(SeekTarget::StreamStart, SeekTarget::Checkpoint)
    }
}

/// A resolved seek: target plus the remaining time to fast-forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekResolution {
    /// Checkpoint (or stream start) to jump to
    pub target: SeekTarget,

    /// Milliseconds between the target's timestamp and the requested time
    pub residual_ms: u32,
}

/// Ordered list of checkpoints for one replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    entries: Vec<CheckpointEntry>,
}

impl CheckpointIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from entries already known to be ordered
    pub fn from_entries(entries: Vec<CheckpointEntry>) -> Self {
        Self { entries }
    }

    /// Append a checkpoint, rejecting timestamps that move backwards
    pub fn push(&mut self, entry: CheckpointEntry) -> Result<usize> {
        self.validate_next(&entry)?;
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Check that `entry` may follow the current last checkpoint
    pub fn validate_next(&self, entry: &CheckpointEntry) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if entry.timestamp_ms < last.timestamp_ms {
                return Err(ReplayError::NonMonotonicCheckpoint {
                    timestamp_ms: entry.timestamp_ms,
                    previous_ms: last.timestamp_ms,
                });
            }
            if entry.byte_offset < last.byte_offset {
                return Err(ReplayError::InvalidState(format!(
                    "checkpoint offset {} precedes previous offset {}",
                    entry.byte_offset, last.byte_offset
                )));
            }
        }
        Ok(())
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&CheckpointEntry> {
        self.entries.get(index)
    }

    /// Last entry
    pub fn last(&self) -> Option<&CheckpointEntry> {
        self.entries.last()
    }

    /// Number of checkpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no checkpoints
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in order
    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }

    /// Resolve a target time to the closest preceding checkpoint.
    ///
    /// Past the last checkpoint the last one is chosen. Otherwise the list is
    /// scanned forward and the entry before the first one later than
    /// `target_ms` wins; if even the first checkpoint is later, playback has to
    /// start from the beginning of the stream.
    pub fn resolve(&self, target_ms: u32) -> SeekResolution {
        let target = match self.entries.last() {
            Some(last) if target_ms >= last.timestamp_ms => {
                SeekTarget::Checkpoint(self.entries.len() - 1)
            }
            _ => self
                .entries
                .iter()
                .position(|entry| target_ms < entry.timestamp_ms)
                .and_then(|first_later| first_later.checked_sub(1))
                .into(),
        };

        let baseline = target
            .index()
            .and_then(|index| self.entries.get(index))
            .map_or(0, |entry| entry.timestamp_ms);

        SeekResolution {
            target,
            residual_ms: target_ms - baseline,
        }
    }
}

/// Companion descriptor persisted next to each checkpoint payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEventInfo {
    /// Event group, `"checkpoint"` for checkpoints
    pub group: String,

    /// Main-stream byte offset, as a decimal string
    pub meta: String,

    /// Start time in milliseconds
    pub time1: u32,

    /// End time in milliseconds
    pub time2: u32,
}

impl ReplayEventInfo {
    /// Descriptor for a sealed checkpoint
    pub fn checkpoint(entry: CheckpointEntry) -> Self {
        Self {
            group: CHECKPOINT_GROUP.to_string(),
            meta: entry.byte_offset.to_string(),
            time1: entry.timestamp_ms,
            time2: entry.timestamp_ms,
        }
    }

    /// Recover the checkpoint entry, if this descriptor belongs to one
    pub fn to_checkpoint(&self) -> Result<Option<CheckpointEntry>> {
        if self.group != CHECKPOINT_GROUP {
            return Ok(None);
        }

        let byte_offset = self.meta.trim().parse::<u64>().map_err(|e| {
            ReplayError::Other(format!("invalid checkpoint offset '{}': {}", self.meta, e))
        })?;

        Ok(Some(CheckpointEntry {
            timestamp_ms: self.time1,
            byte_offset,
        }))
    }
}
