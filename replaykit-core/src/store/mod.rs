//! Stream registry trait for pluggable replay storage
//!
//! This module defines the `ReplayStore` trait that every replay backend
//! implements. A store owns the persisted state of all replays it knows about
//! and hands out archives over their byte streams:
//!
//! - In-memory mode (process-local map of shared buffers)
//! - File mode (one directory per replay under a root directory)
//!
//! Stores are shared between sessions through `Arc`; a store performs no
//! cross-session exclusion beyond refusing to delete a live replay.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use crate::archive::{ArchiveMode, ReplayArchive, StreamKind};
use crate::checkpoint::{CheckpointEntry, CheckpointIndex};
use crate::error::Result;
use crate::model::{ReplayDescriptor, ReplayInfo, ReplayVersion};

/// The core stream registry trait
///
/// Implementors provide durable lookup of replays by name plus access to each
/// replay's header, main stream, metadata and checkpoint payloads.
pub trait ReplayStore: Send + Sync {
    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Exact-name lookup
    fn find(&self, name: &str) -> Result<Option<ReplayInfo>>;

    /// Create a fresh live replay, discarding any replay of the same name
    fn create_or_replace(&self, name: &str, descriptor: &ReplayDescriptor) -> Result<ReplayInfo>;

    /// Summaries of all replays whose version passes `filter`, optionally only
    /// those `user` participated in
    fn enumerate(&self, filter: &ReplayVersion, user: Option<&str>) -> Result<Vec<ReplayInfo>>;

    /// Remove a finished replay; false if it is live or absent
    fn delete(&self, name: &str) -> Result<bool>;

    /// Whether the named replay is still being recorded
    fn is_live(&self, name: &str) -> Result<bool>;

    /// Open one of the replay's byte streams
    fn open_archive(
        &self,
        name: &str,
        kind: StreamKind,
        mode: ArchiveMode,
    ) -> Result<Box<dyn ReplayArchive>>;

    /// Append a new empty checkpoint record and return its index and payload writer
    fn begin_checkpoint(&self, name: &str) -> Result<(usize, Box<dyn ReplayArchive>)>;

    /// Record the timestamp and stream offset of a checkpoint opened by `begin_checkpoint`
    fn seal_checkpoint(&self, name: &str, index: usize, entry: CheckpointEntry) -> Result<()>;

    /// Drop a checkpoint opened by `begin_checkpoint` that was never sealed;
    /// sealed or missing checkpoints are left alone
    fn abandon_checkpoint(&self, name: &str, index: usize) -> Result<()>;

    /// Index of all sealed checkpoints
    fn checkpoints(&self, name: &str) -> Result<CheckpointIndex>;

    /// Reader over a sealed checkpoint's payload
    fn open_checkpoint(&self, name: &str, index: usize) -> Result<Box<dyn ReplayArchive>>;

    /// Set the recorded duration
    fn set_total_time(&self, name: &str, length_ms: u32) -> Result<()>;

    /// Clear the live flag and persist the final duration
    fn finalize(&self, name: &str, length_ms: u32) -> Result<()>;
}
