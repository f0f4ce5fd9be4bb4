//! # ReplayKit - Replay stream store with checkpoint seeking
//!
//! ReplayKit persists recorded replays and plays them back:
//! - Named replays with header, main stream, metadata and checkpoint payloads
//! - Live recordings that can be followed while they are still being written
//! - Checkpoints pairing a timestamp with a main-stream byte offset
//! - Seek-by-time that lands on the closest preceding checkpoint
//! - In-memory and file-backed registries behind one trait
//!
//! ## Quick Start
//!
//! ```rust
//! use replaykit_core::prelude::*;
//! use std::io::Write;
//!
//! fn main() -> Result<()> {
//!     let factory = ReplayStreamerFactory::in_memory();
//!
//!     // Record a replay with one checkpoint
//!     let mut recorder = factory.create_streamer();
//!     recorder.start_streaming(StartStreamingRequest::record("match"))?;
//!     recorder.streaming_archive()?.write_all(&[0u8; 10])?;
//!     recorder.flush_checkpoint(100)?;
//!     recorder.streaming_archive()?.write_all(&[0u8; 10])?;
//!     recorder.stop_streaming()?;
//!
//!     // Seek into it
//!     let mut player = factory.create_streamer();
//!     player.start_streaming(StartStreamingRequest::playback("match"))?;
//!     let ready = player.goto_time_in_ms(150)?;
//!     assert_eq!(ready.target, SeekTarget::Checkpoint(0));
//!     assert_eq!(ready.residual_ms, Some(50));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Store**: `ReplayStore` registry with `InMemoryStore` and `FileStore`
//! - **Session**: `ReplaySession` state machine (idle, recording, playback)
//! - **Checkpoints**: `CheckpointIndex` and its seek resolver
//! - **Archives**: `ReplayArchive` byte cursors over buffers or files

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod factory;
pub mod model;
pub mod session;
pub mod store;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::archive::{
        ArchiveMode, FileArchive, MemoryArchive, ReplayArchive, SharedBuffer, StreamKind,
    };
    pub use crate::checkpoint::{
        CheckpointEntry, CheckpointIndex, ReplayEventInfo, SeekResolution, SeekTarget,
    };
    pub use crate::config::{ConfigBuilder, ReplayConfig, StoreConfig};
    pub use crate::error::{ReplayError, Result, StreamerErrorKind};
    pub use crate::factory::ReplayStreamerFactory;
    pub use crate::model::{ReplayDescriptor, ReplayInfo, ReplayVersion, StreamingMode};
    pub use crate::session::{
        CheckpointReady, FileStreamer, InMemoryStreamer, ReplaySession, ReplayStreamer,
        StartStreamingRequest,
    };
    pub use crate::store::{FileStore, InMemoryStore, ReplayStore};
}
