//! Replay session state machine
//!
//! A [`ReplaySession`] binds one stream name at a time and mediates a single
//! producer's or consumer's access to that replay:
//!
//! ```text
//!            start_streaming(record)          stop_streaming
//!   Idle  ───────────────────────────▶ Recording ───────────▶ Idle
//!   Idle  ───────────────────────────▶ Playback  ───────────▶ Idle
//!            start_streaming(playback)
//! ```
//!
//! Recording writes the header and main stream, snapshots engine state into
//! checkpoints with [`ReplayStreamer::flush_checkpoint`], and finalizes the
//! replay on stop. Playback reads them back and jumps around with
//! [`ReplayStreamer::goto_time_in_ms`].
//!
//! All operations complete synchronously and report failures through their
//! `Result`; a session never blocks or spawns work.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archive::{ArchiveMode, MemoryArchive, ReplayArchive, StreamKind};
use crate::checkpoint::{CheckpointEntry, CheckpointIndex, SeekTarget};
use crate::error::{ReplayError, Result, StreamerErrorKind};
use crate::model::{ReplayDescriptor, ReplayInfo, ReplayVersion, StreamingMode};
use crate::store::{FileStore, InMemoryStore, ReplayStore};

/// Prefix for generated stream names when none is configured
pub const DEFAULT_NAME_PREFIX: &str = "replay";

/// Parameters for [`ReplayStreamer::start_streaming`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStreamingRequest {
    /// Stream name; empty means "generate one" when recording
    pub name: String,

    /// Display name stored with a new recording
    pub friendly_name: String,

    /// Users participating in the recording
    #[serde(default)]
    pub user_names: Vec<String>,

    /// Record (true) or play back (false)
    pub record: bool,

    /// Version stored with a new recording
    pub version: ReplayVersion,
}

impl StartStreamingRequest {
    /// Request to record into `name` (empty for a generated name)
    pub fn record(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record: true,
            ..Default::default()
        }
    }

    /// Request to play back `name`
    pub fn playback(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record: false,
            ..Default::default()
        }
    }

    /// Set the friendly display name
    pub fn with_friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        self.friendly_name = friendly_name.into();
        self
    }

    /// Set the participating users
    pub fn with_user_names(mut self, user_names: Vec<String>) -> Self {
        self.user_names = user_names;
        self
    }

    /// Set the recording version
    pub fn with_version(mut self, version: ReplayVersion) -> Self {
        self.version = version;
        self
    }
}

/// Outcome of a successful checkpoint jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReady {
    /// Where the main stream was positioned
    pub target: SeekTarget,

    /// Main-stream read position after the jump
    pub byte_offset: u64,

    /// Time left to fast-forward; set when the jump came from a time seek
    pub residual_ms: Option<u32>,
}

/// Capability interface implemented by every replay streamer
///
/// Callers depend on this trait only; the backing store is chosen when the
/// streamer is created (see [`crate::factory::ReplayStreamerFactory`]).
pub trait ReplayStreamer: Send {
    /// Bind a stream for recording or playback, returning the bound name
    fn start_streaming(&mut self, request: StartStreamingRequest) -> Result<String>;

    /// Release all archives and return to idle, finalizing a recording
    fn stop_streaming(&mut self) -> Result<()>;

    /// Header archive of the bound stream
    fn header_archive(&mut self) -> Result<&mut dyn ReplayArchive>;

    /// Main packet stream archive of the bound stream
    fn streaming_archive(&mut self) -> Result<&mut dyn ReplayArchive>;

    /// Metadata archive, opened on first access
    fn metadata_archive(&mut self) -> Result<&mut dyn ReplayArchive>;

    /// Checkpoint archive: the payload writer of the pending checkpoint when
    /// recording, or the payload reader loaded by the last goto when playing
    fn checkpoint_archive(&mut self) -> Result<&mut dyn ReplayArchive>;

    /// Seal the pending checkpoint at `timestamp_ms`
    fn flush_checkpoint(&mut self, timestamp_ms: u32) -> Result<()>;

    /// Jump to a checkpoint, or to the stream start for `None`
    fn goto_checkpoint_index(&mut self, index: Option<usize>) -> Result<CheckpointReady>;

    /// Jump to the checkpoint closest before `time_ms`
    fn goto_time_in_ms(&mut self, time_ms: u32) -> Result<CheckpointReady>;

    /// Record the total duration of the replay so far
    fn update_total_demo_time(&mut self, time_ms: u32) -> Result<()>;

    /// Total duration known to this session
    fn total_demo_time(&self) -> u32;

    /// Whether the main stream has unread bytes (playback only)
    fn is_data_available(&self) -> bool;

    /// Whether the bound replay is still being recorded
    fn is_live(&self) -> bool;

    /// Whether a stream is bound
    fn is_streaming(&self) -> bool;

    /// Current state machine position
    fn mode(&self) -> StreamingMode;

    /// Name of the bound stream
    fn stream_name(&self) -> Option<&str>;

    /// Kind of the most recent failure since the last successful start
    fn last_error(&self) -> Option<StreamerErrorKind>;

    /// Summaries of stored replays matching `version` and, if given, `user`
    fn enumerate_streams(
        &self,
        version: &ReplayVersion,
        user: Option<&str>,
    ) -> Result<Vec<ReplayInfo>>;

    /// Delete a finished replay; false if it is live or absent
    fn delete_finished_stream(&self, name: &str) -> Result<bool>;
}

/// Streamer over an [`InMemoryStore`]
pub type InMemoryStreamer = ReplaySession<InMemoryStore>;

/// Streamer over a [`FileStore`]
pub type FileStreamer = ReplaySession<FileStore>;

/// A session over one replay store
pub struct ReplaySession<S: ReplayStore + ?Sized> {
    store: Arc<S>,
    name_prefix: String,
    mode: StreamingMode,
    stream_name: Option<String>,
    header: Option<Box<dyn ReplayArchive>>,
    stream: Option<Box<dyn ReplayArchive>>,
    metadata: Option<Box<dyn ReplayArchive>>,
    checkpoint: Option<Box<dyn ReplayArchive>>,
    /// Set once the recorded header has been pushed to the store
    header_flushed: bool,
    /// Store index of the checkpoint whose payload writer is open
    pending_checkpoint: Option<usize>,
    checkpoint_write_index: usize,
    written_checkpoints: CheckpointIndex,
    total_demo_time_ms: u32,
    last_error: Option<StreamerErrorKind>,
}

impl<S: ReplayStore + ?Sized> ReplaySession<S> {
    /// Create an idle session over `store`
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            mode: StreamingMode::Idle,
            stream_name: None,
            header: None,
            stream: None,
            metadata: None,
            checkpoint: None,
            header_flushed: false,
            pending_checkpoint: None,
            checkpoint_write_index: 0,
            written_checkpoints: CheckpointIndex::new(),
            total_demo_time_ms: 0,
            last_error: None,
        }
    }

    /// Set the prefix used for generated stream names
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// The store this session reads and writes
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Index the next flushed checkpoint will get (recording only)
    pub fn checkpoint_write_index(&self) -> usize {
        self.checkpoint_write_index
    }

    fn generate_name(&self) -> String {
        format!("{}-{}", self.name_prefix, Uuid::new_v4().simple())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.kind());
        }
        result
    }

    fn bound_name(&self) -> Result<&str> {
        self.stream_name.as_deref().ok_or(ReplayError::NotStreaming)
    }

    fn require_mode(&self, expected: StreamingMode, operation: &str) -> Result<()> {
        match self.mode {
            mode if mode == expected => Ok(()),
            StreamingMode::Idle => Err(ReplayError::NotStreaming),
            mode => Err(ReplayError::InvalidState(format!(
                "{} requires {:?} mode, session is {:?}",
                operation, expected, mode
            ))),
        }
    }

    fn open_recording(
        &self,
        name: &str,
        request: &StartStreamingRequest,
    ) -> Result<(Box<dyn ReplayArchive>, Box<dyn ReplayArchive>)> {
        let descriptor = ReplayDescriptor {
            friendly_name: request.friendly_name.clone(),
            user_names: request.user_names.clone(),
            version: request.version,
        };
        self.store.create_or_replace(name, &descriptor)?;

        let header = self
            .store
            .open_archive(name, StreamKind::Header, ArchiveMode::Write)?;
        let stream = self
            .store
            .open_archive(name, StreamKind::Stream, ArchiveMode::Write)?;
        Ok((header, stream))
    }

    fn open_playback(
        &self,
        name: &str,
    ) -> Result<(ReplayInfo, Box<dyn ReplayArchive>, Box<dyn ReplayArchive>)> {
        let info = self
            .store
            .find(name)?
            .ok_or_else(|| ReplayError::StreamNotFound(name.to_string()))?;

        let header = self
            .store
            .open_archive(name, StreamKind::Header, ArchiveMode::Read)?;
        let stream = self
            .store
            .open_archive(name, StreamKind::Stream, ArchiveMode::Read)?;
        Ok((info, header, stream))
    }

    fn start(&mut self, request: StartStreamingRequest) -> Result<String> {
        if let Some(current) = &self.stream_name {
            return Err(ReplayError::AlreadyStreaming(current.clone()));
        }

        let (name, mode, header, stream, length_ms) = if request.record {
            let name = if request.name.is_empty() {
                self.generate_name()
            } else {
                request.name.clone()
            };
            let (header, stream) = self.open_recording(&name, &request)?;
            (name, StreamingMode::Recording, header, stream, 0)
        } else {
            if request.name.is_empty() {
                return Err(ReplayError::MissingStreamName);
            }
            let (info, header, stream) = self.open_playback(&request.name)?;
            (
                request.name.clone(),
                StreamingMode::Playback,
                header,
                stream,
                info.length_in_ms,
            )
        };

        tracing::info!(
            stream = %name,
            mode = ?mode,
            backend = self.store.backend_name(),
            "Started streaming"
        );

        self.mode = mode;
        self.stream_name = Some(name.clone());
        self.header = Some(header);
        self.stream = Some(stream);
        self.metadata = None;
        self.checkpoint = None;
        self.header_flushed = false;
        self.pending_checkpoint = None;
        self.checkpoint_write_index = 0;
        self.written_checkpoints = CheckpointIndex::new();
        self.total_demo_time_ms = length_ms;
        self.last_error = None;

        Ok(name)
    }

    fn stop(&mut self) -> Result<()> {
        let Some(name) = self.stream_name.take() else {
            return Ok(());
        };
        let was_recording = self.mode == StreamingMode::Recording;

        let abandoned = self.pending_checkpoint.take();

        let mut first_error = None;
        for mut archive in [
            self.header.take(),
            self.stream.take(),
            self.metadata.take(),
            self.checkpoint.take(),
        ]
        .into_iter()
        .flatten()
        {
            if archive.mode() == ArchiveMode::Write {
                if let Err(e) = archive.finish() {
                    first_error.get_or_insert(ReplayError::from(e));
                }
            }
        }

        if let Some(index) = abandoned {
            tracing::warn!(stream = %name, index, "Discarding checkpoint that was never flushed");
            if let Err(e) = self.store.abandon_checkpoint(&name, index) {
                first_error.get_or_insert(e);
            }
        }

        if was_recording {
            if let Err(e) = self.store.finalize(&name, self.total_demo_time_ms) {
                first_error.get_or_insert(e);
            }
        }

        self.mode = StreamingMode::Idle;
        self.written_checkpoints = CheckpointIndex::new();

        tracing::info!(
            stream = %name,
            length_ms = self.total_demo_time_ms,
            finalized = was_recording,
            "Stopped streaming"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_metadata(&mut self) -> Result<()> {
        if self.metadata.is_some() {
            return Ok(());
        }

        let mode = match self.mode {
            StreamingMode::Recording => ArchiveMode::Write,
            StreamingMode::Playback => ArchiveMode::Read,
            StreamingMode::Idle => return Err(ReplayError::NotStreaming),
        };
        let archive = self
            .store
            .open_archive(self.bound_name()?, StreamKind::Metadata, mode)?;
        self.metadata = Some(archive);
        Ok(())
    }

    fn open_pending_checkpoint(&mut self) -> Result<()> {
        if self.pending_checkpoint.is_some() {
            return Ok(());
        }

        let (index, writer) = self.store.begin_checkpoint(self.bound_name()?)?;
        if index != self.checkpoint_write_index {
            tracing::warn!(
                store_index = index,
                write_index = self.checkpoint_write_index,
                "Checkpoint index out of step with store"
            );
        }
        self.pending_checkpoint = Some(index);
        self.checkpoint = Some(writer);
        Ok(())
    }

    /// Push the recorded header to the store the first time packets are written
    fn flush_header_once(&mut self) -> Result<()> {
        if self.mode != StreamingMode::Recording || self.header_flushed {
            return Ok(());
        }
        if let Some(header) = self.header.as_mut() {
            header.finish()?;
        }
        self.header_flushed = true;
        Ok(())
    }

    fn flush(&mut self, timestamp_ms: u32) -> Result<()> {
        self.require_mode(StreamingMode::Recording, "flush_checkpoint")?;

        // A live viewer opens the header and metadata before reading packets
        for archive in [self.header.as_mut(), self.metadata.as_mut()]
            .into_iter()
            .flatten()
        {
            archive.finish()?;
        }
        self.header_flushed = true;

        let stream = self.stream.as_mut().ok_or(ReplayError::NotStreaming)?;
        // Readers of a live replay must see every byte up to the checkpoint offset
        stream.finish()?;
        let entry = CheckpointEntry {
            timestamp_ms,
            byte_offset: stream.tell(),
        };
        self.written_checkpoints.validate_next(&entry)?;

        self.open_pending_checkpoint()?;
        if let Some(mut writer) = self.checkpoint.take() {
            writer.finish()?;
        }
        let index = self
            .pending_checkpoint
            .take()
            .ok_or_else(|| ReplayError::InvalidState("no pending checkpoint".to_string()))?;

        let name = self.bound_name()?.to_string();
        self.store.seal_checkpoint(&name, index, entry)?;
        self.written_checkpoints.push(entry)?;
        self.checkpoint_write_index += 1;

        tracing::debug!(
            stream = %name,
            index,
            timestamp_ms,
            byte_offset = entry.byte_offset,
            "Flushed checkpoint"
        );
        Ok(())
    }

    fn goto(&mut self, target: SeekTarget, residual_ms: Option<u32>) -> Result<CheckpointReady> {
        self.require_mode(StreamingMode::Playback, "goto_checkpoint_index")?;
        let name = self.bound_name()?.to_string();

        let (checkpoint, byte_offset) = match target {
            SeekTarget::StreamStart => (
                Box::new(MemoryArchive::empty_reader()) as Box<dyn ReplayArchive>,
                0,
            ),
            SeekTarget::Checkpoint(index) => {
                let checkpoints = self.store.checkpoints(&name)?;
                let entry = *checkpoints
                    .get(index)
                    .ok_or(ReplayError::CheckpointOutOfRange {
                        index,
                        count: checkpoints.len(),
                    })?;
                (self.store.open_checkpoint(&name, index)?, entry.byte_offset)
            }
        };

        // A failed seek leaves the read cursor where it was
        let stream = self.stream.as_mut().ok_or(ReplayError::NotStreaming)?;
        stream.seek_to(byte_offset)?;
        self.checkpoint = Some(checkpoint);

        tracing::debug!(stream = %name, ?target, byte_offset, ?residual_ms, "Loaded checkpoint");

        Ok(CheckpointReady {
            target,
            byte_offset,
            residual_ms,
        })
    }

    fn goto_time(&mut self, time_ms: u32) -> Result<CheckpointReady> {
        self.require_mode(StreamingMode::Playback, "goto_time_in_ms")?;

        // Reloaded on every seek so a live replay's new checkpoints are found
        let resolution = self.store.checkpoints(self.bound_name()?)?.resolve(time_ms);
        self.goto(resolution.target, Some(resolution.residual_ms))
    }

    fn set_total_time(&mut self, time_ms: u32) -> Result<()> {
        self.require_mode(StreamingMode::Recording, "update_total_demo_time")?;
        self.store.set_total_time(self.bound_name()?, time_ms)?;
        self.total_demo_time_ms = time_ms;
        Ok(())
    }
}

fn archive_ref(slot: &mut Option<Box<dyn ReplayArchive>>) -> Result<&mut dyn ReplayArchive> {
    match slot {
        Some(archive) => Ok(archive.as_mut()),
        None => Err(ReplayError::NotStreaming),
    }
}

impl<S: ReplayStore + ?Sized> ReplayStreamer for ReplaySession<S> {
    fn start_streaming(&mut self, request: StartStreamingRequest) -> Result<String> {
        let result = self.start(request);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Failed to start streaming");
        }
        self.track(result)
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let result = self.stop();
        self.track(result)
    }

    fn header_archive(&mut self) -> Result<&mut dyn ReplayArchive> {
        archive_ref(&mut self.header)
    }

    fn streaming_archive(&mut self) -> Result<&mut dyn ReplayArchive> {
        let flushed = self.flush_header_once();
        self.track(flushed)?;
        archive_ref(&mut self.stream)
    }

    fn metadata_archive(&mut self) -> Result<&mut dyn ReplayArchive> {
        let opened = self.open_metadata();
        self.track(opened)?;
        archive_ref(&mut self.metadata)
    }

    fn checkpoint_archive(&mut self) -> Result<&mut dyn ReplayArchive> {
        match self.mode {
            StreamingMode::Idle => return Err(ReplayError::NotStreaming),
            StreamingMode::Recording => {
                let opened = self.open_pending_checkpoint();
                self.track(opened)?;
            }
            StreamingMode::Playback => {
                if self.checkpoint.is_none() {
                    return Err(ReplayError::NoCheckpointLoaded);
                }
            }
        }
        archive_ref(&mut self.checkpoint)
    }

    fn flush_checkpoint(&mut self, timestamp_ms: u32) -> Result<()> {
        let result = self.flush(timestamp_ms);
        self.track(result)
    }

    fn goto_checkpoint_index(&mut self, index: Option<usize>) -> Result<CheckpointReady> {
        let result = self.goto(index.into(), None);
        self.track(result)
    }

    fn goto_time_in_ms(&mut self, time_ms: u32) -> Result<CheckpointReady> {
        let result = self.goto_time(time_ms);
        self.track(result)
    }

    fn update_total_demo_time(&mut self, time_ms: u32) -> Result<()> {
        let result = self.set_total_time(time_ms);
        self.track(result)
    }

    fn total_demo_time(&self) -> u32 {
        self.total_demo_time_ms
    }

    fn is_data_available(&self) -> bool {
        self.mode == StreamingMode::Playback
            && self.stream.as_ref().is_some_and(|stream| !stream.at_end())
    }

    fn is_live(&self) -> bool {
        let Some(name) = self.stream_name.as_deref() else {
            return false;
        };
        self.store.is_live(name).unwrap_or_else(|e| {
            tracing::warn!(stream = %name, error = %e, "Failed to query live state");
            false
        })
    }

    fn is_streaming(&self) -> bool {
        self.stream_name.is_some()
    }

    fn mode(&self) -> StreamingMode {
        self.mode
    }

    fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    fn last_error(&self) -> Option<StreamerErrorKind> {
        self.last_error
    }

    fn enumerate_streams(
        &self,
        version: &ReplayVersion,
        user: Option<&str>,
    ) -> Result<Vec<ReplayInfo>> {
        self.store.enumerate(version, user)
    }

    fn delete_finished_stream(&self, name: &str) -> Result<bool> {
        self.store.delete(name)
    }
}

impl<S: ReplayStore + ?Sized> Drop for ReplaySession<S> {
    fn drop(&mut self) {
        if self.is_streaming() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Failed to stop streaming on drop");
            }
        }
    }
}
