//! In-memory replay store for tests, tools and short-lived sessions
//!
//! Replays live in a map of shared buffers owned by the store instance. Archives
//! opened on a replay hold their own reference to its buffers, so a playback
//! session reads bytes the moment a recorder appends them, and a replaced
//! replay's bytes survive until the last archive over them is dropped.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::ReplayStore;
use crate::archive::{ArchiveMode, MemoryArchive, ReplayArchive, SharedBuffer, StreamKind};
use crate::checkpoint::{CheckpointEntry, CheckpointIndex};
use crate::error::{ReplayError, Result};
use crate::model::{ReplayDescriptor, ReplayInfo, ReplayVersion};

struct StoredCheckpoint {
    /// `None` until the checkpoint is flushed
    entry: Option<CheckpointEntry>,
    payload: SharedBuffer,
}

struct StoredReplay {
    descriptor: ReplayDescriptor,
    created_at: DateTime<Utc>,
    length_ms: u32,
    live: bool,
    header: SharedBuffer,
    stream: SharedBuffer,
    metadata: SharedBuffer,
    checkpoints: Vec<StoredCheckpoint>,
}

impl StoredReplay {
    fn new(descriptor: ReplayDescriptor) -> Self {
        Self {
            descriptor,
            created_at: Utc::now(),
            length_ms: 0,
            live: true,
            header: SharedBuffer::new(),
            stream: SharedBuffer::new(),
            metadata: SharedBuffer::new(),
            checkpoints: Vec::new(),
        }
    }

    fn buffer(&self, kind: StreamKind) -> &SharedBuffer {
        match kind {
            StreamKind::Header => &self.header,
            StreamKind::Stream => &self.stream,
            StreamKind::Metadata => &self.metadata,
        }
    }

    fn info(&self, name: &str) -> ReplayInfo {
        ReplayInfo {
            name: name.to_string(),
            friendly_name: self.descriptor.friendly_name.clone(),
            timestamp: self.created_at,
            size_in_bytes: (self.header.len() + self.stream.len() + self.metadata.len()) as u64,
            is_live: self.live,
            length_in_ms: self.length_ms,
            version: self.descriptor.version,
            user_names: self.descriptor.user_names.clone(),
        }
    }

    fn sealed_checkpoint(&self, index: usize) -> Option<&StoredCheckpoint> {
        self.checkpoints
            .get(index)
            .filter(|checkpoint| checkpoint.entry.is_some())
    }

    fn sealed_count(&self) -> usize {
        self.checkpoints
            .iter()
            .take_while(|checkpoint| checkpoint.entry.is_some())
            .count()
    }
}

/// In-memory replay store
///
/// Lost on drop; includes live replays in enumeration (marked live).
pub struct InMemoryStore {
    replays: RwLock<HashMap<String, StoredReplay>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            replays: RwLock::new(HashMap::new()),
        }
    }

    /// Number of replays held, live or finished
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no replays
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredReplay>> {
        self.replays.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredReplay>> {
        self.replays.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_replay<T>(&self, name: &str, f: impl FnOnce(&StoredReplay) -> Result<T>) -> Result<T> {
        let replays = self.read();
        let replay = replays
            .get(name)
            .ok_or_else(|| ReplayError::StreamNotFound(name.to_string()))?;
        f(replay)
    }

    fn with_replay_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut StoredReplay) -> Result<T>,
    ) -> Result<T> {
        let mut replays = self.write();
        let replay = replays
            .get_mut(name)
            .ok_or_else(|| ReplayError::StreamNotFound(name.to_string()))?;
        f(replay)
    }
}

impl ReplayStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn find(&self, name: &str) -> Result<Option<ReplayInfo>> {
        Ok(self.read().get(name).map(|replay| replay.info(name)))
    }

    fn create_or_replace(&self, name: &str, descriptor: &ReplayDescriptor) -> Result<ReplayInfo> {
        let replay = StoredReplay::new(descriptor.clone());
        let info = replay.info(name);

        if self.write().insert(name.to_string(), replay).is_some() {
            tracing::debug!(stream = %name, "Replaced existing in-memory replay");
        }

        Ok(info)
    }

    fn enumerate(&self, filter: &ReplayVersion, user: Option<&str>) -> Result<Vec<ReplayInfo>> {
        let replays = self.read();
        let mut infos: Vec<ReplayInfo> = replays
            .iter()
            .filter(|(_, replay)| filter.matches(&replay.descriptor.version))
            .map(|(name, replay)| replay.info(name))
            .filter(|info| info.has_user(user))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let mut replays = self.write();

        match replays.get(name) {
            None => Ok(false),
            Some(replay) if replay.live => {
                tracing::warn!(stream = %name, "Refusing to delete live replay");
                Ok(false)
            }
            Some(_) => {
                replays.remove(name);
                Ok(true)
            }
        }
    }

    fn is_live(&self, name: &str) -> Result<bool> {
        Ok(self.read().get(name).is_some_and(|replay| replay.live))
    }

    fn open_archive(
        &self,
        name: &str,
        kind: StreamKind,
        mode: ArchiveMode,
    ) -> Result<Box<dyn ReplayArchive>> {
        self.with_replay(name, |replay| {
            if mode == ArchiveMode::Write && !replay.live {
                return Err(ReplayError::ArchiveMode(format!(
                    "replay '{}' is finalized and cannot be written",
                    name
                )));
            }
            let buffer = replay.buffer(kind).clone();
            let archive = match mode {
                ArchiveMode::Read => MemoryArchive::reader(buffer),
                ArchiveMode::Write => MemoryArchive::writer(buffer),
            };
            Ok(Box::new(archive) as Box<dyn ReplayArchive>)
        })
    }

    fn begin_checkpoint(&self, name: &str) -> Result<(usize, Box<dyn ReplayArchive>)> {
        self.with_replay_mut(name, |replay| {
            let payload = SharedBuffer::new();
            replay.checkpoints.push(StoredCheckpoint {
                entry: None,
                payload: payload.clone(),
            });
            let index = replay.checkpoints.len() - 1;
            Ok((
                index,
                Box::new(MemoryArchive::writer(payload)) as Box<dyn ReplayArchive>,
            ))
        })
    }

    fn seal_checkpoint(&self, name: &str, index: usize, entry: CheckpointEntry) -> Result<()> {
        self.with_replay_mut(name, |replay| {
            let count = replay.checkpoints.len();
            let checkpoint = replay
                .checkpoints
                .get_mut(index)
                .ok_or(ReplayError::CheckpointOutOfRange { index, count })?;
            checkpoint.entry = Some(entry);
            Ok(())
        })
    }

    fn abandon_checkpoint(&self, name: &str, index: usize) -> Result<()> {
        self.with_replay_mut(name, |replay| {
            if index + 1 == replay.checkpoints.len()
                && replay.checkpoints[index].entry.is_none()
            {
                replay.checkpoints.pop();
            }
            Ok(())
        })
    }

    fn checkpoints(&self, name: &str) -> Result<CheckpointIndex> {
        self.with_replay(name, |replay| {
            let entries = replay
                .checkpoints
                .iter()
                .map_while(|checkpoint| checkpoint.entry)
                .collect();
            Ok(CheckpointIndex::from_entries(entries))
        })
    }

    fn open_checkpoint(&self, name: &str, index: usize) -> Result<Box<dyn ReplayArchive>> {
        self.with_replay(name, |replay| {
            let checkpoint =
                replay
                    .sealed_checkpoint(index)
                    .ok_or(ReplayError::CheckpointOutOfRange {
                        index,
                        count: replay.sealed_count(),
                    })?;
            Ok(Box::new(MemoryArchive::reader(checkpoint.payload.clone()))
                as Box<dyn ReplayArchive>)
        })
    }

    fn set_total_time(&self, name: &str, length_ms: u32) -> Result<()> {
        self.with_replay_mut(name, |replay| {
            replay.length_ms = length_ms;
            Ok(())
        })
    }

    fn finalize(&self, name: &str, length_ms: u32) -> Result<()> {
        self.with_replay_mut(name, |replay| {
            replay.length_ms = length_ms;
            replay.live = false;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn descriptor(network_version: u32, changelist: u32) -> ReplayDescriptor {
        ReplayDescriptor {
            friendly_name: "Friendly".to_string(),
            user_names: vec!["player1".to_string()],
            version: ReplayVersion::new(network_version, changelist),
        }
    }

    #[test]
    fn test_create_find_and_finalize() {
        let store = InMemoryStore::new();
        assert!(store.find("match").unwrap().is_none());

        let info = store.create_or_replace("match", &descriptor(1, 2)).unwrap();
        assert!(info.is_live);
        assert_eq!(info.friendly_name, "Friendly");

        store.finalize("match", 4500).unwrap();
        let info = store.find("match").unwrap().unwrap();
        assert!(!info.is_live);
        assert_eq!(info.length_in_ms, 4500);
    }

    #[test]
    fn test_enumerate_includes_live_replays() {
        let store = InMemoryStore::new();
        store.create_or_replace("live", &descriptor(1, 1)).unwrap();
        store.create_or_replace("done", &descriptor(1, 1)).unwrap();
        store.finalize("done", 10).unwrap();

        let infos = store.enumerate(&ReplayVersion::any(), None).unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|info| info.name == "live" && info.is_live));
        assert!(infos.iter().any(|info| info.name == "done" && !info.is_live));
    }

    #[test]
    fn test_replace_detaches_open_archives() {
        let store = InMemoryStore::new();
        store.create_or_replace("match", &descriptor(1, 1)).unwrap();

        let mut old_writer = store
            .open_archive("match", StreamKind::Stream, ArchiveMode::Write)
            .unwrap();
        old_writer.write_all(b"old data").unwrap();

        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        old_writer.write_all(b"more").unwrap();

        let info = store.find("match").unwrap().unwrap();
        assert_eq!(info.size_in_bytes, 0);
    }

    #[test]
    fn test_unsealed_checkpoint_is_not_indexed() {
        let store = InMemoryStore::new();
        store.create_or_replace("match", &descriptor(1, 1)).unwrap();

        let (index, mut writer) = store.begin_checkpoint("match").unwrap();
        assert_eq!(index, 0);
        writer.write_all(b"snapshot").unwrap();

        assert!(store.checkpoints("match").unwrap().is_empty());
        assert!(store.open_checkpoint("match", 0).is_err());

        store
            .seal_checkpoint(
                "match",
                0,
                CheckpointEntry {
                    timestamp_ms: 100,
                    byte_offset: 0,
                },
            )
            .unwrap();

        assert_eq!(store.checkpoints("match").unwrap().len(), 1);
        let mut reader = store.open_checkpoint("match", 0).unwrap();
        assert_eq!(reader.read_remaining().unwrap(), b"snapshot");
    }

    #[test]
    fn test_finalized_replay_is_read_only() {
        let store = InMemoryStore::new();
        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        store.finalize("match", 0).unwrap();

        let err = store
            .open_archive("match", StreamKind::Stream, ArchiveMode::Write)
            .err();
        assert!(matches!(err, Some(ReplayError::ArchiveMode(_))));
        assert!(
            store
                .open_archive("match", StreamKind::Stream, ArchiveMode::Read)
                .is_ok()
        );
    }

    #[test]
    fn test_delete_respects_live_flag() {
        let store = InMemoryStore::new();
        assert!(!store.delete("missing").unwrap());

        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        assert!(!store.delete("match").unwrap());
        assert!(store.find("match").unwrap().is_some());

        store.finalize("match", 0).unwrap();
        assert!(store.delete("match").unwrap());
        assert!(store.is_empty());
    }
}
