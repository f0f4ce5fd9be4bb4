//! File-backed replay store
//!
//! Each replay is a directory under the store root:
//!
//! ```text
//! <root>/<name>/<name>.header
//! <root>/<name>/<name>.demo
//! <root>/<name>/<name>.metadata        (created when recording stops)
//! <root>/<name>/<name>.replayinfo      (JSON summary)
//! <root>/<name>/checkpoints/checkpointN
//! <root>/<name>/events/eventN          (JSON checkpoint descriptor)
//! ```
//!
//! A replay is live for as long as its `.metadata` file is missing. While
//! recording, metadata is written to `<name>.metadata.partial` and moved into
//! place on finalize.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ReplayStore;
use crate::archive::{ArchiveMode, FileArchive, MemoryArchive, ReplayArchive, StreamKind};
use crate::checkpoint::{CheckpointEntry, CheckpointIndex, ReplayEventInfo};
use crate::error::{ReplayError, Result};
use crate::model::{ReplayDescriptor, ReplayInfo, ReplayVersion};

const CHECKPOINTS_DIR: &str = "checkpoints";
const EVENTS_DIR: &str = "events";
const PARTIAL_SUFFIX: &str = ".partial";

/// On-disk `.replayinfo` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReplayInfoFile {
    #[serde(rename = "LengthInMS")]
    length_in_ms: u32,
    network_version: u32,
    changelist: u32,
    friendly_name: String,
    #[serde(default)]
    users: Vec<String>,
}

impl ReplayInfoFile {
    fn from_descriptor(descriptor: &ReplayDescriptor) -> Self {
        Self {
            length_in_ms: 0,
            network_version: descriptor.version.network_version,
            changelist: descriptor.version.changelist,
            friendly_name: descriptor.friendly_name.clone(),
            users: descriptor.user_names.clone(),
        }
    }

    fn version(&self) -> ReplayVersion {
        ReplayVersion::new(self.network_version, self.changelist)
    }
}

/// Replay store rooted at a directory on disk
///
/// Excludes live replays from enumeration.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stream_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn stream_file(&self, name: &str, extension: &str) -> Result<PathBuf> {
        Ok(self.stream_dir(name)?.join(format!("{}.{}", name, extension)))
    }

    fn kind_file(&self, name: &str, kind: StreamKind) -> Result<PathBuf> {
        let extension = match kind {
            StreamKind::Header => "header",
            StreamKind::Stream => "demo",
            StreamKind::Metadata => "metadata",
        };
        self.stream_file(name, extension)
    }

    fn partial_metadata_file(&self, name: &str) -> Result<PathBuf> {
        Ok(append_suffix(&self.kind_file(name, StreamKind::Metadata)?))
    }

    fn checkpoint_file(&self, name: &str, index: usize) -> Result<PathBuf> {
        Ok(self
            .stream_dir(name)?
            .join(CHECKPOINTS_DIR)
            .join(format!("checkpoint{}", index)))
    }

    fn event_file(&self, name: &str, index: usize) -> Result<PathBuf> {
        Ok(self
            .stream_dir(name)?
            .join(EVENTS_DIR)
            .join(format!("event{}", index)))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.stream_dir(name)?.is_dir())
    }

    fn require(&self, name: &str) -> Result<()> {
        if self.exists(name)? {
            Ok(())
        } else {
            Err(ReplayError::StreamNotFound(name.to_string()))
        }
    }

    fn read_info_file(&self, name: &str) -> Result<ReplayInfoFile> {
        let path = self.stream_file(name, "replayinfo")?;
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(stream = %name, "Replay has no replayinfo, using defaults");
                Ok(ReplayInfoFile::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_info_file(&self, name: &str, info: &ReplayInfoFile) -> Result<()> {
        let path = self.stream_file(name, "replayinfo")?;
        fs::write(path, serde_json::to_vec_pretty(info)?)?;
        Ok(())
    }

    fn update_info_file(&self, name: &str, f: impl FnOnce(&mut ReplayInfoFile)) -> Result<()> {
        self.require(name)?;
        let mut info = self.read_info_file(name)?;
        f(&mut info);
        self.write_info_file(name, &info)
    }

    fn live_on_disk(&self, name: &str) -> Result<bool> {
        Ok(!self.kind_file(name, StreamKind::Metadata)?.exists())
    }

    fn build_info(&self, name: &str) -> Result<ReplayInfo> {
        let info = self.read_info_file(name)?;
        let is_live = self.live_on_disk(name)?;

        let demo = self.kind_file(name, StreamKind::Stream)?;
        let metadata = if is_live {
            self.partial_metadata_file(name)?
        } else {
            self.kind_file(name, StreamKind::Metadata)?
        };
        let size_in_bytes = [self.kind_file(name, StreamKind::Header)?, demo.clone(), metadata]
            .iter()
            .map(|path| file_len(path))
            .sum();

        let dir = self.stream_dir(name)?;
        let modified = fs::metadata(&demo)
            .or_else(|_| fs::metadata(&dir))
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(ReplayInfo {
            name: name.to_string(),
            friendly_name: info.friendly_name.clone(),
            timestamp: modified,
            size_in_bytes,
            is_live,
            length_in_ms: info.length_in_ms,
            version: info.version(),
            user_names: info.users,
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(ReplayError::InvalidStreamName(name.to_string()));
    }
    Ok(())
}

fn append_suffix(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(PARTIAL_SUFFIX);
    PathBuf::from(raw)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

fn count_prefixed(dir: &Path, prefix: &str) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let is_indexed = file_name
            .to_str()
            .and_then(|s| s.strip_prefix(prefix))
            .is_some_and(|suffix| suffix.parse::<usize>().is_ok());
        if is_indexed {
            count += 1;
        }
    }
    Ok(count)
}

impl ReplayStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn find(&self, name: &str) -> Result<Option<ReplayInfo>> {
        if !self.exists(name)? {
            return Ok(None);
        }
        self.build_info(name).map(Some)
    }

    fn create_or_replace(&self, name: &str, descriptor: &ReplayDescriptor) -> Result<ReplayInfo> {
        let dir = self.stream_dir(name)?;
        if dir.exists() {
            tracing::debug!(stream = %name, "Removing existing replay directory");
            fs::remove_dir_all(&dir)?;
        }

        fs::create_dir_all(dir.join(CHECKPOINTS_DIR))?;
        fs::create_dir_all(dir.join(EVENTS_DIR))?;
        self.write_info_file(name, &ReplayInfoFile::from_descriptor(descriptor))?;

        self.build_info(name)
    }

    fn enumerate(&self, filter: &ReplayVersion, user: Option<&str>) -> Result<Vec<ReplayInfo>> {
        let mut infos = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_name(&name).is_err() || self.live_on_disk(&name)? {
                continue;
            }

            match self.build_info(&name) {
                Ok(info) if filter.matches(&info.version) && info.has_user(user) => {
                    infos.push(info)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(stream = %name, error = %e, "Skipping unreadable replay");
                }
            }
        }

        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        if !self.exists(name)? {
            return Ok(false);
        }
        if self.live_on_disk(name)? {
            tracing::warn!(stream = %name, "Refusing to delete live replay");
            return Ok(false);
        }

        fs::remove_dir_all(self.stream_dir(name)?)?;
        Ok(true)
    }

    fn is_live(&self, name: &str) -> Result<bool> {
        Ok(self.exists(name)? && self.live_on_disk(name)?)
    }

    fn open_archive(
        &self,
        name: &str,
        kind: StreamKind,
        mode: ArchiveMode,
    ) -> Result<Box<dyn ReplayArchive>> {
        self.require(name)?;
        if mode == ArchiveMode::Write && !self.live_on_disk(name)? {
            return Err(ReplayError::ArchiveMode(format!(
                "replay '{}' is finalized and cannot be written",
                name
            )));
        }

        let archive: Box<dyn ReplayArchive> = match (kind, mode) {
            (StreamKind::Metadata, ArchiveMode::Write) => {
                Box::new(FileArchive::create_writer(self.partial_metadata_file(name)?)?)
            }
            (StreamKind::Metadata, ArchiveMode::Read) => {
                let finished = self.kind_file(name, StreamKind::Metadata)?;
                let partial = self.partial_metadata_file(name)?;
                if finished.exists() {
                    Box::new(FileArchive::open_reader(finished)?)
                } else if partial.exists() {
                    Box::new(FileArchive::open_reader(partial)?)
                } else {
                    Box::new(MemoryArchive::empty_reader())
                }
            }
            (kind, ArchiveMode::Write) => {
                Box::new(FileArchive::create_writer(self.kind_file(name, kind)?)?)
            }
            (kind, ArchiveMode::Read) => {
                Box::new(FileArchive::open_reader(self.kind_file(name, kind)?)?)
            }
        };

        Ok(archive)
    }

    fn begin_checkpoint(&self, name: &str) -> Result<(usize, Box<dyn ReplayArchive>)> {
        self.require(name)?;
        let dir = self.stream_dir(name)?.join(CHECKPOINTS_DIR);
        fs::create_dir_all(&dir)?;

        let index = count_prefixed(&dir, "checkpoint")?;
        let writer = FileArchive::create_writer(self.checkpoint_file(name, index)?)?;
        Ok((index, Box::new(writer)))
    }

    fn seal_checkpoint(&self, name: &str, index: usize, entry: CheckpointEntry) -> Result<()> {
        self.require(name)?;
        let event = ReplayEventInfo::checkpoint(entry);
        fs::write(self.event_file(name, index)?, serde_json::to_vec(&event)?)?;
        Ok(())
    }

    fn abandon_checkpoint(&self, name: &str, index: usize) -> Result<()> {
        self.require(name)?;
        if self.event_file(name, index)?.exists() {
            return Ok(());
        }

        match fs::remove_file(self.checkpoint_file(name, index)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn checkpoints(&self, name: &str) -> Result<CheckpointIndex> {
        self.require(name)?;

        let mut entries = Vec::new();
        for index in 0.. {
            let bytes = match fs::read(self.event_file(name, index)?) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            };
            let event: ReplayEventInfo = serde_json::from_slice(&bytes)?;
            if let Some(entry) = event.to_checkpoint()? {
                entries.push(entry);
            }
        }

        Ok(CheckpointIndex::from_entries(entries))
    }

    fn open_checkpoint(&self, name: &str, index: usize) -> Result<Box<dyn ReplayArchive>> {
        self.require(name)?;

        if !self.event_file(name, index)?.exists() {
            let count = count_prefixed(&self.stream_dir(name)?.join(EVENTS_DIR), "event")?;
            return Err(ReplayError::CheckpointOutOfRange { index, count });
        }

        Ok(Box::new(FileArchive::open_reader(
            self.checkpoint_file(name, index)?,
        )?))
    }

    fn set_total_time(&self, name: &str, length_ms: u32) -> Result<()> {
        self.update_info_file(name, |info| info.length_in_ms = length_ms)
    }

    fn finalize(&self, name: &str, length_ms: u32) -> Result<()> {
        self.update_info_file(name, |info| info.length_in_ms = length_ms)?;

        let finished = self.kind_file(name, StreamKind::Metadata)?;
        let partial = self.partial_metadata_file(name)?;
        if partial.exists() {
            fs::rename(&partial, &finished)?;
        } else {
            fs::File::create(&finished)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ReplaySession, ReplayStreamer, StartStreamingRequest};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn descriptor(network_version: u32, changelist: u32) -> ReplayDescriptor {
        ReplayDescriptor {
            friendly_name: "Deathmatch".to_string(),
            user_names: vec!["alice".to_string(), "bob".to_string()],
            version: ReplayVersion::new(network_version, changelist),
        }
    }

    #[test]
    fn test_layout_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        store.create_or_replace("match", &descriptor(3, 100)).unwrap();
        let mut header = store
            .open_archive("match", StreamKind::Header, ArchiveMode::Write)
            .unwrap();
        header.write_all(b"hdr").unwrap();
        header.finish().unwrap();

        let dir = temp_dir.path().join("match");
        assert!(dir.join("match.header").exists());
        assert!(dir.join("match.replayinfo").exists());
        assert!(dir.join("checkpoints").is_dir());
        assert!(dir.join("events").is_dir());
        assert!(!dir.join("match.metadata").exists());

        let info: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.join("match.replayinfo")).unwrap()).unwrap();
        assert_eq!(info["LengthInMS"], 0);
        assert_eq!(info["NetworkVersion"], 3);
        assert_eq!(info["Changelist"], 100);
        assert_eq!(info["FriendlyName"], "Deathmatch");
    }

    #[test]
    fn test_live_until_metadata_exists() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        let mut metadata = store
            .open_archive("match", StreamKind::Metadata, ArchiveMode::Write)
            .unwrap();
        metadata.write_all(b"meta").unwrap();
        metadata.finish().unwrap();

        // Writing metadata during recording must not end the live window
        assert!(store.is_live("match").unwrap());

        store.finalize("match", 2500).unwrap();
        assert!(!store.is_live("match").unwrap());

        let info = store.find("match").unwrap().unwrap();
        assert_eq!(info.length_in_ms, 2500);
        assert_eq!(info.user_names, vec!["alice", "bob"]);

        let mut reader = store
            .open_archive("match", StreamKind::Metadata, ArchiveMode::Read)
            .unwrap();
        assert_eq!(reader.read_remaining().unwrap(), b"meta");
    }

    #[test]
    fn test_enumerate_skips_live_and_filters_versions() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        store.create_or_replace("live", &descriptor(1, 1)).unwrap();
        store.create_or_replace("v1", &descriptor(1, 10)).unwrap();
        store.finalize("v1", 0).unwrap();
        store.create_or_replace("v2", &descriptor(2, 20)).unwrap();
        store.finalize("v2", 0).unwrap();

        let all = store.enumerate(&ReplayVersion::any(), None).unwrap();
        let names: Vec<_> = all.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["v1", "v2"]);

        let v2 = store.enumerate(&ReplayVersion::new(2, 0), None).unwrap();
        assert_eq!(v2.len(), 1);
        assert_eq!(v2[0].name, "v2");

        assert!(store.enumerate(&ReplayVersion::new(1, 20), None).unwrap().is_empty());
    }

    #[test]
    fn test_replace_removes_previous_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        let (_, mut writer) = store.begin_checkpoint("match").unwrap();
        writer.write_all(b"cp").unwrap();
        writer.finish().unwrap();
        store
            .seal_checkpoint(
                "match",
                0,
                CheckpointEntry {
                    timestamp_ms: 10,
                    byte_offset: 0,
                },
            )
            .unwrap();
        assert_eq!(store.checkpoints("match").unwrap().len(), 1);

        store.create_or_replace("match", &descriptor(1, 1)).unwrap();
        assert!(store.checkpoints("match").unwrap().is_empty());
        assert!(!temp_dir.path().join("match/checkpoints/checkpoint0").exists());
    }

    #[test]
    fn test_checkpoint_events_are_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        store.create_or_replace("match", &descriptor(1, 1)).unwrap();

        for (i, offset) in [0u64, 64, 128].into_iter().enumerate() {
            let (index, mut writer) = store.begin_checkpoint("match").unwrap();
            assert_eq!(index, i);
            writer.write_all(&[i as u8; 4]).unwrap();
            writer.finish().unwrap();
            store
                .seal_checkpoint(
                    "match",
                    index,
                    CheckpointEntry {
                        timestamp_ms: (i as u32) * 1000,
                        byte_offset: offset,
                    },
                )
                .unwrap();
        }

        let index = store.checkpoints("match").unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(2).unwrap().byte_offset, 128);

        let event: serde_json::Value = serde_json::from_slice(
            &fs::read(temp_dir.path().join("match/events/event1")).unwrap(),
        )
        .unwrap();
        assert_eq!(event["meta"], "64");
        assert_eq!(event["group"], "checkpoint");

        let mut reader = store.open_checkpoint("match", 1).unwrap();
        assert_eq!(reader.read_remaining().unwrap(), vec![1u8; 4]);

        let err = store.open_checkpoint("match", 5).err().unwrap();
        assert!(matches!(
            err,
            ReplayError::CheckpointOutOfRange { index: 5, count: 3 }
        ));
    }

    #[test]
    fn test_stop_removes_unflushed_checkpoint_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let mut session = ReplaySession::new(store.clone());

        session
            .start_streaming(StartStreamingRequest::record("match"))
            .unwrap();
        session
            .checkpoint_archive()
            .unwrap()
            .write_all(b"never flushed")
            .unwrap();
        let payload = temp_dir.path().join("match/checkpoints/checkpoint0");
        assert!(payload.exists());

        session.stop_streaming().unwrap();
        assert!(!payload.exists());
        assert!(store.checkpoints("match").unwrap().is_empty());
        assert_eq!(store.begin_checkpoint("match").unwrap().0, 0);
    }

    #[test]
    fn test_rejects_path_like_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        for name in ["", "..", "a/b", "a\\b"] {
            let err = store.create_or_replace(name, &descriptor(1, 1)).unwrap_err();
            assert!(matches!(err, ReplayError::InvalidStreamName(_)));
        }
    }
}
