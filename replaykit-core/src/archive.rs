//! Byte archives backing the logical replay streams
//!
//! Every stream of a replay (header, main stream, metadata, checkpoint payloads)
//! is accessed through a [`ReplayArchive`]: a positioned cursor that is either
//! loading (reading) or saving (writing). Two implementations exist:
//!
//! - [`MemoryArchive`] over a [`SharedBuffer`], so a playback cursor observes bytes
//!   appended by a recorder holding the same buffer
//! - [`FileArchive`] over a file on disk, re-measuring its length on every query so
//!   a reader sees a growing live file

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Direction an archive was opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    /// Loading: bytes are read from the archive
    Read,
    /// Saving: bytes are appended to the archive
    Write,
}

/// The per-replay byte streams addressable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Protocol/header negotiation data, written once at recording start
    Header,
    /// Append-only packet stream
    Stream,
    /// Side-channel metadata
    Metadata,
}

/// A positioned byte cursor over one replay stream
pub trait ReplayArchive: Read + Write + Send {
    /// Mode the archive was opened in
    fn mode(&self) -> ArchiveMode;

    /// Current cursor position in bytes
    fn tell(&self) -> u64;

    /// Number of bytes currently in the underlying stream
    fn total_size(&self) -> u64;

    /// Move the cursor to an absolute position (at most `total_size`)
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;

    /// Push any buffered bytes to the backing store
    fn finish(&mut self) -> io::Result<()>;

    /// Whether this is a loading archive
    fn is_loading(&self) -> bool {
        self.mode() == ArchiveMode::Read
    }

    /// Whether the cursor has reached the end of the stream
    fn at_end(&self) -> bool {
        self.tell() >= self.total_size()
    }

    /// Read everything from the cursor to the end of the stream
    fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

fn wrong_mode(expected: ArchiveMode) -> io::Error {
    let message = match expected {
        ArchiveMode::Read => "archive is not open for reading",
        ArchiveMode::Write => "archive is not open for writing",
    };
    io::Error::new(io::ErrorKind::Unsupported, message)
}

fn seek_past_end(pos: u64, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("seek to {} past end of stream ({} bytes)", pos, size),
    )
}

/// Reference-counted byte buffer shared between a replay and its open archives
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Archive over a [`SharedBuffer`]
#[derive(Debug)]
pub struct MemoryArchive {
    buffer: SharedBuffer,
    pos: u64,
    mode: ArchiveMode,
}

impl MemoryArchive {
    /// Open a loading archive positioned at the start of `buffer`
    pub fn reader(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            pos: 0,
            mode: ArchiveMode::Read,
        }
    }

    /// Open a saving archive positioned at the end of `buffer`
    pub fn writer(buffer: SharedBuffer) -> Self {
        let pos = buffer.len() as u64;
        Self {
            buffer,
            pos,
            mode: ArchiveMode::Write,
        }
    }

    /// An empty loading archive, used when rewinding to the stream start
    pub fn empty_reader() -> Self {
        Self::reader(SharedBuffer::new())
    }

    /// The buffer this archive is bound to
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl Read for MemoryArchive {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.mode != ArchiveMode::Read {
            return Err(wrong_mode(ArchiveMode::Read));
        }

        let bytes = self.buffer.read();
        let start = (self.pos as usize).min(bytes.len());
        let count = out.len().min(bytes.len() - start);
        out[..count].copy_from_slice(&bytes[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl Write for MemoryArchive {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.mode != ArchiveMode::Write {
            return Err(wrong_mode(ArchiveMode::Write));
        }

        let mut bytes = self.buffer.write();
        let start = self.pos as usize;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        self.pos = end as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ReplayArchive for MemoryArchive {
    fn mode(&self) -> ArchiveMode {
        self.mode
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn total_size(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        let size = self.total_size();
        if pos > size {
            return Err(seek_past_end(pos, size));
        }
        self.pos = pos;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum FileHandle {
    Reader(File),
    Writer(BufWriter<File>),
}

/// Archive over a file on disk
pub struct FileArchive {
    handle: FileHandle,
    path: PathBuf,
    pos: u64,
}

impl FileArchive {
    /// Open `path` for reading from the start
    pub fn open_reader(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            handle: FileHandle::Reader(file),
            path,
            pos: 0,
        })
    }

    /// Create (or truncate) `path` for writing
    pub fn create_writer(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            handle: FileHandle::Writer(BufWriter::new(file)),
            path,
            pos: 0,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileArchive {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match &mut self.handle {
            FileHandle::Reader(file) => {
                let count = file.read(out)?;
                self.pos += count as u64;
                Ok(count)
            }
            FileHandle::Writer(_) => Err(wrong_mode(ArchiveMode::Read)),
        }
    }
}

impl Write for FileArchive {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.handle {
            FileHandle::Writer(writer) => {
                let count = writer.write(data)?;
                self.pos += count as u64;
                Ok(count)
            }
            FileHandle::Reader(_) => Err(wrong_mode(ArchiveMode::Write)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.handle {
            FileHandle::Writer(writer) => writer.flush(),
            FileHandle::Reader(_) => Ok(()),
        }
    }
}

impl ReplayArchive for FileArchive {
    fn mode(&self) -> ArchiveMode {
        match self.handle {
            FileHandle::Reader(_) => ArchiveMode::Read,
            FileHandle::Writer(_) => ArchiveMode::Write,
        }
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn total_size(&self) -> u64 {
        match &self.handle {
            // Re-measured each time so a reader follows a file still being recorded
            FileHandle::Reader(file) => file.metadata().map(|m| m.len()).unwrap_or(self.pos),
            FileHandle::Writer(_) => self.pos,
        }
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        let size = self.total_size();
        match &mut self.handle {
            FileHandle::Reader(file) => {
                if pos > size {
                    return Err(seek_past_end(pos, size));
                }
                file.seek(SeekFrom::Start(pos))?;
                self.pos = pos;
                Ok(())
            }
            FileHandle::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file writers are append-only",
            )),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}
