//! Streamer factory
//!
//! A factory owns one registry instance and hands out sessions that share it,
//! so every streamer it creates sees the same replays.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ReplayConfig, StoreConfig};
use crate::error::Result;
use crate::session::{DEFAULT_NAME_PREFIX, ReplaySession, ReplayStreamer};
use crate::store::{FileStore, InMemoryStore, ReplayStore};

/// Creates [`ReplayStreamer`]s over a shared store
#[derive(Clone)]
pub struct ReplayStreamerFactory {
    store: Arc<dyn ReplayStore>,
    name_prefix: String,
}

impl ReplayStreamerFactory {
    /// Build the store described by `config`
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Memory => Ok(Self::in_memory()),
            StoreConfig::File { root_dir } => Self::file(root_dir.clone()),
        }
    }

    /// Build the store and name prefix from a full configuration
    pub fn from_replay_config(config: &ReplayConfig) -> Result<Self> {
        Ok(Self::from_config(&config.store)?.with_name_prefix(&config.recording.name_prefix))
    }

    /// Factory over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    /// Factory over a file store rooted at `root`
    pub fn file(root: impl Into<PathBuf>) -> Result<Self> {
        let store = FileStore::open(root)?;
        tracing::info!(root = %store.root().display(), "Opened file replay store");
        Ok(Self::with_store(Arc::new(store)))
    }

    /// Factory over an existing store
    pub fn with_store(store: Arc<dyn ReplayStore>) -> Self {
        Self {
            store,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }

    /// Set the prefix used for generated stream names
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// A new idle streamer over the shared store
    pub fn create_streamer(&self) -> Box<dyn ReplayStreamer> {
        Box::new(
            ReplaySession::new(Arc::clone(&self.store)).with_name_prefix(self.name_prefix.clone()),
        )
    }

    /// The shared registry
    pub fn store(&self) -> &Arc<dyn ReplayStore> {
        &self.store
    }
}
