//! Per-document view state kept between sessions.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::document::{DocumentId, DocumentInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedViewState {
    pub current_page: usize,
    pub scale: f64,
    /// Degrees, one of 0/90/180/270.
    pub rotation: u32,
    pub pages_per_row: u32,
    pub first_page_column: u32,
    /// Scroll position relative to the document width, 0 = left.
    pub position_x: f64,
    /// Scroll position relative to the document height, 0 = top.
    pub position_y: f64,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            current_page: 0,
            scale: 1.0,
            rotation: 0,
            pages_per_row: 1,
            first_page_column: 1,
            position_x: 0.0,
            position_y: 0.0,
        }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>>;
    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()>;
}

/// One JSON file per document id under `root`. Saves are staged in a temp
/// file next to the target and renamed over it.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("cannot create view state directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, id: DocumentId) -> PathBuf {
        self.root.join(id.to_string()).with_extension("json")
    }
}

impl StateStore for FileStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        let path = self.file_for(doc.id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .with_context(|| format!("{} is not a valid view state", path.display()))
    }

    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        let path = self.file_for(doc.id);
        let mut staged = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("staging view state in {}", self.root.display()))?;
        serde_json::to_writer_pretty(&mut staged, state)?;
        staged.as_file().sync_all()?;
        staged
            .persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("replacing {}", path.display()))?;
        debug!(document = %doc.display_name(), path = %path.display(), "saved view state");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(&doc.id).cloned())
    }

    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(doc.id, state.clone());
        Ok(())
    }
}
