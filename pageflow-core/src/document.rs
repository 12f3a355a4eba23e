use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Rotation, Size};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0d7a52-6c1e-5b8e-9a47-d2c1b0e4f719").expect("valid namespace UUID")
});

/// Stable identifier for a document. Paths that do not exist (yet) are
/// made absolute lexically so the id still survives a change of directory.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let key = path
        .canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf());
    Uuid::new_v5(&DOCUMENT_NAMESPACE, key.as_os_str().as_encoded_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// What a backend knows about an opened document. Page indices are fixed for
/// the lifetime of the document.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    /// Intrinsic (unscaled, unrotated) size of every page.
    pub page_sizes: Vec<Size>,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    pub fn display_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("<unknown>")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub page_index: usize,
    /// Target bitmap width in device pixels, after rotation.
    pub width: u32,
    /// Target bitmap height in device pixels, after rotation.
    pub height: u32,
    pub rotation: Rotation,
}

/// Rasterised page, RGBA8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PageBitmap {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}
