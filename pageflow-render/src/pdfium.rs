use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pageflow_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    PageBitmap, RenderRequest, Rotation, Size,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

const LIBRARY_PATH_VAR: &str = "PAGEFLOW_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    /// Binds pdfium from `PAGEFLOW_PDFIUM_LIBRARY_PATH`, the working
    /// directory or the system library path, in that order.
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self))]
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = PdfiumDocument::new(Arc::clone(&self.pdfium), absolute)?;
        Ok(Arc::new(document))
    }
}

pub struct PdfiumDocument {
    // declared before `pdfium` so the document drops first
    document: Mutex<Option<PdfDocument<'static>>>,
    last_render: Mutex<Option<(RenderRequest, PageBitmap)>>,
    info: DocumentInfo,
    path: PathBuf,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let mut document = Self {
            document: Mutex::new(None),
            last_render: Mutex::new(None),
            info: DocumentInfo {
                id: document_id_for_path(&path),
                path: path.clone(),
                page_sizes: Vec::new(),
                metadata: DocumentMetadata::default(),
            },
            path,
            pdfium,
        };
        let (page_sizes, metadata) = document.with_document(|pdf| {
            Ok((collect_page_sizes(pdf), collect_metadata(pdf)))
        })?;
        debug!(
            pages = page_sizes.len(),
            path = %document.path.display(),
            "opened pdf document"
        );
        document.info.page_sizes = page_sizes;
        document.info.metadata = metadata;
        Ok(document)
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`.
        // It lives in `self.document`, which is declared (and therefore
        // dropped) before `self.pdfium`, so the borrow never dangles.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        let document = match guard.take() {
            Some(document) => document,
            None => self.open_document()?,
        };
        let result = f(&document);
        *guard = Some(document);
        result
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'_>,
        request: &RenderRequest,
    ) -> Result<PageBitmap> {
        let page_index: PdfPageIndex = request
            .page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", request.page_index))?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        // target size is given after rotation, pdfium wants it before
        let (width, height) = if request.rotation.swaps_axes() {
            (request.height, request.width)
        } else {
            (request.width, request.height)
        };
        let config = PdfRenderConfig::new()
            .set_target_size(to_pixels(width)?, to_pixels(height)?)
            .rotate(render_rotation(request.rotation), true);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let image = bitmap.as_image().to_rgba8();

        Ok(PageBitmap {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
        {
            let cache = self.last_render.lock();
            if let Some((cached, bitmap)) = cache.as_ref() {
                if *cached == request {
                    return Ok(bitmap.clone());
                }
            }
        }

        let bitmap = self.with_document(|document| self.render_internal(document, &request))?;

        *self.last_render.lock() = Some((request, bitmap.clone()));
        Ok(bitmap)
    }
}

fn collect_page_sizes(document: &PdfDocument<'_>) -> Vec<Size> {
    document
        .pages()
        .iter()
        .map(|page| Size::new(f64::from(page.width().value), f64::from(page.height().value)))
        .collect()
}

fn collect_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    DocumentMetadata {
        title: metadata
            .get(PdfDocumentMetadataTagType::Title)
            .map(|tag| tag.value().to_owned()),
        author: metadata
            .get(PdfDocumentMetadataTagType::Author)
            .map(|tag| tag.value().to_owned()),
    }
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}

fn to_pixels(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("target size {value} is too large"))
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(LIBRARY_PATH_VAR).ok().filter(|p| !p.is_empty())?;
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(%path, %err, "failed to load pdfium from {LIBRARY_PATH_VAR}");
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {LIBRARY_PATH_VAR} or install it ({})",
                errors.join(", ")
            ))
        }
    }
}
