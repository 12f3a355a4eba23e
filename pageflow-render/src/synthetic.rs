//! Procedurally drawn documents. Useful for trying layouts without a PDF
//! engine and for exercising the render pipeline in tests.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use image::{imageops, RgbaImage};
use pageflow_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    PageBitmap, RenderRequest, Rotation, Size,
};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{instrument, trace};

/// US Letter in points.
const PORTRAIT: Size = Size {
    width: 612.0,
    height: 792.0,
};

const BORDER: u32 = 4;
const STRIPE: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntheticError {
    #[error("page {index} is out of range for a {count} page document")]
    PageOutOfRange { index: usize, count: usize },
    #[error("cannot render page {0} into an empty bitmap")]
    EmptyTarget(usize),
}

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    pages: usize,
    landscape_every: Option<usize>,
    delay: Duration,
}

impl SyntheticProvider {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            landscape_every: None,
            delay: Duration::ZERO,
        }
    }

    /// Every `n`th page is landscape, so mixed page sizes can be tried.
    pub fn with_landscape_every(mut self, n: usize) -> Self {
        self.landscape_every = (n > 0).then_some(n);
        self
    }

    /// Artificial per-page render cost.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn page_sizes(&self) -> Vec<Size> {
        (0..self.pages)
            .map(|index| match self.landscape_every {
                Some(n) if (index + 1) % n == 0 => PORTRAIT.rotated(Rotation::Deg90),
                _ => PORTRAIT,
            })
            .collect()
    }
}

#[async_trait]
impl DocumentProvider for SyntheticProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let info = DocumentInfo {
            id: document_id_for_path(path),
            path: path.to_path_buf(),
            page_sizes: self.page_sizes(),
            metadata: DocumentMetadata {
                title: Some(format!("Synthetic document ({} pages)", self.pages)),
                author: None,
            },
        };
        Ok(Arc::new(SyntheticDocument {
            info,
            delay: self.delay,
        }))
    }
}

pub struct SyntheticDocument {
    info: DocumentInfo,
    delay: Duration,
}

impl DocumentBackend for SyntheticDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self), fields(document = %self.info.display_name()))]
    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
        let count = self.info.page_count();
        if request.page_index >= count {
            return Err(SyntheticError::PageOutOfRange {
                index: request.page_index,
                count,
            }
            .into());
        }
        if request.width == 0 || request.height == 0 {
            return Err(SyntheticError::EmptyTarget(request.page_index).into());
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        // draw upright, then turn the finished page
        let (width, height) = if request.rotation.swaps_axes() {
            (request.height, request.width)
        } else {
            (request.width, request.height)
        };
        let upright = draw_page(request.page_index, width, height);
        let image = match request.rotation {
            Rotation::Deg0 => upright,
            Rotation::Deg90 => imageops::rotate90(&upright),
            Rotation::Deg180 => imageops::rotate180(&upright),
            Rotation::Deg270 => imageops::rotate270(&upright),
        };
        trace!(width = image.width(), height = image.height(), "drew page");

        Ok(PageBitmap {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

fn page_tint(page: usize) -> [u8; 3] {
    // spread hues so neighbouring pages are easy to tell apart
    let hash = (page as u32).wrapping_mul(2_654_435_761);
    [
        160 + (hash & 0x3f) as u8,
        160 + ((hash >> 8) & 0x3f) as u8,
        160 + ((hash >> 16) & 0x3f) as u8,
    ]
}

fn draw_page(page: usize, width: u32, height: u32) -> RgbaImage {
    let tint = page_tint(page);
    let row_len = width as usize * 4;
    let mut pixels = vec![0u8; row_len * height as usize];

    pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                let border = x < BORDER
                    || y < BORDER
                    || x >= width.saturating_sub(BORDER)
                    || y >= height.saturating_sub(BORDER);
                // top-left marker shows which way is up after rotation
                let marker = x < width / 4 && y < height / 8;
                let colour = if border {
                    [40, 40, 40]
                } else if marker {
                    [200, 40, 40]
                } else if ((x + y) / STRIPE) % 2 == 0 {
                    tint
                } else {
                    [255, 255, 255]
                };
                pixel[..3].copy_from_slice(&colour);
                pixel[3] = 255;
            }
        });

    RgbaImage::from_raw(width, height, pixels).unwrap_or_else(|| RgbaImage::new(width, height))
}
