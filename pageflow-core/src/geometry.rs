//! Per-document layout parameters and the grid/canvas sizes derived from them.
//!
//! Every mutator recomputes the cached cell and canvas sizes, so the getters
//! never do work and never observe a half-updated layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("scale must be finite and greater than zero, got {0}")]
    InvalidScale(f64),
    #[error("page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, scale: f64) -> Self {
        Self::new(self.width * scale, self.height * scale)
    }

    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.swaps_axes() {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }

    fn is_degenerate(self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Reduces any degree value onto the four right angles, snapping down.
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) / 90 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn rotate_by(self, delta: i64) -> Self {
        Self::from_degrees(i64::from(self.degrees()) + delta)
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Policy for fitting pages to the viewport. Stored here, consumed by whatever
/// picks the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustMode {
    FitWidth,
    FitHeight,
    FitBest,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub padding: u32,
    pub pages_per_row: u32,
    pub first_page_column: u32,
}

impl LayoutConfig {
    /// Builds a layout from unvalidated input. Negative padding becomes 0,
    /// `pages_per_row` is at least 1 and `first_page_column` wraps into
    /// `1..=pages_per_row`.
    pub fn clamped(padding: i64, pages_per_row: i64, first_page_column: i64) -> Self {
        let padding = clamp_to_u32(padding, 0);
        let pages_per_row = clamp_to_u32(pages_per_row, 1);
        let first_page_column = clamp_to_u32(first_page_column, 1);
        let first_page_column = ((first_page_column - 1) % pages_per_row) + 1;
        Self {
            padding,
            pages_per_row,
            first_page_column,
        }
    }

    /// Grid cell (row, column) of the page at `index`.
    pub fn grid_position(&self, index: usize) -> (usize, usize) {
        let slot = index + self.first_page_column as usize - 1;
        let per_row = self.pages_per_row as usize;
        (slot / per_row, slot % per_row)
    }

    pub fn rows_for(&self, page_count: usize) -> usize {
        let slots = page_count + self.first_page_column as usize - 1;
        slots.div_ceil(self.pages_per_row as usize)
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            padding: 1,
            pages_per_row: 1,
            first_page_column: 1,
        }
    }
}

fn clamp_to_u32(value: i64, min: u32) -> u32 {
    u32::try_from(value.max(i64::from(min))).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DocumentGeometry {
    pages: Vec<Size>,
    scale: f64,
    rotation: Rotation,
    adjust_mode: AdjustMode,
    layout: LayoutConfig,
    viewport: ViewportSize,
    current_page: usize,
    cell: Option<Size>,
    canvas: Option<Size>,
}

impl DocumentGeometry {
    pub fn new(pages: Vec<Size>) -> Self {
        let mut geometry = Self {
            pages,
            scale: 1.0,
            rotation: Rotation::Deg0,
            adjust_mode: AdjustMode::None,
            layout: LayoutConfig::default(),
            viewport: ViewportSize::default(),
            current_page: 0,
            cell: None,
            canvas: None,
        };
        geometry.relayout();
        geometry
    }

    pub fn set_scale(&mut self, scale: f64) -> Result<(), GeometryError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(GeometryError::InvalidScale(scale));
        }
        self.scale = scale;
        self.relayout();
        Ok(())
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
        self.relayout();
    }

    pub fn set_layout(&mut self, padding: i64, pages_per_row: i64, first_page_column: i64) {
        self.layout = LayoutConfig::clamped(padding, pages_per_row, first_page_column);
        self.relayout();
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        self.viewport = ViewportSize { width, height };
        self.relayout();
    }

    pub fn set_page_size(&mut self, index: usize, size: Size) -> Result<(), GeometryError> {
        let count = self.pages.len();
        let slot = self
            .pages
            .get_mut(index)
            .ok_or(GeometryError::PageOutOfRange { index, count })?;
        *slot = size;
        self.relayout();
        Ok(())
    }

    pub fn set_adjust_mode(&mut self, mode: AdjustMode) {
        self.adjust_mode = mode;
    }

    /// Clamps `page` into the document and returns the page that was set.
    pub fn set_current_page(&mut self, page: usize) -> usize {
        self.current_page = page.min(self.pages.len().saturating_sub(1));
        self.current_page
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_size(&self, index: usize) -> Option<Size> {
        self.pages.get(index).copied()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn adjust_mode(&self) -> AdjustMode {
        self.adjust_mode
    }

    pub fn layout(&self) -> LayoutConfig {
        self.layout
    }

    pub fn viewport(&self) -> ViewportSize {
        self.viewport
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Size of one grid cell at the current scale and rotation. All cells
    /// share it: it is large enough for the widest and the tallest page.
    pub fn cell_size(&self) -> Option<Size> {
        self.cell
    }

    /// Size of the whole canvas, padding included.
    pub fn document_size(&self) -> Option<Size> {
        self.canvas
    }

    fn relayout(&mut self) {
        let transform = |page: &Size| page.rotated(self.rotation).scaled(self.scale);
        let cell = self.pages.iter().map(transform).fold(Size::default(), |acc, page| {
            Size::new(acc.width.max(page.width), acc.height.max(page.height))
        });

        if self.pages.is_empty() || cell.is_degenerate() {
            self.cell = None;
            self.canvas = None;
            return;
        }

        let padding = f64::from(self.layout.padding);
        let columns = self.layout.pages_per_row as f64;
        let rows = self.layout.rows_for(self.pages.len()) as f64;
        self.cell = Some(cell);
        self.canvas = Some(Size::new(
            columns * cell.width + (columns + 1.0) * padding,
            rows * cell.height + (rows + 1.0) * padding,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(count: usize, width: f64, height: f64) -> DocumentGeometry {
        DocumentGeometry::new(vec![Size::new(width, height); count])
    }

    #[test]
    fn pages_per_row_is_clamped_to_one() {
        let mut geometry = uniform(4, 100.0, 100.0);
        for requested in [0, -1, -250, i64::MIN] {
            geometry.set_layout(5, requested, 1);
            assert_eq!(geometry.layout().pages_per_row, 1);
        }
    }

    #[test]
    fn first_page_column_wraps_into_row() {
        assert_eq!(LayoutConfig::clamped(0, 2, 0).first_page_column, 1);
        assert_eq!(LayoutConfig::clamped(0, 2, 2).first_page_column, 2);
        assert_eq!(LayoutConfig::clamped(0, 2, 3).first_page_column, 1);
        assert_eq!(LayoutConfig::clamped(0, 3, 5).first_page_column, 2);
        assert_eq!(LayoutConfig::clamped(-4, 1, 1).padding, 0);
    }

    #[test]
    fn rotation_is_normalised_to_right_angles() {
        assert_eq!(Rotation::from_degrees(0), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(450), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(179), Rotation::Deg90);
        assert_eq!(Rotation::Deg270.rotate_by(90), Rotation::Deg0);
    }

    #[test]
    fn cell_fits_largest_page_in_each_dimension() {
        let mut geometry = DocumentGeometry::new(vec![
            Size::new(100.0, 300.0),
            Size::new(250.0, 120.0),
        ]);
        assert_eq!(geometry.cell_size(), Some(Size::new(250.0, 300.0)));

        geometry.set_rotation(Rotation::Deg90);
        assert_eq!(geometry.cell_size(), Some(Size::new(300.0, 250.0)));
    }

    #[test]
    fn document_size_counts_rows_with_leading_empty_cells() {
        let mut geometry = uniform(5, 100.0, 200.0);
        geometry.set_layout(10, 2, 2);
        // slots: _ 0 | 1 2 | 3 4 -> 3 rows
        assert_eq!(geometry.layout().rows_for(5), 3);
        assert_eq!(
            geometry.document_size(),
            Some(Size::new(2.0 * 100.0 + 3.0 * 10.0, 3.0 * 200.0 + 4.0 * 10.0))
        );
    }

    #[test]
    fn sizes_scale_linearly_without_padding() {
        let mut geometry = DocumentGeometry::new(vec![
            Size::new(612.0, 792.0),
            Size::new(595.0, 842.0),
            Size::new(300.0, 400.0),
        ]);
        geometry.set_layout(0, 2, 1);
        for scale in [0.3, 1.0, 1.7, 3.25] {
            geometry.set_scale(scale).unwrap();
            let cell = geometry.cell_size().unwrap();
            let canvas = geometry.document_size().unwrap();
            geometry.set_scale(scale * 2.0).unwrap();
            assert_eq!(geometry.cell_size().unwrap(), cell.scaled(2.0));
            assert_eq!(geometry.document_size().unwrap(), canvas.scaled(2.0));
        }
    }

    #[test]
    fn invalid_scale_is_rejected_without_side_effects() {
        let mut geometry = uniform(2, 100.0, 100.0);
        geometry.set_scale(2.0).unwrap();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(geometry.set_scale(bad).is_err());
        }
        assert_eq!(geometry.scale(), 2.0);
        assert_eq!(geometry.cell_size(), Some(Size::new(200.0, 200.0)));
    }

    #[test]
    fn empty_or_degenerate_documents_have_no_layout() {
        assert_eq!(DocumentGeometry::new(Vec::new()).document_size(), None);
        assert_eq!(uniform(3, 0.0, 100.0).cell_size(), None);
    }

    #[test]
    fn current_page_is_always_a_valid_index() {
        let mut geometry = uniform(10, 10.0, 10.0);
        assert_eq!(geometry.set_current_page(42), 9);
        assert_eq!(geometry.set_current_page(3), 3);
        assert_eq!(DocumentGeometry::new(Vec::new()).set_current_page(7), 0);
    }

    #[test]
    fn page_size_updates_relayout() {
        let mut geometry = uniform(2, 100.0, 100.0);
        geometry.set_page_size(1, Size::new(100.0, 400.0)).unwrap();
        assert_eq!(geometry.cell_size(), Some(Size::new(100.0, 400.0)));
        assert_eq!(
            geometry.set_page_size(2, Size::new(1.0, 1.0)),
            Err(GeometryError::PageOutOfRange { index: 2, count: 2 })
        );
    }
}
