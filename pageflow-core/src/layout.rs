use crate::geometry::{DocumentGeometry, Size};

/// Top-left canvas position of a page.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBounds {
    pub offset: Offset,
    /// Scaled and rotated page extent. Never larger than the cell.
    pub size: Size,
}

impl PageBounds {
    pub fn bottom(&self) -> f64 {
        self.offset.y + self.size.height
    }

    pub fn right(&self) -> f64 {
        self.offset.x + self.size.width
    }
}

/// Maps page indices onto the canvas. Holds no state of its own, so offsets
/// are always consistent with the geometry they were taken from.
#[derive(Debug, Clone, Copy)]
pub struct LayoutEngine<'a> {
    geometry: &'a DocumentGeometry,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(geometry: &'a DocumentGeometry) -> Self {
        Self { geometry }
    }

    /// `None` means the layout is not established yet (no usable page sizes)
    /// or the index is outside the document. Callers skip such pages.
    pub fn offset(&self, index: usize) -> Option<Offset> {
        if index >= self.geometry.page_count() {
            return None;
        }
        let cell = self.geometry.cell_size()?;
        let layout = self.geometry.layout();
        let padding = f64::from(layout.padding);
        let (row, column) = layout.grid_position(index);
        Some(Offset {
            x: column as f64 * (cell.width + padding) + padding,
            y: row as f64 * (cell.height + padding) + padding,
        })
    }

    pub fn page_extent(&self, index: usize) -> Option<Size> {
        let page = self.geometry.page_size(index)?;
        Some(
            page.rotated(self.geometry.rotation())
                .scaled(self.geometry.scale()),
        )
    }

    pub fn bounds(&self, index: usize) -> Option<PageBounds> {
        Some(PageBounds {
            offset: self.offset(index)?,
            size: self.page_extent(index)?,
        })
    }

    pub fn page_count(&self) -> usize {
        self.geometry.page_count()
    }

    /// Vertical scroll value that puts the top of `index` at the top of the
    /// viewport, limited to the scrollable range.
    pub fn scroll_target(&self, index: usize) -> Option<f64> {
        let offset = self.offset(index)?;
        Some(clamp_scroll(
            offset.y,
            self.geometry.document_size()?.height,
            f64::from(self.geometry.viewport().height),
        ))
    }
}

/// Limits a scroll value to `[0, content - viewport]`.
pub fn clamp_scroll(value: f64, content: f64, viewport: f64) -> f64 {
    let max = (content - viewport).max(0.0);
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}
