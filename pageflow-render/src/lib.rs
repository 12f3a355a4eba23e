//! Page rasterisers behind [`pageflow_core::DocumentProvider`].

#[cfg(feature = "pdf")]
mod pdfium;
mod synthetic;

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider};
pub use synthetic::{SyntheticDocument, SyntheticError, SyntheticProvider};
