//! Page layout, visibility tracking and asynchronous page rendering for a
//! paginated document viewer.
//!
//! [`Viewer`] is the entry point: feed it scroll, geometry, setting and
//! navigation events from the interactive thread, drain finished renders
//! with [`Viewer::pump`] or [`Viewer::next_completion`], and paint whatever
//! [`Viewer::surface`] returns for the visible pages.

pub mod config;
pub mod dispatch;
pub mod document;
pub mod geometry;
pub mod layout;
pub mod navigation;
pub mod notify;
pub mod state;
pub mod surface;
pub mod viewer;
pub mod viewport;

pub use config::ViewerConfig;
pub use dispatch::{DispatchError, RenderCompletion, RenderDispatcher, RenderJob, RenderKey};
pub use document::{
    document_id_for_path, DocumentBackend, DocumentId, DocumentInfo, DocumentMetadata,
    DocumentProvider, PageBitmap, RenderRequest,
};
pub use geometry::{
    AdjustMode, DocumentGeometry, GeometryError, LayoutConfig, Rotation, Size, ViewportSize,
};
pub use layout::{LayoutEngine, Offset, PageBounds};
pub use navigation::{
    IndexElement, IndexPanel, NavigationController, NavigationOutcome, NavigationTarget,
    UriOpener, EXTERNAL_LINK_FAILED,
};
pub use notify::{NotificationSink, Severity, TracingNotifier};
pub use state::{FileStateStore, MemoryStateStore, PersistedViewState, StateStore};
pub use surface::{Acquire, CompletionOutcome, PageSurfaceCache};
pub use viewer::{GeometryChange, SettingChange, Viewer, ViewerEvent};
pub use viewport::{Classification, Overlap, ScrollWindow, Viewport, ViewportClassifier};
