//! The interactive side: owns the geometry, the page surfaces and navigation
//! state, and is the only writer of any of them.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::{ViewerConfig, ZoomSettings};
use crate::dispatch::{DispatchError, RenderCompletion, RenderDispatcher, RenderJob, RenderKey};
use crate::document::{DocumentBackend, DocumentInfo, PageBitmap, RenderRequest};
use crate::geometry::{AdjustMode, DocumentGeometry, GeometryError, Rotation, Size};
use crate::layout::{clamp_scroll, LayoutEngine};
use crate::navigation::{
    DelayedScroll, IndexPanel, NavigationController, NavigationOutcome, NavigationTarget,
    UriOpener,
};
use crate::notify::{NotificationSink, Severity};
use crate::state::PersistedViewState;
use crate::surface::{CompletionOutcome, PageSurfaceCache};
use crate::viewport::{Classification, ScrollWindow, Viewport, ViewportClassifier};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerEvent {
    RedrawNeeded,
    CurrentPageChanged(usize),
    /// The host should move its scroll bars here.
    ScrollRequested { x: f64, y: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryChange {
    Scale(f64),
    ZoomBy(f64),
    Rotation(Rotation),
    RotateBy(i64),
    Layout {
        padding: i64,
        pages_per_row: i64,
        first_page_column: i64,
    },
    ViewportSize {
        width: u32,
        height: u32,
    },
    PageSize {
        index: usize,
        size: Size,
    },
}

/// Typed setting updates. Out-of-range values are clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingChange {
    PagesPerRow(i64),
    PagePadding(i64),
    FirstPageColumn(i64),
    ZoomRange { min: f64, max: f64 },
    AdjustMode(AdjustMode),
}

pub struct Viewer {
    info: DocumentInfo,
    geometry: DocumentGeometry,
    surfaces: PageSurfaceCache,
    navigation: NavigationController,
    notifier: Arc<dyn NotificationSink>,
    zoom: ZoomSettings,
    page_generation: u64,
    scroll_x: f64,
    scroll_y: f64,
    horizontal: bool,
    classification: Classification,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl Viewer {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        config: &ViewerConfig,
        notifier: Arc<dyn NotificationSink>,
        opener: Arc<dyn UriOpener>,
    ) -> Result<Self, DispatchError> {
        let info = backend.info().clone();
        let mut geometry = DocumentGeometry::new(info.page_sizes.clone());
        geometry.set_layout(
            config.layout.padding,
            config.layout.pages_per_row,
            config.layout.first_page_column,
        );
        geometry.set_adjust_mode(config.adjust_mode);
        if let Err(err) = geometry.set_scale(config.zoom.clamp(config.zoom.default)) {
            warn!(%err, "ignoring configured default zoom");
        }

        let page_count = info.page_count();
        let dispatcher = RenderDispatcher::new(backend, config.render.workers)?;
        let navigation = NavigationController::new(
            opener,
            Arc::clone(&notifier),
            config.navigation.settle_delay,
        );

        Ok(Self {
            info,
            geometry,
            surfaces: PageSurfaceCache::new(page_count, dispatcher),
            navigation,
            notifier,
            zoom: config.zoom,
            page_generation: 0,
            scroll_x: 0.0,
            scroll_y: 0.0,
            horizontal: false,
            classification: Classification::hidden(page_count),
            events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn geometry(&self) -> &DocumentGeometry {
        &self.geometry
    }

    pub fn layout(&self) -> LayoutEngine<'_> {
        LayoutEngine::new(&self.geometry)
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn visible_pages(&self) -> Vec<usize> {
        self.classification.visible_pages().collect()
    }

    pub fn surface(&self, page: usize) -> Option<&PageBitmap> {
        self.surfaces.surface(page)
    }

    pub fn resident_pages(&self) -> Vec<usize> {
        self.surfaces.resident_pages().collect()
    }

    pub fn resident_bytes(&self) -> usize {
        self.surfaces.resident_bytes()
    }

    pub fn in_flight(&self) -> usize {
        self.surfaces.in_flight()
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        (self.scroll_x, self.scroll_y)
    }

    /// Scroll position relative to the document size, both in `0..=1`.
    pub fn relative_position(&self) -> (f64, f64) {
        match self.geometry.document_size() {
            Some(canvas) => (
                ratio(self.scroll_x, canvas.width),
                ratio(self.scroll_y, canvas.height),
            ),
            None => (0.0, 0.0),
        }
    }

    pub fn pending_navigation(&self) -> Option<DelayedScroll> {
        self.navigation.pending()
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ViewerEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn take_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Also classify against the horizontal window, for hosts that scroll
    /// sideways.
    pub fn set_horizontal_scrolling(&mut self, enabled: bool) {
        self.horizontal = enabled;
        self.reclassify();
    }

    pub fn on_scroll(&mut self, y: f64) {
        self.on_scroll_to(self.scroll_x, y);
    }

    pub fn on_scroll_to(&mut self, x: f64, y: f64) {
        self.scroll_x = x;
        self.scroll_y = y;
        self.clamp_scroll();
        self.reclassify();
    }

    #[instrument(skip(self))]
    pub fn on_geometry_changed(&mut self, change: GeometryChange) -> Result<(), GeometryError> {
        let (relative_x, relative_y) = self.relative_position();
        let previous_key = self.render_key();

        match change {
            GeometryChange::Scale(scale) => self.geometry.set_scale(self.zoom.clamp(scale))?,
            GeometryChange::ZoomBy(factor) => {
                let scale = self.zoom.clamp(self.geometry.scale() * factor);
                self.geometry.set_scale(scale)?;
            }
            GeometryChange::Rotation(rotation) => self.geometry.set_rotation(rotation),
            GeometryChange::RotateBy(degrees) => {
                let rotation = self.geometry.rotation().rotate_by(degrees);
                self.geometry.set_rotation(rotation);
            }
            GeometryChange::Layout {
                padding,
                pages_per_row,
                first_page_column,
            } => self
                .geometry
                .set_layout(padding, pages_per_row, first_page_column),
            GeometryChange::ViewportSize { width, height } => {
                self.geometry.set_viewport_size(width, height)
            }
            GeometryChange::PageSize { index, size } => {
                self.geometry.set_page_size(index, size)?;
                self.page_generation += 1;
                self.surfaces.invalidate(index);
            }
        }

        if self.render_key().rescales(&previous_key) {
            let dropped = self.surfaces.invalidate_all();
            debug!(dropped, "render geometry changed, dropped page surfaces");
        }

        if let Some(canvas) = self.geometry.document_size() {
            self.scroll_x = relative_x * canvas.width;
            self.scroll_y = relative_y * canvas.height;
        }
        self.clamp_scroll();
        self.reclassify();
        self.push_event(ViewerEvent::RedrawNeeded);
        Ok(())
    }

    pub fn on_setting_changed(&mut self, change: SettingChange) {
        let layout = self.geometry.layout();
        let (padding, pages_per_row, first_page_column) = (
            i64::from(layout.padding),
            i64::from(layout.pages_per_row),
            i64::from(layout.first_page_column),
        );
        let result = match change {
            SettingChange::PagesPerRow(value) => self.on_geometry_changed(GeometryChange::Layout {
                padding,
                pages_per_row: value,
                first_page_column,
            }),
            SettingChange::PagePadding(value) => self.on_geometry_changed(GeometryChange::Layout {
                padding: value,
                pages_per_row,
                first_page_column,
            }),
            SettingChange::FirstPageColumn(value) => {
                self.on_geometry_changed(GeometryChange::Layout {
                    padding,
                    pages_per_row,
                    first_page_column: value,
                })
            }
            SettingChange::ZoomRange { min, max } => {
                self.zoom.min = min;
                self.zoom.max = max;
                let current = self.geometry.scale();
                self.on_geometry_changed(GeometryChange::Scale(current))
            }
            SettingChange::AdjustMode(mode) => {
                self.geometry.set_adjust_mode(mode);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(%err, ?change, "setting could not be applied");
        }
    }

    #[instrument(skip(self, panel))]
    pub fn on_navigation_event(
        &mut self,
        target: &NavigationTarget,
        panel: &mut dyn IndexPanel,
        now: Instant,
    ) -> NavigationOutcome {
        let outcome = self
            .navigation
            .handle(target, self.geometry.page_count(), panel, now);
        self.tick(now);
        outcome
    }

    /// Applies a scheduled page jump once it is due. Returns whether one ran.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.navigation.take_due(now) {
            Some(page) => {
                self.scroll_to_page(page);
                true
            }
            None => false,
        }
    }

    /// Puts the top of `page` at the top of the viewport.
    pub fn scroll_to_page(&mut self, page: usize) {
        let previous = self.geometry.current_page();
        let page = self.geometry.set_current_page(page);

        let target = self.layout().scroll_target(page);
        match target {
            Some(y) => {
                self.scroll_y = y;
                self.push_event(ViewerEvent::ScrollRequested {
                    x: self.scroll_x,
                    y,
                });
                self.update_visibility(false);
            }
            None => debug!(page, "layout not ready, jump only updates the current page"),
        }

        if self.geometry.current_page() != previous {
            self.push_event(ViewerEvent::CurrentPageChanged(page));
        }
    }

    /// Applies every render that has already finished.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.surfaces.try_next_completion() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Waits for the next render to finish and applies it. `None` when no
    /// render is outstanding.
    pub async fn next_completion(&mut self) -> Option<CompletionOutcome> {
        let completion = self.surfaces.next_completion().await?;
        Some(self.apply_completion(completion))
    }

    /// Waits until no render is outstanding.
    pub async fn settle(&mut self) {
        while self.next_completion().await.is_some() {}
    }

    /// Shows the pending input buffer in the status sink.
    pub fn set_input_buffer(&self, text: &str) {
        if !text.is_empty() {
            self.notifier.notify(Severity::Info, text);
        }
    }

    pub fn snapshot(&self) -> PersistedViewState {
        let layout = self.geometry.layout();
        let (position_x, position_y) = self.relative_position();
        PersistedViewState {
            current_page: self.geometry.current_page(),
            scale: self.geometry.scale(),
            rotation: self.geometry.rotation().degrees(),
            pages_per_row: layout.pages_per_row,
            first_page_column: layout.first_page_column,
            position_x,
            position_y,
        }
    }

    pub fn restore(&mut self, state: &PersistedViewState) {
        let padding = i64::from(self.geometry.layout().padding);
        self.geometry.set_layout(
            padding,
            i64::from(state.pages_per_row),
            i64::from(state.first_page_column),
        );
        self.geometry
            .set_rotation(Rotation::from_degrees(i64::from(state.rotation)));
        if let Err(err) = self.geometry.set_scale(self.zoom.clamp(state.scale)) {
            warn!(%err, "ignoring persisted scale");
        }
        self.surfaces.invalidate_all();

        if let Some(canvas) = self.geometry.document_size() {
            self.scroll_x = state.position_x * canvas.width;
            self.scroll_y = state.position_y * canvas.height;
        }
        self.clamp_scroll();
        self.update_visibility(false);
        let page = self.geometry.set_current_page(state.current_page);
        self.push_event(ViewerEvent::CurrentPageChanged(page));
        self.push_event(ViewerEvent::RedrawNeeded);
    }

    /// Releases every page and hands back the state worth persisting.
    pub fn close(mut self) -> PersistedViewState {
        let state = self.snapshot();
        let freed = self.resident_bytes();
        for page in 0..self.surfaces.page_count() {
            self.surfaces.release(page);
        }
        debug!(
            freed,
            in_flight = self.surfaces.in_flight(),
            document = %self.info.display_name(),
            "closed document"
        );
        state
    }

    fn render_key(&self) -> RenderKey {
        RenderKey {
            scale: self.geometry.scale(),
            rotation: self.geometry.rotation(),
            generation: self.page_generation,
        }
    }

    fn job_for(&self, page: usize) -> Option<RenderJob> {
        let extent = self.layout().page_extent(page)?;
        Some(RenderJob {
            request: RenderRequest {
                page_index: page,
                width: to_pixels(extent.width),
                height: to_pixels(extent.height),
                rotation: self.geometry.rotation(),
            },
            key: self.render_key(),
        })
    }

    fn apply_completion(&mut self, completion: RenderCompletion) -> CompletionOutcome {
        let page = completion.page_index;
        let outcome = self.surfaces.on_job_complete(completion, self.render_key());
        match outcome {
            CompletionOutcome::Installed => self.push_event(ViewerEvent::RedrawNeeded),
            CompletionOutcome::DiscardedStale if self.surfaces.is_visible(page) => {
                if let Some(job) = self.job_for(page) {
                    self.surfaces.acquire(job);
                }
            }
            _ => {}
        }
        outcome
    }

    fn clamp_scroll(&mut self) {
        let Some(canvas) = self.geometry.document_size() else {
            return;
        };
        let viewport = self.geometry.viewport();
        self.scroll_x = clamp_scroll(self.scroll_x, canvas.width, f64::from(viewport.width));
        self.scroll_y = clamp_scroll(self.scroll_y, canvas.height, f64::from(viewport.height));
    }

    fn reclassify(&mut self) {
        self.update_visibility(true);
    }

    /// Reclassifies and acquires or releases surfaces. With `follow_focus`
    /// the current page moves to the page under the viewport centre;
    /// navigation passes `false` because it sets the current page itself.
    fn update_visibility(&mut self, follow_focus: bool) {
        let page_count = self.geometry.page_count();
        let viewport = self.geometry.viewport();
        let classification = if viewport.height == 0 {
            Classification::hidden(page_count)
        } else {
            let window = Viewport {
                vertical: ScrollWindow::new(self.scroll_y, f64::from(viewport.height)),
                horizontal: self
                    .horizontal
                    .then(|| ScrollWindow::new(self.scroll_x, f64::from(viewport.width))),
            };
            ViewportClassifier::classify(&self.layout(), &window)
        };

        let mut changed = false;
        for page in 0..page_count {
            if classification.is_visible(page) {
                changed |= !self.surfaces.is_visible(page);
                if let Some(job) = self.job_for(page) {
                    self.surfaces.acquire(job);
                }
            } else if self.surfaces.is_visible(page) {
                self.surfaces.release(page);
                changed = true;
            }
        }

        if let Some(focus) = classification.focus_page().filter(|_| follow_focus) {
            let previous = self.geometry.current_page();
            if self.geometry.set_current_page(focus) != previous {
                self.push_event(ViewerEvent::CurrentPageChanged(focus));
            }
        }
        self.classification = classification;
        if changed {
            self.push_event(ViewerEvent::RedrawNeeded);
        }
    }

    fn push_event(&self, event: ViewerEvent) {
        let mut events = self.events.lock();
        if event == ViewerEvent::RedrawNeeded && events.last() == Some(&ViewerEvent::RedrawNeeded) {
            return;
        }
        events.push(event);
    }
}

fn ratio(value: f64, total: f64) -> f64 {
    if total > 0.0 {
        (value / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn to_pixels(length: f64) -> u32 {
    // `as` saturates, so absurd zoom levels cannot wrap
    length.ceil().max(1.0) as u32
}
