use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use pageflow_core::{
    document_id_for_path, CompletionOutcome, DocumentBackend, DocumentInfo, DocumentMetadata,
    DocumentProvider, GeometryChange, IndexElement, IndexPanel, NavigationOutcome,
    NavigationTarget, NotificationSink, PageBitmap, RenderRequest, Severity, Size, UriOpener,
    Viewer, ViewerConfig, ViewerEvent, EXTERNAL_LINK_FAILED,
};

struct FakeBackend {
    info: DocumentInfo,
    delay: Duration,
    renders: AtomicUsize,
}

impl DocumentBackend for FakeBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
        std::thread::sleep(self.delay);
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(PageBitmap {
            width: request.width,
            height: request.height,
            pixels: vec![request.page_index as u8; 4],
        })
    }
}

struct FakeProvider {
    pages: usize,
    delay: Duration,
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        Ok(Arc::new(FakeBackend {
            info: DocumentInfo {
                id: document_id_for_path(path),
                path: path.to_path_buf(),
                page_sizes: vec![Size::new(80.0, 100.0); self.pages],
                metadata: DocumentMetadata::default(),
            },
            delay: self.delay,
            renders: AtomicUsize::new(0),
        }))
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_owned()));
    }
}

struct RefusingOpener;

impl UriOpener for RefusingOpener {
    fn open(&self, uri: &str) -> Result<()> {
        Err(anyhow!("no handler registered for {uri}"))
    }
}

struct IndexWindow {
    open: bool,
}

impl IndexPanel for IndexWindow {
    fn is_open(&self) -> bool {
        self.open
    }

    fn hide(&mut self) {
        self.open = false;
    }
}

async fn open_viewer(pages: usize, delay: Duration) -> (Viewer, Arc<RecordingSink>) {
    let provider = FakeProvider { pages, delay };
    let backend = provider
        .open(&PathBuf::from("/tmp/flow.pdf"))
        .await
        .unwrap();
    let sink = Arc::new(RecordingSink::default());
    let mut config = ViewerConfig::default();
    config.layout.padding = 5;
    let mut viewer = Viewer::new(backend, &config, sink.clone(), Arc::new(RefusingOpener)).unwrap();
    viewer
        .on_geometry_changed(GeometryChange::ViewportSize {
            width: 90,
            height: 100,
        })
        .unwrap();
    (viewer, sink)
}

async fn settle(viewer: &mut Viewer) {
    tokio::time::timeout(Duration::from_secs(5), viewer.settle())
        .await
        .expect("renders finish");
}

#[tokio::test]
async fn scrolling_renders_exactly_the_visible_pages() {
    let (mut viewer, _) = open_viewer(10, Duration::ZERO).await;
    settle(&mut viewer).await;
    assert_eq!(viewer.resident_pages(), vec![0]);

    viewer.on_scroll(150.0);
    assert_eq!(viewer.visible_pages(), vec![1, 2]);
    assert!(viewer.surface(0).is_none());

    settle(&mut viewer).await;
    assert_eq!(viewer.resident_pages(), vec![1, 2]);
    let bitmap = viewer.surface(1).unwrap();
    assert_eq!((bitmap.width, bitmap.height), (80, 100));
    assert_eq!(viewer.geometry().current_page(), 1);
}

#[tokio::test]
async fn render_finishing_after_page_left_is_discarded() {
    let (mut viewer, _) = open_viewer(10, Duration::from_millis(50)).await;
    viewer.on_scroll(600.0);
    // page 0 from the initial view is still rendering alongside 5 and 6
    assert_eq!(viewer.in_flight(), 3);

    viewer.on_scroll(0.0);
    assert!(viewer.surface(6).is_none());

    let mut outcomes = Vec::new();
    while let Some(outcome) = tokio::time::timeout(Duration::from_secs(5), viewer.next_completion())
        .await
        .unwrap()
    {
        outcomes.push(outcome);
    }
    assert!(outcomes.contains(&CompletionOutcome::DiscardedInvisible));
    assert!(viewer.surface(5).is_none());
    assert!(viewer.surface(6).is_none());
    assert_eq!(viewer.resident_pages(), vec![0]);
}

#[tokio::test]
async fn zoom_during_render_never_installs_old_scale() {
    let (mut viewer, _) = open_viewer(4, Duration::from_millis(40)).await;
    viewer
        .on_geometry_changed(GeometryChange::Scale(0.5))
        .unwrap();

    settle(&mut viewer).await;
    for page in viewer.resident_pages() {
        let bitmap = viewer.surface(page).unwrap();
        assert_eq!((bitmap.width, bitmap.height), (40, 50));
    }
    assert!(viewer.resident_pages().contains(&0));
}

#[tokio::test]
async fn page_resized_during_render_gets_a_bitmap_of_the_new_size() {
    let (mut viewer, _) = open_viewer(3, Duration::from_millis(60)).await;
    assert_eq!(viewer.in_flight(), 1);

    viewer
        .on_geometry_changed(GeometryChange::PageSize {
            index: 0,
            size: Size::new(80.0, 50.0),
        })
        .unwrap();
    assert_eq!(viewer.visible_pages(), vec![0]);

    let mut outcomes = Vec::new();
    while let Some(outcome) = tokio::time::timeout(Duration::from_secs(5), viewer.next_completion())
        .await
        .unwrap()
    {
        outcomes.push(outcome);
    }
    assert_eq!(
        outcomes,
        vec![CompletionOutcome::DiscardedStale, CompletionOutcome::Installed]
    );
    let extent = viewer.layout().page_extent(0).unwrap();
    let bitmap = viewer.surface(0).unwrap();
    assert_eq!((extent.width, extent.height), (80.0, 50.0));
    assert_eq!((bitmap.width, bitmap.height), (80, 50));
}

#[tokio::test]
async fn index_jump_waits_for_the_panel_to_close() {
    let (mut viewer, _) = open_viewer(10, Duration::ZERO).await;
    let entry = IndexElement {
        title: "Chapter 3".into(),
        depth: 0,
        target: NavigationTarget::ToPage(5),
    };
    let mut panel = IndexWindow { open: true };
    let now = Instant::now();
    viewer.take_events();

    let outcome = viewer.on_navigation_event(&entry.target, &mut panel, now);
    assert!(matches!(outcome, NavigationOutcome::ScrollScheduled(scroll) if scroll.page == 5));
    assert!(!panel.open);
    assert_eq!(viewer.scroll_position().1, 0.0);

    // closing the panel widens the viewport before the jump lands
    viewer
        .on_geometry_changed(GeometryChange::ViewportSize {
            width: 90,
            height: 200,
        })
        .unwrap();
    assert!(viewer.tick(now + Duration::from_secs(1)));

    let expected = viewer.layout().offset(5).unwrap().y;
    assert_eq!(viewer.scroll_position().1, expected);
    assert_eq!(viewer.geometry().current_page(), 5);
    assert!(viewer.visible_pages().contains(&5));
    let events = viewer.take_events();
    assert!(events.contains(&ViewerEvent::ScrollRequested { x: 0.0, y: expected }));
    assert!(events.contains(&ViewerEvent::CurrentPageChanged(5)));
}

#[tokio::test]
async fn failing_external_link_only_notifies() {
    let (mut viewer, sink) = open_viewer(10, Duration::ZERO).await;
    viewer.on_scroll(300.0);
    let before = viewer.snapshot();
    let mut panel = IndexWindow { open: true };

    let outcome = viewer.on_navigation_event(
        &NavigationTarget::ExternalLink("bad://uri".into()),
        &mut panel,
        Instant::now(),
    );

    assert_eq!(outcome, NavigationOutcome::LinkFailed);
    assert_eq!(
        *sink.messages.lock(),
        vec![(Severity::Error, EXTERNAL_LINK_FAILED.to_owned())]
    );
    assert_eq!(viewer.snapshot(), before);
    assert!(viewer.pending_navigation().is_none());
}

#[tokio::test]
async fn closing_releases_every_surface() {
    let (mut viewer, _) = open_viewer(3, Duration::ZERO).await;
    settle(&mut viewer).await;
    assert!(viewer.resident_bytes() > 0);

    let state = viewer.close();
    assert_eq!(state.current_page, 0);
}
