mod status;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use image::RgbaImage;
use pageflow_core::{
    DocumentProvider, FileStateStore, GeometryChange, IndexPanel, NavigationOutcome,
    NavigationTarget, NotificationSink, Rotation, SettingChange, StateStore, Viewer, ViewerConfig,
    ViewerEvent,
};
#[cfg(feature = "pdf")]
use pageflow_render::PdfiumProvider;
use pageflow_render::SyntheticProvider;
use serde::Serialize;
use status::{StatusLine, SystemOpener};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pageflow",
    version,
    about = "Scroll through a document's page layout and report what gets rendered"
)]
struct Args {
    /// Documents to scan
    #[arg(required_unless_present = "synthetic")]
    files: Vec<PathBuf>,

    /// Scan a generated document with this many pages instead of files
    #[arg(long, value_name = "PAGES")]
    synthetic: Option<usize>,

    /// Make every Nth synthetic page landscape
    #[arg(long, value_name = "N", requires = "synthetic")]
    landscape_every: Option<usize>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    scale: Option<f64>,

    /// Rotation in degrees, snapped to a right angle
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    pages_per_row: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    padding: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    first_page_column: Option<i64>,

    /// Viewport size in pixels
    #[arg(long, value_parser = parse_viewport, default_value = "800x600")]
    viewport: (u32, u32),

    /// Scroll distance per step (defaults to the viewport height)
    #[arg(long)]
    step: Option<f64>,

    /// Jump to this page (0-based) before scanning
    #[arg(long)]
    goto: Option<usize>,

    /// Issue the jump from an open index panel, so it waits for the panel to close
    #[arg(long, requires = "goto")]
    from_index: bool,

    /// Follow this external link before scanning
    #[arg(long)]
    link: Option<String>,

    /// Write every rendered page as PNG into this directory
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Ignore and do not update the saved view state
    #[arg(long)]
    fresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Report<'a> {
    Layout {
        document: &'a str,
        pages: usize,
        cell: Option<(f64, f64)>,
        canvas: Option<(f64, f64)>,
        scale: f64,
        rotation: u32,
        pages_per_row: u32,
        first_page_column: u32,
    },
    Navigation {
        target: String,
        outcome: String,
    },
    Step {
        scroll_y: f64,
        visible: Vec<usize>,
        current_page: usize,
        resident: Vec<usize>,
        resident_bytes: usize,
        /// Host notifications queued since the previous step.
        events: Vec<ViewerEvent>,
    },
    Closed {
        current_page: usize,
        position_y: f64,
    },
}

/// The CLI has no index panel of its own; this stands in for one that was
/// open when the jump was requested.
struct ScanIndexPanel {
    open: bool,
}

impl IndexPanel for ScanIndexPanel {
    fn is_open(&self) -> bool {
        self.open
    }

    fn hide(&mut self) {
        self.open = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pageflow", "pageflow")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = match init_logging(&project_dirs) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("file logging disabled: {err:#}");
            None
        }
    };

    let config = ViewerConfig::load_or_default(args.config.as_deref())?;
    let store: Option<Arc<dyn StateStore>> = if args.fresh {
        None
    } else {
        let state_dir = project_dirs.data_local_dir().join("state");
        Some(Arc::new(FileStateStore::new(state_dir)?))
    };
    let notifier: Arc<dyn NotificationSink> = Arc::new(StatusLine::new());

    let (provider, paths) = select_provider(&args)?;
    for path in &paths {
        let backend = provider
            .open(path)
            .await
            .with_context(|| format!("failed to open {:?}", path))?;
        let viewer = Viewer::new(
            backend,
            &config,
            Arc::clone(&notifier),
            Arc::new(SystemOpener),
        )?;
        scan(&args, &config, viewer, store.as_deref()).await?;
    }
    Ok(())
}

fn select_provider(args: &Args) -> Result<(Box<dyn DocumentProvider>, Vec<PathBuf>)> {
    if let Some(pages) = args.synthetic {
        let mut provider = SyntheticProvider::new(pages);
        if let Some(n) = args.landscape_every {
            provider = provider.with_landscape_every(n);
        }
        let path = PathBuf::from(format!("synthetic-{pages}.pdf"));
        return Ok((Box::new(provider), vec![path]));
    }
    Ok((pdf_provider()?, args.files.clone()))
}

#[cfg(feature = "pdf")]
fn pdf_provider() -> Result<Box<dyn DocumentProvider>> {
    Ok(Box::new(PdfiumProvider::new()?))
}

#[cfg(not(feature = "pdf"))]
fn pdf_provider() -> Result<Box<dyn DocumentProvider>> {
    Err(anyhow!(
        "built without PDF support; use --synthetic to scan a generated document"
    ))
}

async fn scan(
    args: &Args,
    config: &ViewerConfig,
    mut viewer: Viewer,
    store: Option<&dyn StateStore>,
) -> Result<()> {
    if let Some(store) = store {
        match store.load(viewer.info()) {
            Ok(Some(state)) => viewer.restore(&state),
            Ok(None) => {}
            Err(err) => warn!(?err, "ignoring unreadable view state"),
        }
    }
    apply_overrides(args, &mut viewer)?;

    let (width, height) = args.viewport;
    viewer.on_geometry_changed(GeometryChange::ViewportSize { width, height })?;
    report_layout(&viewer)?;

    if let Some(uri) = &args.link {
        navigate(&mut viewer, NavigationTarget::ExternalLink(uri.clone()), false)?;
    }
    if let Some(page) = args.goto {
        navigate(&mut viewer, NavigationTarget::ToPage(page), args.from_index)?;
        if viewer.pending_navigation().is_some() {
            tokio::time::sleep(config.navigation.settle_delay).await;
            viewer.tick(Instant::now());
        }
    }

    let mut dumped = HashSet::new();
    let canvas_height = viewer
        .geometry()
        .document_size()
        .map_or(0.0, |size| size.height);
    let step = args
        .step
        .filter(|step| *step > 0.0)
        .unwrap_or_else(|| f64::from(height.max(1)));
    let (_, mut y) = viewer.scroll_position();
    let last = (canvas_height - f64::from(height)).max(0.0);

    loop {
        viewer.on_scroll(y);
        viewer.settle().await;
        emit(&step_report(&viewer))?;
        if let Some(dir) = &args.dump_dir {
            dump_pages(&viewer, dir, &mut dumped)?;
        }
        if y >= last {
            break;
        }
        y = (y + step).min(last);
    }

    let info = viewer.info().clone();
    let final_state = viewer.close();
    emit(&Report::Closed {
        current_page: final_state.current_page,
        position_y: final_state.position_y,
    })?;
    if let Some(store) = store {
        store.save(&info, &final_state)?;
    }
    info!(document = %info.display_name(), dumped = dumped.len(), "scan finished");
    Ok(())
}

fn apply_overrides(args: &Args, viewer: &mut Viewer) -> Result<()> {
    if let Some(value) = args.pages_per_row {
        viewer.on_setting_changed(SettingChange::PagesPerRow(value));
    }
    if let Some(value) = args.padding {
        viewer.on_setting_changed(SettingChange::PagePadding(value));
    }
    if let Some(value) = args.first_page_column {
        viewer.on_setting_changed(SettingChange::FirstPageColumn(value));
    }
    if let Some(degrees) = args.rotation {
        viewer.on_geometry_changed(GeometryChange::Rotation(Rotation::from_degrees(degrees)))?;
    }
    if let Some(scale) = args.scale {
        viewer.on_geometry_changed(GeometryChange::Scale(scale))?;
    }
    Ok(())
}

fn navigate(viewer: &mut Viewer, target: NavigationTarget, from_index: bool) -> Result<()> {
    let mut panel = ScanIndexPanel { open: from_index };
    let outcome = viewer.on_navigation_event(&target, &mut panel, Instant::now());
    let outcome = match outcome {
        NavigationOutcome::ScrollScheduled(scroll) => format!("jump to page {}", scroll.page),
        other => format!("{other:?}"),
    };
    let target = match target {
        NavigationTarget::ToPage(page) => format!("page {page}"),
        NavigationTarget::ExternalLink(uri) => uri,
    };
    emit(&Report::Navigation { target, outcome })
}

/// Also drains the viewer's event queue.
fn step_report(viewer: &Viewer) -> Report<'static> {
    Report::Step {
        scroll_y: viewer.scroll_position().1,
        visible: viewer.visible_pages(),
        current_page: viewer.geometry().current_page(),
        resident: viewer.resident_pages(),
        resident_bytes: viewer.resident_bytes(),
        events: viewer.take_events(),
    }
}

fn report_layout(viewer: &Viewer) -> Result<()> {
    let geometry = viewer.geometry();
    let layout = geometry.layout();
    emit(&Report::Layout {
        document: viewer.info().display_name(),
        pages: geometry.page_count(),
        cell: geometry.cell_size().map(|size| (size.width, size.height)),
        canvas: geometry.document_size().map(|size| (size.width, size.height)),
        scale: geometry.scale(),
        rotation: geometry.rotation().degrees(),
        pages_per_row: layout.pages_per_row,
        first_page_column: layout.first_page_column,
    })
}

fn dump_pages(viewer: &Viewer, dir: &Path, dumped: &mut HashSet<usize>) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let stem = Path::new(viewer.info().display_name())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("page")
        .to_owned();
    for page in viewer.resident_pages() {
        if !dumped.insert(page) {
            continue;
        }
        let Some(bitmap) = viewer.surface(page) else {
            continue;
        };
        let image = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone())
            .ok_or_else(|| anyhow!("bitmap for page {page} has the wrong length"))?;
        let path = dir.join(format!("{stem}-{:04}.png", page + 1));
        image
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
    }
    Ok(())
}

fn emit(report: &Report<'_>) -> Result<()> {
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

fn parse_viewport(raw: &str) -> Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid viewport dimension {value:?}: {err}"))
    };
    Ok((parse(width)?, parse(height)?))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pageflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the report
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
