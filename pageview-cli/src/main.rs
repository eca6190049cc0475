use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal;
use directories::{ProjectDirs, UserDirs};
use pageview_core::{
    Command, Credential, FileStateStore, HostRequest, PresentationMode, StateStore, Viewer,
    ViewerConfig, ViewerEvent,
};
use pageview_fetch::SourceFetcher;
use pageview_render::PdfiumDecoder;
use pageview_tty::{
    compose_surfaces, write_status_line, DrawParams, EventMapper, KittyRenderer, StatusLine,
    UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pageview",
    version,
    about = "Incremental paginated document viewer for kitty-compatible terminals"
)]
struct Args {
    /// URL or path of the document to open
    source: String,

    /// Bearer token sent with remote requests
    #[arg(long, env = "PAGEVIEW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to open the document on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Start in two-page flip-book mode
    #[arg(long)]
    flip: bool,

    /// Where downloads are saved (defaults to the user's download dir)
    #[arg(long)]
    download_dir: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pageview", "pageview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {:?}", config_path))?;
    pageview_render::initialize(&config.engine)?;

    let fetcher = SourceFetcher::new(&config.fetch)?;
    let decoder = PdfiumDecoder::new()?;
    let state_dir = project_dirs.data_local_dir().join("state");
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(state_dir)?);
    let credential = args.token.clone().map(Credential::bearer);
    let download_dir = args
        .download_dir
        .clone()
        .or_else(default_download_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut viewer = Viewer::new(config).with_store(store);
    let job = viewer
        .open(&fetcher, &decoder, &args.source, credential.as_ref())
        .await
        .with_context(|| format!("failed to open {}", args.source))?;
    let render_task = tokio::spawn(job.run());

    if let Some(page) = args.page {
        viewer.apply(Command::GotoPage { page });
    }
    if args.flip {
        viewer.set_presentation(PresentationMode::FlipBook);
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut notice: Option<String> = None;
    let mut dirty = true;
    let mut status_dirty = true;

    loop {
        viewer.sync_pages();
        viewer.poll_search();

        for event in viewer.drain_events() {
            match event {
                ViewerEvent::RedrawNeeded => dirty = true,
                ViewerEvent::PhaseChanged(_)
                | ViewerEvent::PagesUpdated { .. }
                | ViewerEvent::SearchUpdated { .. } => status_dirty = true,
                ViewerEvent::DownloadRequested(request) => {
                    notice = Some(match save_download(&request, &download_dir) {
                        Ok(path) => format!("saved {}", path.display()),
                        Err(err) => {
                            warn!(?err, "download failed");
                            format!("download failed: {err:#}")
                        }
                    });
                    status_dirty = true;
                }
                ViewerEvent::PrintRequested(request) => {
                    notice = Some(match print_document(&request) {
                        Ok(()) => format!("sent {} to the printer", request.file_name),
                        Err(err) => {
                            warn!(?err, "print failed");
                            format!("print failed: {err:#}")
                        }
                    });
                    status_dirty = true;
                }
            }
        }

        if dirty {
            redraw(&mut renderer, &viewer)?;
            dirty = false;
            status_dirty = true;
        }
        if status_dirty {
            let status = status_text(&viewer, &event_mapper, notice.as_deref());
            draw_status_line(&mut renderer, &status)?;
            status_dirty = false;
        }

        if event::poll(Duration::from_millis(50))? {
            let ui_event = event_mapper.map_event(event::read()?);
            match ui_event {
                UiEvent::Command(command) => {
                    notice = None;
                    viewer.apply(command);
                }
                UiEvent::BeginSearch => {}
                UiEvent::SearchQueryChanged { query } | UiEvent::SearchSubmit { query } => {
                    viewer.set_query(query);
                }
                UiEvent::SearchCancel => viewer.set_query(String::new()),
                UiEvent::Quit => break,
                UiEvent::None => {}
            }
            status_dirty = true;
        }
    }

    render_task.abort();
    renderer.delete_images()?;
    renderer.clear_all()?;
    viewer.persist()?;
    Ok(())
}

fn redraw(renderer: &mut KittyRenderer<io::Stdout>, viewer: &Viewer) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let image_rows = total_rows.saturating_sub(1).max(1);

    renderer.begin_sync_update()?;
    renderer.clear_all()?;
    if let Some(image) = compose_surfaces(&viewer.visible_surfaces()) {
        let params = DrawParams::fit(&image, total_cols, image_rows, viewer.state().scale);
        let origin = total_cols.saturating_sub(params.columns) / 2;
        crossterm::queue!(renderer.writer(), cursor::MoveTo(origin as u16, 0))?;
        renderer.draw(&image, params)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn status_text(viewer: &Viewer, mapper: &EventMapper, notice: Option<&str>) -> String {
    let file_name = viewer
        .document()
        .map(|info| info.file_name())
        .unwrap_or_default();
    let (settled, page_count) = viewer.render_progress();
    let state = viewer.state();
    let status = StatusLine {
        file_name: &file_name,
        phase: viewer.phase(),
        current_page: state.current_page,
        page_count,
        settled,
        scale: state.scale,
        rotation: state.rotation,
        presentation: viewer.presentation_mode(),
        search: viewer.search_summary(),
        pending_input: mapper.pending_input(),
    }
    .format();
    match notice {
        Some(notice) => format!("{status} | {notice}"),
        None => status,
    }
}

fn draw_status_line(renderer: &mut KittyRenderer<io::Stdout>, status: &str) -> Result<()> {
    let window = terminal::window_size()?;
    let status_row = window.rows.saturating_sub(1);
    write_status_line(renderer.writer(), status_row, status)?;
    Ok(())
}

fn default_download_dir() -> Option<PathBuf> {
    UserDirs::new().and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
}

/// First free `name`, `name (1)`, `name (2)`, … inside `dir`.
fn unique_download_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let extension = name.extension().and_then(|s| s.to_str());
    (1..)
        .map(|n| {
            let numbered = match extension {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            dir.join(numbered)
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn save_download(request: &HostRequest, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create download directory {:?}", dir))?;
    let path = unique_download_path(dir, &request.file_name);
    let mut file =
        fs::File::create(&path).with_context(|| format!("failed to create {:?}", path))?;
    file.write_all(&request.bytes)?;
    file.flush()?;
    info!(path = %path.display(), bytes = request.bytes.len(), "document saved");
    Ok(path)
}

/// Spools the fetched bytes through `lp`.
fn print_document(request: &HostRequest) -> Result<()> {
    let mut spool = tempfile::Builder::new()
        .prefix("pageview-")
        .suffix(".pdf")
        .tempfile()
        .context("failed to create print spool file")?;
    spool.write_all(&request.bytes)?;
    spool.flush()?;

    let output = process::Command::new("lp")
        .arg("-t")
        .arg(&request.file_name)
        .arg(spool.path())
        .output()
        .context("no print command available (is `lp` installed?)")?;
    if !output.status.success() {
        bail!(
            "lp exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    info!(document = %request.document, "print job submitted");
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pageview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the page image, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
