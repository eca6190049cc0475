//! The viewer controller: owns the loaded document, the page cache it is
//! being rendered into, the search session and the user-facing view state.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::cache::{GenerationCounter, PageSnapshot, PageStatus, SharedPageCache};
use crate::config::ViewerConfig;
use crate::error::LoadError;
use crate::presentation::{presentation_for, Presentation, PresentationMode};
use crate::scheduler::{IncrementalScheduler, RenderJob, ScheduleReport};
use crate::search::{SearchSession, SearchSummary};
use crate::state::StateStore;
use crate::{
    Credential, DocumentDecoder, DocumentFetcher, DocumentId, DocumentInfo, RenderImage, Rotation,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerPhase {
    Loading,
    Ready,
    /// Terminal for the current source; opening another source starts over.
    Error(LoadError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerState {
    pub current_page: usize,
    pub scale: f32,
    pub rotation: Rotation,
    pub presentation: PresentationMode,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            current_page: 0,
            scale: 1.0,
            rotation: Rotation::Deg0,
            presentation: PresentationMode::SinglePage,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    FirstPage,
    LastPage,
    GotoPage { page: usize },
    ZoomIn,
    ZoomOut,
    ResetZoom,
    Rotate,
    SetPresentation { mode: PresentationMode },
    TogglePresentation,
    Search { query: String },
    SearchNext { count: usize },
    SearchPrev { count: usize },
    Download,
    Print,
}

/// The already-fetched document handed to the host for saving or printing.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub document: DocumentId,
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub enum ViewerEvent {
    PhaseChanged(ViewerPhase),
    RedrawNeeded,
    PagesUpdated { settled: usize, total: usize },
    SearchUpdated { total: usize, current: Option<usize> },
    DownloadRequested(HostRequest),
    PrintRequested(HostRequest),
}

/// One page as it should appear on screen, rotation applied.
#[derive(Debug, Clone)]
pub struct Surface {
    pub page_index: usize,
    pub status: PageStatus,
    pub image: Option<Arc<RenderImage>>,
}

struct LoadedDocument {
    info: DocumentInfo,
    bytes: Bytes,
    updates: watch::Receiver<PageSnapshot>,
    pages: PageSnapshot,
}

pub struct Viewer {
    config: ViewerConfig,
    scheduler: IncrementalScheduler,
    generations: GenerationCounter,
    phase: ViewerPhase,
    document: Option<LoadedDocument>,
    state: ViewerState,
    presentation: Box<dyn Presentation>,
    search: SearchSession,
    /// Set while a restored page must not be overridden by a carried-over query.
    keep_restored_page: bool,
    store: Option<Arc<dyn StateStore>>,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let state = ViewerState::default();
        Self {
            scheduler: IncrementalScheduler::new(&config.scheduler),
            search: SearchSession::new(config.search.debounce),
            keep_restored_page: false,
            presentation: presentation_for(state.presentation, &config.zoom),
            generations: GenerationCounter::new(),
            phase: ViewerPhase::Loading,
            document: None,
            state,
            store: None,
            events: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ViewerEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn phase(&self) -> &ViewerPhase {
        &self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ViewerPhase::Ready
    }

    pub fn document(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| &doc.info)
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    pub fn page_count(&self) -> usize {
        self.document
            .as_ref()
            .map(|doc| doc.info.page_count)
            .unwrap_or(0)
    }

    pub fn pages(&self) -> Option<&PageSnapshot> {
        self.document.as_ref().map(|doc| &doc.pages)
    }

    pub fn search(&self) -> &SearchSession {
        &self.search
    }

    pub fn search_summary(&self) -> Option<SearchSummary> {
        self.search.summary()
    }

    pub fn presentation_mode(&self) -> PresentationMode {
        self.presentation.mode()
    }

    /// Settled pages (rendered or failed) against the total.
    pub fn render_progress(&self) -> (usize, usize) {
        match self.document.as_ref() {
            Some(doc) => (settled_count(&doc.pages), doc.info.page_count),
            None => (0, 0),
        }
    }

    pub fn is_fully_rendered(&self) -> bool {
        self.document
            .as_ref()
            .map(|doc| doc.pages.is_complete())
            .unwrap_or(false)
    }

    /// Fetches, decodes and renders the opening pages of `source`. The
    /// returned job renders the rest and must be driven by the caller.
    /// Opening a new source invalidates every job of the previous one.
    #[instrument(skip(self, fetcher, decoder, credential))]
    pub async fn open<F, D>(
        &mut self,
        fetcher: &F,
        decoder: &D,
        source: &str,
        credential: Option<&Credential>,
    ) -> Result<RenderJob, LoadError>
    where
        F: DocumentFetcher + ?Sized,
        D: DocumentDecoder + ?Sized,
    {
        self.save_state();
        let generation = self.generations.advance();
        self.document = None;
        self.search.invalidate();
        self.set_phase(ViewerPhase::Loading);

        let fetched = match fetcher.fetch(source, credential).await {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail(err.into())),
        };

        // Decoders consume their input; the fetched buffer stays ours for
        // download and print.
        let payload = fetched.to_vec();
        let backend = match decoder.decode(source, payload).await {
            Ok(backend) => backend,
            Err(err) => return Err(self.fail(err.into())),
        };

        let info = backend.info().clone();
        info!(
            id = %info.id,
            pages = info.page_count,
            bytes = info.byte_len,
            generation = generation.id(),
            "document decoded"
        );

        let (cache, updates) = SharedPageCache::new(info.page_count, generation);
        let mut report = ScheduleReport::default();
        let resume_from = self
            .scheduler
            .render_burst(backend.as_ref(), &cache, &mut report)
            .unwrap_or(info.page_count);

        self.keep_restored_page = self.restore_state(&info);
        self.document = Some(LoadedDocument {
            info,
            bytes: fetched,
            updates,
            pages: cache.snapshot(),
        });
        self.set_phase(ViewerPhase::Ready);
        self.sync_pages();
        self.push_event(ViewerEvent::RedrawNeeded);

        Ok(RenderJob::new(
            self.scheduler.clone(),
            backend,
            cache,
            resume_from,
            report,
        ))
    }

    /// Picks up the latest published snapshot. Returns true when one arrived.
    pub fn sync_pages(&mut self) -> bool {
        let Some(doc) = self.document.as_mut() else {
            return false;
        };
        let changed = match doc.updates.has_changed() {
            Ok(changed) => changed,
            // The render job is gone but its last snapshot may still be unread.
            Err(_) => settled_count(&doc.updates.borrow()) != settled_count(&doc.pages),
        };
        if !changed {
            return false;
        }
        let snapshot = doc.updates.borrow_and_update().clone();

        let visible = self
            .presentation
            .visible_pages(self.state.current_page, doc.info.page_count);
        let visible_changed = visible.iter().any(|&page| {
            let before = doc.pages.get(page).map(|record| record.status);
            let after = snapshot.get(page).map(|record| record.status);
            before != after
        });
        let settled = settled_count(&snapshot);
        let total = doc.info.page_count;
        doc.pages = snapshot;

        self.push_event(ViewerEvent::PagesUpdated { settled, total });
        if visible_changed {
            self.push_event(ViewerEvent::RedrawNeeded);
        }
        self.refresh_search();
        true
    }

    /// Runs a debounced search once its delay has passed.
    pub fn poll_search(&mut self) -> bool {
        let pages = self
            .document
            .as_ref()
            .map(|doc| doc.pages.clone())
            .unwrap_or_else(PageSnapshot::empty);
        let revision = settled_count(&pages);
        if self.search.poll(Instant::now(), pages.pages(), revision) {
            self.after_search(true);
            true
        } else {
            false
        }
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::NextPage { count } => {
                for _ in 0..count.max(1) {
                    if !self.next() {
                        break;
                    }
                }
            }
            Command::PrevPage { count } => {
                for _ in 0..count.max(1) {
                    if !self.previous() {
                        break;
                    }
                }
            }
            Command::FirstPage => {
                self.first();
            }
            Command::LastPage => {
                self.last();
            }
            Command::GotoPage { page } => {
                self.go_to_page(page);
            }
            Command::ZoomIn => self.zoom_in(),
            Command::ZoomOut => self.zoom_out(),
            Command::ResetZoom => self.reset_zoom(),
            Command::Rotate => self.rotate(),
            Command::SetPresentation { mode } => self.set_presentation(mode),
            Command::TogglePresentation => self.set_presentation(self.presentation.mode().toggled()),
            Command::Search { query } => self.set_query(query),
            Command::SearchNext { count } => {
                for _ in 0..count.max(1) {
                    self.search_next();
                }
            }
            Command::SearchPrev { count } => {
                for _ in 0..count.max(1) {
                    self.search_previous();
                }
            }
            Command::Download => self.download(),
            Command::Print => self.print(),
        }
    }

    /// Clamps into `0..page_count`. No-op until the document is ready.
    pub fn go_to_page(&mut self, page: usize) -> bool {
        let page_count = self.page_count();
        if !self.is_ready() || page_count == 0 {
            return false;
        }
        self.move_to(page.min(page_count - 1))
    }

    pub fn next(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let target = self
            .presentation
            .next_page(self.state.current_page, self.page_count());
        self.move_to(target)
    }

    pub fn previous(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let target = self.presentation.previous_page(self.state.current_page);
        self.move_to(target)
    }

    pub fn first(&mut self) -> bool {
        self.go_to_page(0)
    }

    pub fn last(&mut self) -> bool {
        self.go_to_page(usize::MAX)
    }

    pub fn zoom_in(&mut self) {
        let scale = self.presentation.zoom_bounds().zoom_in(self.state.scale);
        self.set_scale(scale);
    }

    pub fn zoom_out(&mut self) {
        let scale = self.presentation.zoom_bounds().zoom_out(self.state.scale);
        self.set_scale(scale);
    }

    pub fn reset_zoom(&mut self) {
        let scale = self.presentation.zoom_bounds().clamp(1.0);
        self.set_scale(scale);
    }

    pub fn rotate(&mut self) {
        self.state.rotation = self.state.rotation.next();
        self.push_event(ViewerEvent::RedrawNeeded);
    }

    pub fn set_presentation(&mut self, mode: PresentationMode) {
        if mode == self.presentation.mode() {
            return;
        }
        self.presentation = presentation_for(mode, &self.config.zoom);
        self.state.presentation = mode;
        let scale = self.presentation.zoom_bounds().clamp(self.state.scale);
        self.state.scale = scale;
        self.push_event(ViewerEvent::RedrawNeeded);
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.keep_restored_page = false;
        if self.search.set_query(query, Instant::now()) {
            self.after_search(false);
        }
    }

    pub fn search_next(&mut self) -> bool {
        match self.search.next_match() {
            Some(page) => {
                self.go_to_page(page);
                self.push_search_event();
                true
            }
            None => false,
        }
    }

    pub fn search_previous(&mut self) -> bool {
        match self.search.previous_match() {
            Some(page) => {
                self.go_to_page(page);
                self.push_search_event();
                true
            }
            None => false,
        }
    }

    pub fn download(&mut self) {
        if let Some(request) = self.host_request() {
            self.push_event(ViewerEvent::DownloadRequested(request));
        }
    }

    pub fn print(&mut self) {
        if let Some(request) = self.host_request() {
            self.push_event(ViewerEvent::PrintRequested(request));
        }
    }

    /// Pages currently on screen with rotation applied.
    pub fn visible_surfaces(&self) -> Vec<Surface> {
        let Some(doc) = self.document.as_ref() else {
            return Vec::new();
        };
        let rotation = self.state.rotation;
        self.presentation
            .visible_pages(self.state.current_page, doc.info.page_count)
            .into_iter()
            .filter_map(|page| doc.pages.get(page))
            .map(|record| Surface {
                page_index: record.page_index,
                status: record.status,
                image: record.raster.as_ref().map(|image| {
                    if rotation == Rotation::Deg0 {
                        Arc::clone(image)
                    } else {
                        Arc::new(image.rotated(rotation))
                    }
                }),
            })
            .collect()
    }

    pub fn current_text(&self) -> Option<Arc<str>> {
        self.document
            .as_ref()
            .and_then(|doc| doc.pages.get(self.state.current_page))
            .map(|record| Arc::clone(&record.text))
    }

    pub fn persist(&self) -> Result<()> {
        if let (Some(store), Some(doc)) = (self.store.as_ref(), self.document.as_ref()) {
            store.save(&doc.info, &self.state)?;
        }
        Ok(())
    }

    fn save_state(&self) {
        if let Err(err) = self.persist() {
            warn!(?err, "failed to save viewer state");
        }
    }

    /// Returns true when a stored state was found for the document.
    fn restore_state(&mut self, info: &DocumentInfo) -> bool {
        let stored = match self.store.as_ref().map(|store| store.load(info)) {
            Some(Ok(state)) => state,
            Some(Err(err)) => {
                warn!(?err, id = %info.id, "failed to load viewer state");
                None
            }
            None => None,
        };
        let restored = stored.is_some();
        let mut state = stored.unwrap_or_else(|| ViewerState {
            presentation: self.state.presentation,
            ..ViewerState::default()
        });

        state.current_page = state.current_page.min(info.page_count.saturating_sub(1));
        self.presentation = presentation_for(state.presentation, &self.config.zoom);
        state.scale = self.presentation.zoom_bounds().clamp(state.scale);
        self.state = state;
        restored
    }

    fn move_to(&mut self, page: usize) -> bool {
        if page == self.state.current_page {
            return false;
        }
        self.state.current_page = page;
        self.push_event(ViewerEvent::RedrawNeeded);
        true
    }

    fn set_scale(&mut self, scale: f32) {
        if (self.state.scale - scale).abs() > f32::EPSILON {
            self.state.scale = scale;
            self.push_event(ViewerEvent::RedrawNeeded);
        }
    }

    fn refresh_search(&mut self) {
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        let revision = settled_count(&doc.pages);
        let had_current = self.search.current_index().is_some();
        if self.search.refresh(doc.pages.pages(), revision) {
            let navigate = !had_current && !self.keep_restored_page;
            if self.search.current_index().is_some() {
                self.keep_restored_page = false;
            }
            self.after_search(navigate);
        }
    }

    /// Jumps to the first match when asked to and one exists.
    fn after_search(&mut self, navigate: bool) {
        if navigate {
            if let Some(found) = self.search.current_match() {
                self.go_to_page(found.page_index);
            }
        }
        self.push_search_event();
    }

    fn push_search_event(&self) {
        self.push_event(ViewerEvent::SearchUpdated {
            total: self.search.matches().len(),
            current: self.search.current_index(),
        });
    }

    fn host_request(&self) -> Option<HostRequest> {
        self.document.as_ref().map(|doc| HostRequest {
            document: doc.info.id,
            file_name: doc.info.file_name(),
            bytes: doc.bytes.clone(),
        })
    }

    fn set_phase(&mut self, phase: ViewerPhase) {
        match &phase {
            ViewerPhase::Loading => info!("loading document"),
            ViewerPhase::Ready => info!("document ready"),
            ViewerPhase::Error(err) => warn!(error = %err, "document failed to load"),
        }
        self.phase = phase.clone();
        self.push_event(ViewerEvent::PhaseChanged(phase));
    }

    fn fail(&mut self, err: LoadError) -> LoadError {
        self.set_phase(ViewerPhase::Error(err.clone()));
        err
    }

    fn push_event(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }
}

fn settled_count(pages: &PageSnapshot) -> usize {
    pages.rendered_count() + pages.failed_count()
}

impl Drop for Viewer {
    fn drop(&mut self) {
        // Stops any render job still running for this viewer.
        self.generations.advance();
    }
}
