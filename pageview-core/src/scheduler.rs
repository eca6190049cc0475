//! Incremental page rendering.
//!
//! The first `burst_pages` pages are rendered straight away and published
//! together with the placeholders for the rest. The remaining pages follow one
//! at a time in ascending order, yielding to the runtime between pages, with a
//! snapshot published every `publish_every` pages and after the last one.
//! Rendering is strictly sequential: backends are not assumed to be reentrant.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cache::SharedPageCache;
use crate::config::SchedulerConfig;
use crate::error::{PageCacheError, PageRenderError};
use crate::{DocumentBackend, RenderRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub rendered: usize,
    pub failed_pages: Vec<usize>,
    pub cancelled: bool,
}

impl ScheduleReport {
    pub fn failed(&self) -> usize {
        self.failed_pages.len()
    }
}

#[derive(Debug, Clone)]
pub struct IncrementalScheduler {
    burst_pages: usize,
    publish_every: usize,
    render_scale: f32,
}

impl Default for IncrementalScheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl IncrementalScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            burst_pages: config.burst_pages.max(1),
            publish_every: config.publish_every.max(1),
            render_scale: config.render_scale,
        }
    }

    pub fn burst_len(&self, page_count: usize) -> usize {
        self.burst_pages.min(page_count)
    }

    /// Renders and publishes the opening pages. Returns the index to resume
    /// from, or `None` when the cache went stale.
    pub fn render_burst(
        &self,
        backend: &dyn DocumentBackend,
        cache: &SharedPageCache,
        report: &mut ScheduleReport,
    ) -> Option<usize> {
        let burst = self.burst_len(cache.page_count());
        for page in 0..burst {
            if self.render_one(backend, cache, page, report).is_err() {
                report.cancelled = true;
                return None;
            }
        }
        if cache.publish().is_err() {
            report.cancelled = true;
            return None;
        }
        Some(burst)
    }

    /// Renders pages `start..page_count` one at a time.
    pub async fn render_remaining(
        &self,
        backend: &dyn DocumentBackend,
        cache: &SharedPageCache,
        start: usize,
        report: &mut ScheduleReport,
    ) {
        let page_count = cache.page_count();
        let mut since_publish = 0;

        for page in start..page_count {
            tokio::task::yield_now().await;

            if self.render_one(backend, cache, page, report).is_err() {
                report.cancelled = true;
                return;
            }

            since_publish += 1;
            let last = page + 1 == page_count;
            if since_publish >= self.publish_every || last {
                if cache.publish().is_err() {
                    report.cancelled = true;
                    return;
                }
                since_publish = 0;
            }
        }
    }

    #[instrument(skip_all, fields(generation = cache.generation(), pages = cache.page_count()))]
    pub async fn run(&self, backend: &dyn DocumentBackend, cache: &SharedPageCache) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        if let Some(start) = self.render_burst(backend, cache, &mut report) {
            self.render_remaining(backend, cache, start, &mut report)
                .await;
        }
        report
    }

    /// Only a stale generation is reported as an error; page failures are
    /// recorded and absorbed.
    fn render_one(
        &self,
        backend: &dyn DocumentBackend,
        cache: &SharedPageCache,
        page: usize,
        report: &mut ScheduleReport,
    ) -> Result<(), PageCacheError> {
        if let Err(err) = cache.ensure_current() {
            debug!(page, %err, "dropping stale render");
            return Err(err);
        }

        let request = RenderRequest {
            page_index: page,
            scale: self.render_scale,
        };
        let written = match backend.render_page(request) {
            Ok(content) => cache.fill(page, content).map(|_| {
                report.rendered += 1;
                debug!(page, "page rendered");
            }),
            Err(err) => {
                let err = PageRenderError::new(page, &err);
                warn!(page, error = %err, "page render failed; leaving placeholder");
                cache.mark_failed(page).map(|_| report.failed_pages.push(page))
            }
        };

        match written {
            Err(err @ PageCacheError::StaleGeneration { .. }) => {
                debug!(page, %err, "dropping stale render");
                Err(err)
            }
            Err(err) => {
                warn!(page, %err, "page cache rejected render result");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

/// Background part of a document load, produced once the opening burst is on
/// screen. Dropping the job or advancing the generation stops it.
pub struct RenderJob {
    scheduler: IncrementalScheduler,
    backend: Arc<dyn DocumentBackend>,
    cache: SharedPageCache,
    resume_from: usize,
    report: ScheduleReport,
}

impl RenderJob {
    pub(crate) fn new(
        scheduler: IncrementalScheduler,
        backend: Arc<dyn DocumentBackend>,
        cache: SharedPageCache,
        resume_from: usize,
        report: ScheduleReport,
    ) -> Self {
        Self {
            scheduler,
            backend,
            cache,
            resume_from,
            report,
        }
    }

    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn remaining(&self) -> usize {
        self.cache.page_count().saturating_sub(self.resume_from)
    }

    #[instrument(skip_all, fields(generation = self.cache.generation(), from = self.resume_from))]
    pub async fn run(self) -> ScheduleReport {
        let RenderJob {
            scheduler,
            backend,
            cache,
            resume_from,
            mut report,
        } = self;

        if !report.cancelled {
            scheduler
                .render_remaining(backend.as_ref(), &cache, resume_from, &mut report)
                .await;
        }

        if report.cancelled {
            info!("render job superseded by a newer document");
        } else {
            info!(
                rendered = report.rendered,
                failed = report.failed(),
                "all pages rendered"
            );
        }
        report
    }
}
