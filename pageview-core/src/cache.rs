//! Fixed-size page store filled in place by the scheduler.
//!
//! A [`PageCache`] is created with one placeholder per page and never grows or
//! shrinks; each slot is written exactly once. [`SharedPageCache`] adds the
//! load generation guard and publishes snapshots over a `watch` channel so
//! readers learn about progress without diffing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::PageCacheError;
use crate::{PageContent, RenderImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Pending,
    Rendered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub page_index: usize,
    pub raster: Option<Arc<RenderImage>>,
    pub text: Arc<str>,
    pub status: PageStatus,
}

impl PageRecord {
    fn placeholder(page_index: usize) -> Self {
        Self {
            page_index,
            raster: None,
            text: Arc::from(""),
            status: PageStatus::Pending,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != PageStatus::Pending
    }
}

#[derive(Debug)]
pub struct PageCache {
    records: Vec<PageRecord>,
    rendered: usize,
    failed: usize,
}

impl PageCache {
    pub fn new(page_count: usize) -> Self {
        Self {
            records: (0..page_count).map(PageRecord::placeholder).collect(),
            rendered: 0,
            failed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PageRecord> {
        self.records.get(index)
    }

    pub fn fill(&mut self, index: usize, content: PageContent) -> Result<(), PageCacheError> {
        let record = self.pending_slot(index)?;
        record.raster = Some(Arc::new(content.image));
        record.text = Arc::from(content.text);
        record.status = PageStatus::Rendered;
        self.rendered += 1;
        Ok(())
    }

    pub fn mark_failed(&mut self, index: usize) -> Result<(), PageCacheError> {
        let record = self.pending_slot(index)?;
        record.status = PageStatus::Failed;
        self.failed += 1;
        Ok(())
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.rendered + self.failed == self.records.len()
    }

    pub fn snapshot(&self, generation: u64) -> PageSnapshot {
        PageSnapshot {
            generation,
            records: Arc::from(self.records.as_slice()),
            rendered: self.rendered,
            failed: self.failed,
        }
    }

    fn pending_slot(&mut self, index: usize) -> Result<&mut PageRecord, PageCacheError> {
        let page_count = self.records.len();
        let record = self
            .records
            .get_mut(index)
            .ok_or(PageCacheError::OutOfRange { index, page_count })?;
        if record.is_settled() {
            return Err(PageCacheError::AlreadyFilled { index });
        }
        Ok(record)
    }
}

/// Read-only view of the cache at publish time. Rasters and texts are shared,
/// so cloning a snapshot is cheap.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    generation: u64,
    records: Arc<[PageRecord]>,
    rendered: usize,
    failed: usize,
}

impl PageSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            records: Arc::from(Vec::new()),
            rendered: 0,
            failed: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pages(&self) -> &[PageRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&PageRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.rendered + self.failed == self.records.len()
    }
}

/// Hands out load generations. Advancing invalidates every earlier
/// [`Generation`].
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> Generation {
        let id = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        Generation {
            id,
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    current: Arc<AtomicU64>,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.id
    }

    fn check(&self) -> Result<(), PageCacheError> {
        let current = self.current.load(Ordering::Acquire);
        if current == self.id {
            Ok(())
        } else {
            Err(PageCacheError::StaleGeneration {
                stale: self.id,
                current,
            })
        }
    }
}

/// Page cache bound to one load generation. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct SharedPageCache {
    inner: Arc<Mutex<PageCache>>,
    generation: Generation,
    publisher: Arc<watch::Sender<PageSnapshot>>,
}

impl SharedPageCache {
    pub fn new(page_count: usize, generation: Generation) -> (Self, watch::Receiver<PageSnapshot>) {
        let cache = PageCache::new(page_count);
        let (publisher, receiver) = watch::channel(cache.snapshot(generation.id()));
        let shared = Self {
            inner: Arc::new(Mutex::new(cache)),
            generation,
            publisher: Arc::new(publisher),
        };
        (shared, receiver)
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn generation(&self) -> u64 {
        self.generation.id()
    }

    pub fn is_current(&self) -> bool {
        self.generation.is_current()
    }

    pub fn ensure_current(&self) -> Result<(), PageCacheError> {
        self.generation.check()
    }

    pub fn fill(&self, index: usize, content: PageContent) -> Result<(), PageCacheError> {
        self.generation.check()?;
        self.inner.lock().fill(index, content)
    }

    pub fn mark_failed(&self, index: usize) -> Result<(), PageCacheError> {
        self.generation.check()?;
        self.inner.lock().mark_failed(index)
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.inner.lock().snapshot(self.generation.id())
    }

    /// Sends the current contents to every subscriber. Stale caches publish
    /// nothing.
    pub fn publish(&self) -> Result<(), PageCacheError> {
        self.generation.check()?;
        let snapshot = self.snapshot();
        self.publisher.send_replace(snapshot);
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<PageSnapshot> {
        self.publisher.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(tag: u8, text: &str) -> PageContent {
        PageContent {
            image: RenderImage {
                width: 1,
                height: 1,
                pixels: vec![tag, tag, tag, 255],
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn new_cache_holds_one_placeholder_per_page() {
        let cache = PageCache::new(5);
        assert_eq!(cache.len(), 5);
        for (index, record) in cache.snapshot(1).pages().iter().enumerate() {
            assert_eq!(record.page_index, index);
            assert!(record.raster.is_none());
            assert!(record.text.is_empty());
            assert_eq!(record.status, PageStatus::Pending);
        }
        assert!(!cache.is_complete());
    }

    #[test]
    fn slots_are_written_once() {
        let mut cache = PageCache::new(2);
        cache.fill(0, content(7, "alpha")).unwrap();
        assert_eq!(
            cache.fill(0, content(8, "beta")),
            Err(PageCacheError::AlreadyFilled { index: 0 })
        );
        assert_eq!(&*cache.get(0).unwrap().text, "alpha");

        cache.mark_failed(1).unwrap();
        assert_eq!(
            cache.mark_failed(1),
            Err(PageCacheError::AlreadyFilled { index: 1 })
        );
        assert!(cache.is_complete());
        assert_eq!(cache.rendered_count(), 1);
        assert_eq!(cache.failed_count(), 1);
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut cache = PageCache::new(3);
        assert_eq!(
            cache.fill(3, content(1, "")),
            Err(PageCacheError::OutOfRange {
                index: 3,
                page_count: 3
            })
        );
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut cache = PageCache::new(2);
        let before = cache.snapshot(1);
        cache.fill(1, content(3, "later")).unwrap();
        assert!(before.get(1).unwrap().raster.is_none());
        assert!(cache.snapshot(1).get(1).unwrap().raster.is_some());
    }

    #[test]
    fn stale_generation_cannot_write_or_publish() {
        let counter = GenerationCounter::new();
        let first = counter.advance();
        let (cache, mut receiver) = SharedPageCache::new(3, first);
        cache.fill(0, content(1, "one")).unwrap();

        let second = counter.advance();
        assert!(second.is_current());
        assert!(!cache.is_current());
        assert_eq!(
            cache.fill(1, content(2, "two")),
            Err(PageCacheError::StaleGeneration {
                stale: 1,
                current: 2
            })
        );
        assert!(cache.publish().is_err());
        assert!(!receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().get(1).unwrap().raster.is_none());
    }

    #[test]
    fn publish_notifies_subscribers() {
        let counter = GenerationCounter::new();
        let (cache, mut receiver) = SharedPageCache::new(2, counter.advance());
        cache.fill(0, content(1, "one")).unwrap();
        cache.publish().unwrap();

        assert!(receiver.has_changed().unwrap());
        let snapshot = receiver.borrow_and_update().clone();
        assert_eq!(snapshot.rendered_count(), 1);
        assert_eq!(snapshot.generation(), 1);
    }
}
