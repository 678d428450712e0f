use crate::model::{Event, Hit};
use crate::storage::{Store, StoreError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default cap on rows kept after failed saves.
pub const DEFAULT_MAX_BUFFERED_ROWS: usize = 100_000;

/// Thread-safe buffer that accumulates hits and events and saves them to the
/// store once the combined count reaches the threshold.
pub struct HitBuffer {
    hits: Mutex<Vec<Hit>>,
    events: Mutex<Vec<Event>>,
    flush_threshold: usize,
    max_rows: usize,
    /// Set while the last save failed. Pushes then leave retries to the periodic flush.
    backoff: AtomicBool,
    store: Arc<dyn Store>,
}

impl HitBuffer {
    pub fn new(flush_threshold: usize, store: Arc<dyn Store>) -> Self {
        let flush_threshold = flush_threshold.max(1);
        Self {
            hits: Mutex::new(Vec::with_capacity(flush_threshold)),
            events: Mutex::new(Vec::new()),
            flush_threshold,
            max_rows: DEFAULT_MAX_BUFFERED_ROWS.max(flush_threshold),
            backoff: AtomicBool::new(false),
            store,
        }
    }

    /// Cap the rows kept after failed saves. Never below the flush threshold.
    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(self.flush_threshold);
        self
    }

    /// The store buffered rows are saved to.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Add a hit. Returns the number of flushed rows when the threshold was reached.
    pub fn push_hit(&self, hit: Hit) -> Result<Option<usize>, BufferError> {
        self.hits.lock().push(hit);
        self.flush_if_full()
    }

    /// Add an event. Returns the number of flushed rows when the threshold was reached.
    pub fn push_event(&self, event: Event) -> Result<Option<usize>, BufferError> {
        self.events.lock().push(event);
        self.flush_if_full()
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len() + self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Save all buffered rows.
    ///
    /// Rows of a failed save are put back, up to the row cap, so the next
    /// flush retries them.
    pub fn flush(&self) -> Result<usize, BufferError> {
        let hits = std::mem::take(&mut *self.hits.lock());
        let events = std::mem::take(&mut *self.events.lock());
        if hits.is_empty() && events.is_empty() {
            self.backoff.store(false, Ordering::Relaxed);
            return Ok(0);
        }

        if let Err(e) = self.store.save_hits(&hits) {
            self.backoff.store(true, Ordering::Relaxed);
            self.requeue(hits, events);
            return Err(e.into());
        }
        if let Err(e) = self.store.save_events(&events) {
            self.backoff.store(true, Ordering::Relaxed);
            self.requeue(Vec::new(), events);
            return Err(e.into());
        }
        self.backoff.store(false, Ordering::Relaxed);

        let count = hits.len() + events.len();
        tracing::info!(hits = hits.len(), events = events.len(), "Flushed buffer");
        Ok(count)
    }

    fn flush_if_full(&self) -> Result<Option<usize>, BufferError> {
        if self.backoff.load(Ordering::Relaxed) {
            self.trim();
            Ok(None)
        } else if self.len() >= self.flush_threshold {
            self.flush().map(Some)
        } else {
            Ok(None)
        }
    }

    fn requeue(&self, hits: Vec<Hit>, events: Vec<Event>) {
        let mut buffered = self.hits.lock();
        let newer = std::mem::replace(&mut *buffered, hits);
        buffered.extend(newer);
        drop(buffered);

        let mut buffered = self.events.lock();
        let newer = std::mem::replace(&mut *buffered, events);
        buffered.extend(newer);
        drop(buffered);

        self.trim();
    }

    /// Drop the oldest rows beyond the cap, hits first.
    fn trim(&self) {
        let mut hits = self.hits.lock();
        let mut events = self.events.lock();
        let total = hits.len() + events.len();
        if total <= self.max_rows {
            return;
        }
        let excess = total - self.max_rows;
        let from_hits = excess.min(hits.len());
        hits.drain(..from_hits);
        events.drain(..excess - from_hits);
        tracing::warn!(dropped = excess, max_rows = self.max_rows, "Buffer full, dropped oldest rows");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("flush error: {0}")]
    Flush(#[from] StoreError),
}
