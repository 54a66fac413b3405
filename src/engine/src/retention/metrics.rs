//! Retention Enforcement Metrics
//!
//! Thread-safe counters for monitoring retention runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for tracking retention enforcement operations
#[derive(Debug, Clone)]
pub struct RetentionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Number of thresholds computed
    thresholds_computed: AtomicUsize,
    /// Store pages fetched, including empty ones
    pages_fetched: AtomicUsize,
    subjects_disabled: AtomicUsize,
    subjects_deleted: AtomicUsize,
    content_archived: AtomicUsize,
    /// Protected subjects removed from fetched pages
    protected_skipped: AtomicUsize,
    /// Records skipped after a non-fatal store error
    records_skipped: AtomicUsize,
    observer_failures: AtomicUsize,
    passes_failed: AtomicUsize,
    /// Total duration in milliseconds
    total_duration_ms: AtomicU64,
}

impl Default for RetentionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetentionMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                thresholds_computed: AtomicUsize::new(0),
                pages_fetched: AtomicUsize::new(0),
                subjects_disabled: AtomicUsize::new(0),
                subjects_deleted: AtomicUsize::new(0),
                content_archived: AtomicUsize::new(0),
                protected_skipped: AtomicUsize::new(0),
                records_skipped: AtomicUsize::new(0),
                observer_failures: AtomicUsize::new(0),
                passes_failed: AtomicUsize::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_threshold_computed(&self) {
        self.inner
            .thresholds_computed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_fetched(&self) {
        self.inner.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subjects_disabled(&self, count: usize) {
        self.inner
            .subjects_disabled
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_subjects_deleted(&self, count: usize) {
        self.inner
            .subjects_deleted
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_content_archived(&self, count: usize) {
        self.inner
            .content_archived
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_protected_skipped(&self, count: usize) {
        self.inner
            .protected_skipped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_record_skipped(&self) {
        self.inner.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_observer_failures(&self, count: usize) {
        self.inner
            .observer_failures
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_pass_failed(&self) {
        self.inner.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record operation duration
    pub fn record_duration_ms(&self, duration_ms: u64) {
        self.inner
            .total_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn thresholds_computed(&self) -> usize {
        self.inner.thresholds_computed.load(Ordering::Relaxed)
    }

    pub fn pages_fetched(&self) -> usize {
        self.inner.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn subjects_disabled(&self) -> usize {
        self.inner.subjects_disabled.load(Ordering::Relaxed)
    }

    pub fn subjects_deleted(&self) -> usize {
        self.inner.subjects_deleted.load(Ordering::Relaxed)
    }

    pub fn content_archived(&self) -> usize {
        self.inner.content_archived.load(Ordering::Relaxed)
    }

    pub fn protected_skipped(&self) -> usize {
        self.inner.protected_skipped.load(Ordering::Relaxed)
    }

    pub fn records_skipped(&self) -> usize {
        self.inner.records_skipped.load(Ordering::Relaxed)
    }

    pub fn observer_failures(&self) -> usize {
        self.inner.observer_failures.load(Ordering::Relaxed)
    }

    pub fn passes_failed(&self) -> usize {
        self.inner.passes_failed.load(Ordering::Relaxed)
    }

    /// Get total duration in milliseconds
    pub fn total_duration_ms(&self) -> u64 {
        self.inner.total_duration_ms.load(Ordering::Relaxed)
    }
}
