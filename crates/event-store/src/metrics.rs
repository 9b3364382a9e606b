use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct EsMetrics {
    inner: Arc<EsMetricsInner>,
}

#[derive(Default)]
struct EsMetricsInner {
    appended: AtomicU64,
    conflicts: AtomicU64,
    dropped_subscribers: AtomicU64,
    hook_panics: AtomicU64,
    journal_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EsMetricsSnapshot {
    pub appended: u64,
    pub conflicts: u64,
    pub dropped_subscribers: u64,
    pub hook_panics: u64,
    pub journal_errors: u64,
}

impl EsMetrics {
    pub fn record_appended(&self, count: u64) {
        self.inner.appended.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_subscribers(&self, count: u64) {
        if count > 0 {
            self.inner
                .dropped_subscribers
                .fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_hook_panic(&self) {
        self.inner.hook_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journal_error(&self) {
        self.inner.journal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EsMetricsSnapshot {
        EsMetricsSnapshot {
            appended: self.inner.appended.load(Ordering::Relaxed),
            conflicts: self.inner.conflicts.load(Ordering::Relaxed),
            dropped_subscribers: self.inner.dropped_subscribers.load(Ordering::Relaxed),
            hook_panics: self.inner.hook_panics.load(Ordering::Relaxed),
            journal_errors: self.inner.journal_errors.load(Ordering::Relaxed),
        }
    }
}
