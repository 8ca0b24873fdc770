//! Metrics hooks for synchronisation runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for synchronisation activity.
pub trait SyncMetrics: Send + Sync {
    /// A new file was batch inserted.
    fn file_inserted(&self);
    /// An indexed file was patched in a transaction.
    fn file_patched(&self);
    /// An indexed file was deleted and re-inserted.
    fn file_replaced(&self);
    /// A file's subgraph was removed.
    fn file_deleted(&self);
    /// A file failed to synchronise.
    fn file_failed(&self);
    /// A pending reference was added to a proxy list.
    fn proxy_recorded(&self);
    /// A pending reference was materialised as an edge.
    fn proxy_resolved(&self);
    /// Derived values were recomputed.
    fn derived_computed(&self, count: u64);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    fn file_inserted(&self) {}
    fn file_patched(&self) {}
    fn file_replaced(&self) {}
    fn file_deleted(&self) {}
    fn file_failed(&self) {}
    fn proxy_recorded(&self) {}
    fn proxy_resolved(&self) {}
    fn derived_computed(&self, _count: u64) {}
}

/// Atomic counters, safe to share across threads.
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Files inserted in bulk.
    pub files_inserted: AtomicU64,
    /// Files patched in a transaction.
    pub files_patched: AtomicU64,
    /// Files deleted and inserted again.
    pub files_replaced: AtomicU64,
    /// Files whose subgraph was removed.
    pub files_deleted: AtomicU64,
    /// Files whose synchronisation failed.
    pub files_failed: AtomicU64,
    /// Pending references recorded.
    pub proxies_recorded: AtomicU64,
    /// Pending references turned into edges.
    pub proxies_resolved: AtomicU64,
    /// Derived values computed.
    pub derived_computed: AtomicU64,
}

impl CounterMetrics {
    /// Reads one counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl SyncMetrics for CounterMetrics {
    fn file_inserted(&self) {
        self.files_inserted.fetch_add(1, Ordering::Relaxed);
    }

    fn file_patched(&self) {
        self.files_patched.fetch_add(1, Ordering::Relaxed);
    }

    fn file_replaced(&self) {
        self.files_replaced.fetch_add(1, Ordering::Relaxed);
    }

    fn file_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn proxy_recorded(&self) {
        self.proxies_recorded.fetch_add(1, Ordering::Relaxed);
    }

    fn proxy_resolved(&self) {
        self.proxies_resolved.fetch_add(1, Ordering::Relaxed);
    }

    fn derived_computed(&self, count: u64) {
        self.derived_computed.fetch_add(count, Ordering::Relaxed);
    }
}

/// Default metrics sink: [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn SyncMetrics> {
    Arc::new(NoopMetrics)
}
