//! Document store metrics.
//!
//! Lock-free counters for the operations a [`DocumentStore`](crate::DocumentStore)
//! serves: loads, queries, commits, conflicts, bulk operations and expired
//! documents, plus cumulative commit latency.
//!
//! # Memory Ordering Strategy
//!
//! All atomic operations use `Ordering::Relaxed`. Each counter is independent
//! and monotonically increasing, so atomicity of the individual `fetch_add` is
//! all that is needed. A [`snapshot`](StoreMetrics::snapshot) reads counters
//! one after another and may be slightly inconsistent across counters, which
//! is fine for telemetry.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use identity_docstore::metrics::StoreMetrics;
//!
//! let metrics = StoreMetrics::new();
//! metrics.record_commit(Duration::from_micros(250));
//! metrics.record_conflict();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.commit_count, 1);
//! assert_eq!(snapshot.conflict_rate(), 0.5);
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Metrics snapshot for export.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct StoreMetricsSnapshot {
    /// Documents loaded or checked for existence.
    #[builder(default)]
    pub load_count: u64,
    /// Queries and counts served.
    #[builder(default)]
    pub query_count: u64,
    /// Successful commits.
    #[builder(default)]
    pub commit_count: u64,
    /// Cumulative latency of successful commits, in microseconds.
    #[builder(default)]
    pub commit_latency_us: u64,
    /// Commits rejected by a failed condition or guard.
    #[builder(default)]
    pub conflict_count: u64,
    /// Bulk operations started.
    #[builder(default)]
    pub bulk_operation_count: u64,
    /// Documents removed by expiration.
    #[builder(default)]
    pub expired_documents: u64,
}

impl StoreMetricsSnapshot {
    /// Average latency of successful commits in microseconds.
    #[must_use]
    pub fn avg_commit_latency_us(&self) -> f64 {
        if self.commit_count == 0 {
            return 0.0;
        }
        self.commit_latency_us as f64 / self.commit_count as f64
    }

    /// Share of commit attempts that were rejected.
    #[must_use]
    pub fn conflict_rate(&self) -> f64 {
        let attempts = self.commit_count + self.conflict_count;
        if attempts == 0 {
            return 0.0;
        }
        self.conflict_count as f64 / attempts as f64
    }

    /// Every counted operation.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.load_count
            + self.query_count
            + self.commit_count
            + self.conflict_count
            + self.bulk_operation_count
    }
}

/// Collects operation counts for a document store.
#[derive(Clone, Default)]
pub struct StoreMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    load_count: AtomicU64,
    query_count: AtomicU64,
    commit_count: AtomicU64,
    commit_latency_us: AtomicU64,
    conflict_count: AtomicU64,
    bulk_operation_count: AtomicU64,
    expired_documents: AtomicU64,
}

impl StoreMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a load or existence check.
    pub fn record_load(&self) {
        self.inner.load_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a query or count.
    pub fn record_query(&self) {
        self.inner.query_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful commit.
    pub fn record_commit(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.inner.commit_count.fetch_add(1, Ordering::Relaxed);
        self.inner.commit_latency_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Records a rejected commit.
    pub fn record_conflict(&self) {
        self.inner.conflict_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a started bulk operation.
    pub fn record_bulk_operation(&self) {
        self.inner.bulk_operation_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records documents removed by expiration.
    pub fn record_expired(&self, count: u64) {
        self.inner.expired_documents.fetch_add(count, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            load_count: self.inner.load_count.load(Ordering::Relaxed),
            query_count: self.inner.query_count.load(Ordering::Relaxed),
            commit_count: self.inner.commit_count.load(Ordering::Relaxed),
            commit_latency_us: self.inner.commit_latency_us.load(Ordering::Relaxed),
            conflict_count: self.inner.conflict_count.load(Ordering::Relaxed),
            bulk_operation_count: self.inner.bulk_operation_count.load(Ordering::Relaxed),
            expired_documents: self.inner.expired_documents.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.inner.load_count.store(0, Ordering::Relaxed);
        self.inner.query_count.store(0, Ordering::Relaxed);
        self.inner.commit_count.store(0, Ordering::Relaxed);
        self.inner.commit_latency_us.store(0, Ordering::Relaxed);
        self.inner.conflict_count.store(0, Ordering::Relaxed);
        self.inner.bulk_operation_count.store(0, Ordering::Relaxed);
        self.inner.expired_documents.store(0, Ordering::Relaxed);
    }

    /// Emits the current snapshot as a structured `info` event.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();

        if snapshot.total_operations() == 0 {
            return;
        }

        tracing::info!(
            load_count = snapshot.load_count,
            query_count = snapshot.query_count,
            commit_count = snapshot.commit_count,
            avg_commit_latency_us = snapshot.avg_commit_latency_us(),
            conflict_count = snapshot.conflict_count,
            conflict_rate = snapshot.conflict_rate(),
            bulk_operation_count = snapshot.bulk_operation_count,
            expired_documents = snapshot.expired_documents,
            "Document store metrics"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_operations() {
        let metrics = StoreMetrics::new();
        metrics.record_load();
        metrics.record_query();
        metrics.record_commit(Duration::from_micros(100));
        metrics.record_commit(Duration::from_micros(300));
        metrics.record_bulk_operation();
        metrics.record_expired(4);

        let expected = StoreMetricsSnapshot::builder()
            .load_count(1)
            .query_count(1)
            .commit_count(2)
            .commit_latency_us(400)
            .bulk_operation_count(1)
            .expired_documents(4)
            .build();
        assert_eq!(metrics.snapshot(), expected);
        assert_eq!(metrics.snapshot().avg_commit_latency_us(), 200.0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StoreMetrics::new();
        let clone = metrics.clone();
        clone.record_conflict();
        assert_eq!(metrics.snapshot().conflict_count, 1);
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let metrics = StoreMetrics::new();
        metrics.record_commit(Duration::from_micros(10));
        metrics.reset();
        assert_eq!(metrics.snapshot(), StoreMetricsSnapshot::default());
    }

    #[test]
    fn test_rates_handle_empty_snapshot() {
        let snapshot = StoreMetricsSnapshot::default();
        assert_eq!(snapshot.conflict_rate(), 0.0);
        assert_eq!(snapshot.avg_commit_latency_us(), 0.0);
    }

    #[test]
    fn test_log_metrics_no_ops() {
        StoreMetrics::new().log_metrics();
    }
}
