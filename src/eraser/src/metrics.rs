//! Erasure statistics
//!
//! Thread-safe counters and gauges shared between the eraser thread and readers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Thread-safe erasure metrics
#[derive(Debug, Clone, Default)]
pub struct EraserMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    files_erased: AtomicU64,
    files_deleted_reserved: AtomicU64,
    files_already_deleted: AtomicU64,
    fsyncs: AtomicU64,
    reads: AtomicU64,
    read_bytes: AtomicU64,
    writes: AtomicU64,
    write_bytes: AtomicU64,
    entries_erased: AtomicU64,
    entries_rezeroed: AtomicU64,
    suspects_transferred: AtomicU64,
    deltas_promoted: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_aborted: AtomicU64,
    cycle_start_ms: AtomicU64,
    cycle_end_ms: AtomicU64,
    files_remaining: AtomicU64,
}

impl EraserMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file_erased(&self) {
        self.inner.files_erased.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reserved_file_deleted(&self) {
        self.inner
            .files_deleted_reserved
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_already_deleted(&self) {
        self.inner
            .files_already_deleted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fsync(&self) {
        self.inner.fsyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64) {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_entries_erased(&self, count: u64) {
        self.inner
            .entries_erased
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_entries_rezeroed(&self, count: u64) {
        self.inner
            .entries_rezeroed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_suspects_transferred(&self, count: u64) {
        self.inner
            .suspects_transferred
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delta_promoted(&self) {
        self.inner.deltas_promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_completed(&self) {
        self.inner.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_aborted(&self) {
        self.inner.cycles_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the running cycle's bounds
    pub fn set_cycle(&self, start_ms: u64, end_ms: u64) {
        self.inner.cycle_start_ms.store(start_ms, Ordering::Relaxed);
        self.inner.cycle_end_ms.store(end_ms, Ordering::Relaxed);
    }

    pub fn set_files_remaining(&self, count: u64) {
        self.inner.files_remaining.store(count, Ordering::Relaxed);
    }

    pub fn files_erased(&self) -> u64 {
        self.inner.files_erased.load(Ordering::Relaxed)
    }

    pub fn files_deleted_reserved(&self) -> u64 {
        self.inner.files_deleted_reserved.load(Ordering::Relaxed)
    }

    pub fn files_already_deleted(&self) -> u64 {
        self.inner.files_already_deleted.load(Ordering::Relaxed)
    }

    pub fn fsyncs(&self) -> u64 {
        self.inner.fsyncs.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }

    pub fn read_bytes(&self) -> u64 {
        self.inner.read_bytes.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    pub fn write_bytes(&self) -> u64 {
        self.inner.write_bytes.load(Ordering::Relaxed)
    }

    pub fn entries_erased(&self) -> u64 {
        self.inner.entries_erased.load(Ordering::Relaxed)
    }

    pub fn entries_rezeroed(&self) -> u64 {
        self.inner.entries_rezeroed.load(Ordering::Relaxed)
    }

    pub fn suspects_transferred(&self) -> u64 {
        self.inner.suspects_transferred.load(Ordering::Relaxed)
    }

    pub fn deltas_promoted(&self) -> u64 {
        self.inner.deltas_promoted.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_aborted(&self) -> u64 {
        self.inner.cycles_aborted.load(Ordering::Relaxed)
    }

    pub fn cycle_start_ms(&self) -> u64 {
        self.inner.cycle_start_ms.load(Ordering::Relaxed)
    }

    pub fn cycle_end_ms(&self) -> u64 {
        self.inner.cycle_end_ms.load(Ordering::Relaxed)
    }

    pub fn files_remaining(&self) -> u64 {
        self.inner.files_remaining.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            files_erased: self.files_erased(),
            files_deleted_reserved: self.files_deleted_reserved(),
            files_already_deleted: self.files_already_deleted(),
            fsyncs: self.fsyncs(),
            reads: self.reads(),
            read_bytes: self.read_bytes(),
            writes: self.writes(),
            write_bytes: self.write_bytes(),
            entries_erased: self.entries_erased(),
            entries_rezeroed: self.entries_rezeroed(),
            suspects_transferred: self.suspects_transferred(),
            deltas_promoted: self.deltas_promoted(),
            cycles_completed: self.cycles_completed(),
            cycles_aborted: self.cycles_aborted(),
            cycle_start_ms: self.cycle_start_ms(),
            cycle_end_ms: self.cycle_end_ms(),
            files_remaining: self.files_remaining(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub files_erased: u64,
    pub files_deleted_reserved: u64,
    pub files_already_deleted: u64,
    pub fsyncs: u64,
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub entries_erased: u64,
    pub entries_rezeroed: u64,
    pub suspects_transferred: u64,
    pub deltas_promoted: u64,
    pub cycles_completed: u64,
    pub cycles_aborted: u64,
    pub cycle_start_ms: u64,
    pub cycle_end_ms: u64,
    pub files_remaining: u64,
}

impl MetricsSummary {
    /// Format bytes as MB with 2 decimal places
    fn format_mb(bytes: u64) -> String {
        format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Log the metrics summary
    pub fn log(&self) {
        info!("=== Data Eraser Metrics Summary ===");
        info!(
            "Files: {} erased, {} deleted as reserved, {} already deleted, {} remaining",
            self.files_erased,
            self.files_deleted_reserved,
            self.files_already_deleted,
            self.files_remaining
        );
        info!(
            "Entries: {} erased, {} re-zeroed, {} suspects transferred, {} deltas promoted",
            self.entries_erased,
            self.entries_rezeroed,
            self.suspects_transferred,
            self.deltas_promoted
        );
        info!(
            "I/O: {} reads ({} MB), {} writes ({} MB), {} fsyncs",
            self.reads,
            Self::format_mb(self.read_bytes),
            self.writes,
            Self::format_mb(self.write_bytes),
            self.fsyncs
        );
        info!(
            "Cycles: {} completed, {} aborted",
            self.cycles_completed, self.cycles_aborted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let summary = EraserMetrics::new().summary();
        assert_eq!(summary, MetricsSummary::default());
    }

    #[test]
    fn test_io_counters() {
        let metrics = EraserMetrics::new();
        metrics.record_read(100);
        metrics.record_read(50);
        metrics.record_write(1);
        metrics.record_fsync();

        assert_eq!(metrics.reads(), 2);
        assert_eq!(metrics.read_bytes(), 150);
        assert_eq!(metrics.writes(), 1);
        assert_eq!(metrics.write_bytes(), 1);
        assert_eq!(metrics.fsyncs(), 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = EraserMetrics::new();
        let reader = metrics.clone();
        metrics.record_file_erased();
        metrics.record_entries_erased(3);
        metrics.set_cycle(10, 20);
        metrics.set_files_remaining(4);

        let summary = reader.summary();
        assert_eq!(summary.files_erased, 1);
        assert_eq!(summary.entries_erased, 3);
        assert_eq!(summary.cycle_start_ms, 10);
        assert_eq!(summary.cycle_end_ms, 20);
        assert_eq!(summary.files_remaining, 4);
    }

    #[test]
    fn test_summary_logs() {
        let metrics = EraserMetrics::new();
        metrics.record_cycle_completed();
        let summary = metrics.summary();
        summary.log();
        assert_eq!(summary.cycles_completed, 1);
    }
}
