//! Lock-free counters for stage and chain statistics.

use crate::result::ProcessStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic outcome counters with duration aggregates.
///
/// Updated after every result; derived figures are computed on read, so a
/// snapshot taken during updates may be slightly inconsistent.
#[derive(Debug)]
pub struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    retry: AtomicU64,
    total_micros: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
    since: Instant,
}

impl Counters {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            retry: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
            since: Instant::now(),
        }
    }

    pub fn record(&self, status: ProcessStatus, duration: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ProcessStatus::Success => &self.success,
            ProcessStatus::Failed => &self.failed,
            ProcessStatus::Skipped => &self.skipped,
            ProcessStatus::Retry => &self.retry,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn count(&self, status: ProcessStatus) -> u64 {
        match status {
            ProcessStatus::Success => &self.success,
            ProcessStatus::Failed => &self.failed,
            ProcessStatus::Skipped => &self.skipped,
            ProcessStatus::Retry => &self.retry,
        }
        .load(Ordering::Relaxed)
    }

    /// Fraction of recorded results that succeeded, 0.0 when empty.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.count(ProcessStatus::Success) as f64 / total as f64
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total();
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        let min = self.min_micros.load(Ordering::Relaxed);
        let elapsed = self.since.elapsed().as_secs_f64();

        StatsSnapshot {
            total,
            success: self.count(ProcessStatus::Success),
            failed: self.count(ProcessStatus::Failed),
            skipped: self.count(ProcessStatus::Skipped),
            retry: self.count(ProcessStatus::Retry),
            success_rate: self.success_rate(),
            avg_duration_ms: if total == 0 {
                0.0
            } else {
                total_micros as f64 / total as f64 / 1000.0
            },
            min_duration_ms: if min == u64::MAX { 0.0 } else { min as f64 / 1000.0 },
            max_duration_ms: self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            throughput_per_sec: if elapsed > 0.0 { total as f64 / elapsed } else { 0.0 },
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`Counters`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retry: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub throughput_per_sec: f64,
}

/// Counters for one named stage.
#[derive(Debug)]
pub struct ProcessorStats {
    name: String,
    counters: Counters,
}

impl ProcessorStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Counters::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, status: ProcessStatus, duration: Duration) {
        self.counters.record(status, duration);
    }

    pub fn total_count(&self) -> u64 {
        self.counters.total()
    }

    pub fn success_count(&self) -> u64 {
        self.counters.count(ProcessStatus::Success)
    }

    pub fn failed_count(&self) -> u64 {
        self.counters.count(ProcessStatus::Failed)
    }

    pub fn skipped_count(&self) -> u64 {
        self.counters.count(ProcessStatus::Skipped)
    }

    pub fn retry_count(&self) -> u64 {
        self.counters.count(ProcessStatus::Retry)
    }

    pub fn success_rate(&self) -> f64 {
        self.counters.success_rate()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }
}

/// Counters across every stage plus whole-chain run counts.
#[derive(Debug, Default)]
pub struct GlobalStats {
    results: Counters,
    chains: AtomicU64,
    completed: AtomicU64,
    halted: AtomicU64,
}

/// Point-in-time view of [`GlobalStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSnapshot {
    pub chains: u64,
    pub completed: u64,
    pub halted: u64,
    pub results: StatsSnapshot,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: ProcessStatus, duration: Duration) {
        self.results.record(status, duration);
    }

    pub fn record_chain(&self, completed: bool) {
        self.chains.fetch_add(1, Ordering::Relaxed);
        if completed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.halted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn chain_count(&self) -> u64 {
        self.chains.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            chains: self.chains.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            halted: self.halted.load(Ordering::Relaxed),
            results: self.results.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_success_rate() {
        let stats = ProcessorStats::new("validator");
        for i in 0..10 {
            let status = if i < 7 {
                ProcessStatus::Success
            } else {
                ProcessStatus::Failed
            };
            stats.record(status, Duration::from_millis(1));
        }

        assert_eq!(stats.total_count(), 10);
        assert_eq!(stats.success_count(), 7);
        assert_eq!(stats.failed_count(), 3);
        assert!((stats.success_rate() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_duration_aggregates() {
        let counters = Counters::new();
        counters.record(ProcessStatus::Success, Duration::from_micros(500));
        counters.record(ProcessStatus::Skipped, Duration::from_micros(1500));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.skipped, 1);
        assert!((snapshot.min_duration_ms - 0.5).abs() < 1e-9);
        assert!((snapshot.max_duration_ms - 1.5).abs() < 1e-9);
        assert!((snapshot.avg_duration_ms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Counters::new().snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.min_duration_ms, 0.0);
    }

    #[test]
    fn test_global_chain_counts() {
        let global = GlobalStats::new();
        global.record_chain(true);
        global.record_chain(false);
        global.record_chain(true);

        let snapshot = global.snapshot();
        assert_eq!(snapshot.chains, 3);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.halted, 1);
    }
}
