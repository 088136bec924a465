//! Per-operation timing counters.
//!
//! Owned by the engine, never global. Recording is silent; call
//! [`OperationMetrics::flush`] to emit the current values as one
//! `tracing::info!` event per operation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Aggregate timings of one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    fn record(&mut self, elapsed: Duration, success: bool) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.avg_ms = (self.avg_ms * self.count as f64 + ms) / (self.count + 1) as f64;
        self.count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.count as f64;
    }
}

/// Snapshot returned by `MemoryEngine::metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub operations: BTreeMap<String, OperationStats>,
    pub cache: CacheStats,
    /// Retrieval engine invocations (cache misses that reached the strategies)
    pub retrievals: u64,
}

#[derive(Debug, Default)]
pub struct OperationMetrics {
    stats: Mutex<BTreeMap<&'static str, OperationStats>>,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<&'static str, OperationStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, operation: &'static str, elapsed: Duration, success: bool) {
        self.lock()
            .entry(operation)
            .or_default()
            .record(elapsed, success);
        tracing::trace!(metric = operation, success, "operation recorded");
    }

    pub fn get(&self, operation: &str) -> Option<OperationStats> {
        self.lock().get(operation).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.lock()
            .iter()
            .map(|(op, stats)| (op.to_string(), *stats))
            .collect()
    }

    /// Emit all current values, one `info!` event per operation.
    pub fn flush(&self) {
        for (operation, stats) in self.lock().iter() {
            tracing::info!(
                metric = "flush",
                operation,
                count = stats.count,
                success_rate = stats.success_rate,
                avg_ms = stats.avg_ms,
                max_ms = stats.max_ms,
            );
        }
    }

    /// Reset all counters (useful in tests).
    pub fn reset(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_counts_and_timings() {
        let m = OperationMetrics::new();
        m.record("recall", Duration::from_millis(10), true);
        m.record("recall", Duration::from_millis(30), true);
        m.record("recall", Duration::from_millis(20), false);

        let s = m.get("recall").unwrap();
        assert_eq!((s.count, s.success_count, s.failure_count), (3, 2, 1));
        assert!((s.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.avg_ms - 20.0).abs() < 1e-9);
        assert!((s.min_ms - 10.0).abs() < 1e-9);
        assert!((s.max_ms - 30.0).abs() < 1e-9);
        assert!(m.get("retain").is_none());
    }

    #[test]
    fn test_snapshot_and_reset() {
        let m = OperationMetrics::new();
        m.record("retain", Duration::from_millis(1), true);
        m.record("reflect", Duration::from_millis(1), false);
        let snap = m.snapshot();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["reflect", "retain"]);
        m.flush();
        m.reset();
        assert!(m.snapshot().is_empty());
    }
}
