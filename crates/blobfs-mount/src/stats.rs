//! Counters for cache manager activity.
//!
//! All counters are lock-free atomics; [`CacheStats::snapshot`] gives a
//! consistent-enough copy for logging or export.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters owned by the cache manager.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Records queued by `record_closed`.
    pub recorded: AtomicU64,
    /// Records removed by `cancel_pending_eviction`.
    pub cancelled: AtomicU64,
    /// Files removed from the cache.
    pub evictions: AtomicU64,
    /// Evictions that failed; the record is dropped regardless.
    pub eviction_failures: AtomicU64,
    /// Candidates that were reopened or re-recorded before they could be evicted.
    pub skipped: AtomicU64,
    /// Bytes freed by evictions.
    pub bytes_evicted: AtomicU64,
    /// Completed reclaim passes.
    pub reclaim_passes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_recorded(&self) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self, bytes: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.bytes_evicted.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction_failure(&self) {
        self.eviction_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pass(&self) {
        self.reclaim_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            recorded: self.recorded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes_evicted: self.bytes_evicted.load(Ordering::Relaxed),
            reclaim_passes: self.reclaim_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub recorded: u64,
    pub cancelled: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
    pub skipped: u64,
    pub bytes_evicted: u64,
    pub reclaim_passes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CacheStats::new();
        stats.record_recorded();
        stats.record_eviction(100);
        stats.record_eviction(50);
        stats.record_eviction_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.recorded, 1);
        assert_eq!(snap.evictions, 2);
        assert_eq!(snap.bytes_evicted, 150);
        assert_eq!(snap.eviction_failures, 1);
        assert_eq!(snap.cancelled, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(CacheStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_cancelled();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().cancelled, 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = CacheStatsSnapshot {
            evictions: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&snap).unwrap();
        let restored: CacheStatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snap);
    }
}
