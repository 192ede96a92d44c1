//! Local cache garbage collection.
//!
//! Every file closed by the filesystem layer is queued here with its close
//! time. A single background thread periodically walks the queue and deletes
//! cached copies that are no longer needed:
//!
//! - **Age eviction**: a record is removed once it has been closed for longer
//!   than `file_cache_timeout`, or immediately if it was queued with `force`.
//! - **Disk-pressure eviction**: while usage is above `high_threshold`, records
//!   are evicted oldest-first regardless of age until usage drops below
//!   `low_threshold`.
//!
//! # Locking
//!
//! The queue has its own mutex. Evicting a record takes the path's primary
//! lock *before* re-taking the queue lock, the same order used by the open and
//! close paths, so an `open` that cancels the record under the path lock can
//! never race with the deletion of its file. After taking the path lock the
//! reclaimer re-checks that the exact record it picked (by sequence number) is
//! still queued; a reopened or re-closed file is skipped.
//!
//! Open handles are counted per path under the queue lock. A path with an
//! open handle is never evicted, even when a record for it is queued (for
//! example after an unlink of a file that is still open).
//!
//! The queue lives only in memory. Files left in the cache directory by a
//! previous run are not tracked until they are opened again.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use blobfs_core::layout::{CacheLayout, normalize_path, rebase_path};
use blobfs_core::locks::PathLockRegistry;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::MountConfig;
use crate::disk::filesystem_usage;
use crate::error::{CacheError, CacheResult};
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// Name of the background reclaim thread.
pub const RECLAIM_THREAD_NAME: &str = "blobfs-reclaim";

/// A closed file waiting for eviction.
#[derive(Debug, Clone)]
pub struct CachedFileRecord {
    pub path: String,
    pub local_path: PathBuf,
    pub closed_time: Instant,
    /// Evict on the next pass regardless of age.
    pub force_evict: bool,
    /// Distinguishes this record from later records for the same path.
    pub seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Ordered by close time, oldest first.
    records: VecDeque<CachedFileRecord>,
    /// Bytes accounted per cached path.
    accounted: HashMap<String, u64>,
    usage_bytes: u64,
    /// Open handle count per path; paths without handles have no entry.
    open_handles: HashMap<String, u32>,
    next_seq: u64,
}

impl QueueState {
    fn position(&self, path: &str) -> Option<usize> {
        self.records.iter().position(|r| r.path == path)
    }

    fn position_of_seq(&self, seq: u64) -> Option<usize> {
        self.records.iter().position(|r| r.seq == seq)
    }

    fn account(&mut self, path: &str, size: u64) {
        let previous = self.accounted.insert(path.to_string(), size).unwrap_or(0);
        self.usage_bytes = self.usage_bytes.saturating_sub(previous) + size;
    }

    fn unaccount(&mut self, path: &str) -> u64 {
        let bytes = self.accounted.remove(path).unwrap_or(0);
        self.usage_bytes = self.usage_bytes.saturating_sub(bytes);
        bytes
    }

    fn is_open(&self, path: &str) -> bool {
        self.open_handles.contains_key(path)
    }
}

/// Outcome of one reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Logical paths whose cached copy was removed, in eviction order.
    pub evicted: Vec<String>,
    /// Candidates that were cancelled or re-queued before they could be evicted.
    pub skipped: usize,
    /// Evictions that failed; their records were dropped.
    pub failed: usize,
    /// Whether disk-pressure eviction was active when the pass started.
    pub pressure: bool,
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Tracks closed files and evicts their cached copies.
pub struct CacheManager {
    layout: CacheLayout,
    locks: Arc<PathLockRegistry>,
    file_cache_timeout: Duration,
    reclaim_interval: Duration,
    cache_size_bytes: Option<u64>,
    high_threshold: f64,
    low_threshold: f64,
    queue: Mutex<QueueState>,
    threshold_reached: AtomicBool,
    stats: CacheStats,
    worker: Mutex<Option<Worker>>,
}

impl CacheManager {
    pub fn new(config: &MountConfig, layout: CacheLayout, locks: Arc<PathLockRegistry>) -> Self {
        Self {
            layout,
            locks,
            file_cache_timeout: config.file_cache_timeout,
            reclaim_interval: config.reclaim_interval,
            cache_size_bytes: config.cache_size_bytes,
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
            queue: Mutex::new(QueueState::default()),
            threshold_reached: AtomicBool::new(false),
            stats: CacheStats::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Bytes currently accounted to cached files.
    pub fn usage_bytes(&self) -> u64 {
        self.queue.lock().usage_bytes
    }

    /// Number of records waiting for eviction.
    pub fn pending(&self) -> usize {
        self.queue.lock().records.len()
    }

    pub fn is_queued(&self, path: &str) -> bool {
        self.queue.lock().position(normalize_path(path)).is_some()
    }

    /// Number of open handles on `path`.
    pub fn open_handles(&self, path: &str) -> u32 {
        self.queue
            .lock()
            .open_handles
            .get(normalize_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// Whether disk-pressure eviction is active.
    pub fn threshold_reached(&self) -> bool {
        self.threshold_reached.load(Ordering::Acquire)
    }

    /// Queues a closed file for eviction. The caller holds the path's primary lock.
    ///
    /// A forced record stays forced when the path is recorded again before
    /// being reopened.
    pub fn record_closed(&self, path: &str, size: u64, force: bool) {
        self.record_closed_at(path, size, force, Instant::now());
    }

    /// [`record_closed`](Self::record_closed) with an explicit close time.
    pub fn record_closed_at(&self, path: &str, size: u64, force: bool, closed_time: Instant) {
        let path = normalize_path(path);
        let mut queue = self.queue.lock();
        let mut force = force;
        if let Some(index) = queue.position(path) {
            force |= queue.records.remove(index).is_some_and(|r| r.force_evict);
        }
        queue.account(path, size);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let index = queue.records.partition_point(|r| r.closed_time <= closed_time);
        queue.records.insert(
            index,
            CachedFileRecord {
                path: path.to_string(),
                local_path: self.layout.local_path(path),
                closed_time,
                force_evict: force,
                seq,
            },
        );
        drop(queue);

        self.stats.record_recorded();
        trace!(path, size, force, seq, "queued for eviction");
    }

    /// Removes the pending record for `path`, if any. Called on reopen with
    /// the path's primary lock held.
    ///
    /// Returns whether a record was removed.
    pub fn cancel_pending_eviction(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let mut queue = self.queue.lock();
        let Some(index) = queue.position(path) else {
            return false;
        };
        queue.records.remove(index);
        drop(queue);

        self.stats.record_cancelled();
        trace!(path, "cancelled pending eviction");
        true
    }

    /// Registers an open handle on `path` and cancels its pending eviction.
    /// The caller holds the path's primary lock.
    ///
    /// Returns the number of open handles including this one.
    pub fn open_handle(&self, path: &str) -> u32 {
        let path = normalize_path(path);
        let mut queue = self.queue.lock();
        let count = {
            let count = queue.open_handles.entry(path.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let cancelled = match queue.position(path) {
            Some(index) => queue.records.remove(index).is_some(),
            None => false,
        };
        drop(queue);

        if cancelled {
            self.stats.record_cancelled();
            trace!(path, "cancelled pending eviction");
        }
        count
    }

    /// Drops one open handle on `path`. The caller holds the path's primary lock.
    ///
    /// Returns whether no handle is left, in which case the caller queues the
    /// cached copy. A release without a matching open counts as the last one.
    pub fn release_handle(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let mut queue = self.queue.lock();
        let Some(count) = queue.open_handles.get_mut(path) else {
            return true;
        };
        if *count > 1 {
            *count -= 1;
            return false;
        }
        queue.open_handles.remove(path);
        true
    }

    /// Accounts a freshly populated cached copy that is not queued yet.
    pub fn add_cache_bytes(&self, path: &str, size: u64) {
        self.queue.lock().account(normalize_path(path), size);
    }

    /// Drops the record and accounting for `path` after its cached copy was
    /// removed outside the reclaimer. The caller holds the path's primary lock.
    ///
    /// Returns the number of bytes that were accounted to the path.
    pub fn forget(&self, path: &str) -> u64 {
        let path = normalize_path(path);
        let mut queue = self.queue.lock();
        if let Some(index) = queue.position(path) {
            queue.records.remove(index);
        }
        queue.unaccount(path)
    }

    /// Reconciles the queue after `source` was renamed to `destination`,
    /// completely or in part.
    ///
    /// Records and accounting under `source` whose cached copy is gone are
    /// dropped, and their open handles follow the copy to its new path.
    /// Copies still present under `source` stay tracked. Returns the number of
    /// bytes that were dropped.
    pub fn forget_moved(&self, source: &str, destination: &str) -> u64 {
        let (source, destination) = (normalize_path(source), normalize_path(destination));
        let moved = |p: &str| rebase_path(p, source, source).is_some() && !self.layout.is_cached(p);

        // Checked under the queue lock so a concurrent download is either seen
        // on disk or accounted after this returns.
        let mut queue = self.queue.lock();
        queue.records.retain(|r| !moved(&r.path));
        let paths: Vec<String> = queue
            .accounted
            .keys()
            .filter(|p| moved(p.as_str()))
            .cloned()
            .collect();
        let mut freed = 0;
        for p in paths {
            freed += queue.unaccount(&p);
        }

        let open: Vec<String> = queue
            .open_handles
            .keys()
            .filter(|p| moved(p.as_str()))
            .cloned()
            .collect();
        for p in open {
            let Some(count) = queue.open_handles.remove(&p) else {
                continue;
            };
            if let Some(target) = rebase_path(&p, source, destination) {
                *queue.open_handles.entry(target).or_insert(0) += count;
            }
        }
        freed
    }

    /// Fraction of the cache budget in use.
    ///
    /// With `cache_size_bytes` configured this is the accounted usage over the
    /// budget, otherwise the usage of the filesystem holding the cache.
    pub fn usage_fraction(&self) -> CacheResult<f64> {
        match self.cache_size_bytes {
            Some(budget) => Ok(self.usage_bytes() as f64 / budget as f64),
            None => Ok(filesystem_usage(self.layout.cache_root())?.used_fraction()),
        }
    }

    /// Samples usage and updates the threshold flag.
    ///
    /// The flag is set at `high_threshold` and cleared only once usage falls
    /// under `low_threshold`. Returns the new flag value.
    pub fn check_disk_space(&self) -> CacheResult<bool> {
        let fraction = self.usage_fraction()?;
        let was_reached = self.threshold_reached();
        let reached = if was_reached {
            fraction >= self.low_threshold
        } else {
            fraction >= self.high_threshold
        };
        if reached != was_reached {
            self.threshold_reached.store(reached, Ordering::Release);
            if reached {
                info!(
                    usage = fraction,
                    threshold = self.high_threshold,
                    "cache usage over threshold, evicting oldest first"
                );
            } else {
                info!(
                    usage = fraction,
                    threshold = self.low_threshold,
                    "cache usage back under threshold"
                );
            }
        }
        Ok(reached)
    }

    /// Runs one reclaim pass now.
    pub fn reclaim_once(&self) -> ReclaimReport {
        self.reclaim_once_at(Instant::now())
    }

    /// Runs one reclaim pass, judging record age against `now`.
    pub fn reclaim_once_at(&self, now: Instant) -> ReclaimReport {
        let pressure = self.refresh_threshold();
        let mut report = ReclaimReport {
            pressure,
            ..ReclaimReport::default()
        };

        // Bounded so that files re-closed during the pass cannot keep it alive.
        let mut budget = self.pending();
        while budget > 0 {
            budget -= 1;
            let under_pressure = self.threshold_reached();
            let Some(candidate) = self.next_candidate(now, under_pressure) else {
                break;
            };
            self.evict(candidate, &mut report);
            if under_pressure {
                self.refresh_threshold();
            }
        }

        self.stats.record_pass();
        if !report.evicted.is_empty() || report.failed > 0 {
            debug!(
                evicted = report.evicted.len(),
                skipped = report.skipped,
                failed = report.failed,
                pressure = report.pressure,
                "reclaim pass finished"
            );
        }
        report
    }

    fn refresh_threshold(&self) -> bool {
        match self.check_disk_space() {
            Ok(reached) => reached,
            Err(e) => {
                warn!(error = %e, "failed to sample cache usage");
                self.threshold_reached()
            }
        }
    }

    /// Picks the next record to evict without removing it.
    fn next_candidate(&self, now: Instant, under_pressure: bool) -> Option<(String, u64)> {
        let queue = self.queue.lock();
        let mut closed = queue.records.iter().filter(|r| !queue.is_open(&r.path));
        let record = if under_pressure {
            closed.next()
        } else {
            closed.find(|r| {
                r.force_evict
                    || now.saturating_duration_since(r.closed_time) >= self.file_cache_timeout
            })
        };
        record.map(|r| (r.path.clone(), r.seq))
    }

    fn evict(&self, (path, seq): (String, u64), report: &mut ReclaimReport) {
        let _guard = self.locks.lock(&path);

        {
            let mut queue = self.queue.lock();
            let index = match queue.position_of_seq(seq) {
                Some(index) if !queue.is_open(&path) => index,
                _ => {
                    drop(queue);
                    self.stats.record_skipped();
                    report.skipped += 1;
                    trace!(path, seq, "record changed or file reopened, skipping");
                    return;
                }
            };
            queue.records.remove(index);
        }

        // The path lock keeps the accounting for `path` stable until here.
        match self.layout.remove_cached(&path) {
            Ok(()) => {
                let bytes = self.queue.lock().unaccount(&path);
                self.stats.record_eviction(bytes);
                debug!(path, bytes, "evicted cached copy");
                report.evicted.push(path);
            }
            Err(e) => {
                self.stats.record_eviction_failure();
                warn!(path, error = %e, "failed to evict cached copy, dropping record");
                // The copy is still on disk, so its bytes stay accounted.
                report.failed += 1;
            }
        }
    }

    /// Starts the background reclaim thread.
    ///
    /// The thread holds only a weak reference and exits once the manager is
    /// dropped or [`shutdown`](Self::shutdown) is called.
    pub fn start(self: &Arc<Self>) -> CacheResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(CacheError::AlreadyRunning);
        }

        let (stop, stop_rx) = bounded(1);
        let manager = Arc::downgrade(self);
        let interval = self.reclaim_interval;
        let handle = thread::Builder::new()
            .name(RECLAIM_THREAD_NAME.to_string())
            .spawn(move || reclaim_loop(&manager, &stop_rx, interval))
            .map_err(CacheError::WorkerSpawn)?;

        *worker = Some(Worker { stop, handle });
        info!(interval = ?interval, "cache reclaimer started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stops the background thread and waits for it to exit.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.stop.try_send(());
        drop(worker.stop);
        // The last strong reference may be dropped on the reclaim thread itself.
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            warn!("cache reclaimer panicked");
        }
        info!("cache reclaimer stopped");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("cache_root", &self.layout.cache_root())
            .field("file_cache_timeout", &self.file_cache_timeout)
            .field("pending", &self.pending())
            .field("usage_bytes", &self.usage_bytes())
            .field("threshold_reached", &self.threshold_reached())
            .finish_non_exhaustive()
    }
}

fn reclaim_loop(manager: &Weak<CacheManager>, stop: &Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.reclaim_once();
    }
    trace!("reclaim loop exiting");
}
