//! Eviction policy tests for the cache manager.
//!
//! Passes are driven with `reclaim_once_at` so record age is deterministic.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::manager;

const TIMEOUT: Duration = Duration::from_secs(120);

#[test]
fn test_cancel_before_reclaim_leaves_file_untouched() {
    common::init_tracing();
    let fx = manager(common::LARGE_BUDGET);
    let gc = &fx.manager;
    fx.cache_file("docs/report.txt", 16);

    let t0 = Instant::now();
    gc.record_closed_at("docs/report.txt", 16, true, t0);
    assert!(gc.cancel_pending_eviction("docs/report.txt"));

    let report = gc.reclaim_once_at(t0 + TIMEOUT * 10);
    assert!(report.evicted.is_empty());
    assert!(gc.layout().is_cached("docs/report.txt"));
    assert_eq!(gc.usage_bytes(), 16);
}

#[test]
fn test_age_eviction_respects_timeout() {
    let fx = manager(common::LARGE_BUDGET);
    let gc = &fx.manager;
    fx.cache_file("a", 1);
    fx.cache_file("b", 1);

    let t0 = Instant::now();
    gc.record_closed_at("a", 1, false, t0);
    gc.record_closed_at("b", 1, false, t0 + Duration::from_secs(5));

    let report = gc.reclaim_once_at(t0 + TIMEOUT - Duration::from_millis(1));
    assert!(!report.pressure);
    assert!(report.evicted.is_empty());
    assert_eq!(gc.pending(), 2);

    let report = gc.reclaim_once_at(t0 + TIMEOUT);
    assert_eq!(report.evicted, vec!["a".to_string()]);
    assert!(gc.layout().is_cached("b"));

    let report = gc.reclaim_once_at(t0 + TIMEOUT + Duration::from_secs(5));
    assert_eq!(report.evicted, vec!["b".to_string()]);
    assert_eq!(gc.pending(), 0);
    assert_eq!(gc.usage_bytes(), 0);
}

#[test]
fn test_pressure_evicts_oldest_first_regardless_of_age() {
    let fx = manager(100);
    let gc = &fx.manager;
    for (path, size) in [("a", 10), ("b", 10), ("c", 75)] {
        fx.cache_file(path, size);
    }

    let t0 = Instant::now();
    // Queue order follows close time, not call order.
    gc.record_closed_at("c", 75, false, t0 + Duration::from_secs(2));
    gc.record_closed_at("a", 10, false, t0);
    gc.record_closed_at("b", 10, false, t0 + Duration::from_secs(1));
    assert_eq!(gc.usage_bytes(), 95);

    // Every record is far younger than the timeout.
    let report = gc.reclaim_once_at(t0 + Duration::from_secs(3));
    assert!(report.pressure);
    // 95 -> 85 stays above the low threshold, 85 -> 75 drops under it.
    assert_eq!(report.evicted, vec!["a".to_string(), "b".to_string()]);
    assert!(!gc.threshold_reached());
    assert!(gc.layout().is_cached("c"));
    assert_eq!(gc.usage_bytes(), 75);

    let stats = gc.stats();
    assert_eq!(stats.evictions, 2);
    assert_eq!(stats.bytes_evicted, 20);
}

#[test]
fn test_threshold_flag_hysteresis() {
    let fx = manager(100);
    let gc = &fx.manager;

    gc.add_cache_bytes("a", 89);
    assert!(!gc.check_disk_space().unwrap());
    gc.add_cache_bytes("b", 1);
    assert!(gc.check_disk_space().unwrap());
    assert!(gc.threshold_reached());

    gc.add_cache_bytes("b", 0);
    gc.add_cache_bytes("a", 80);
    assert!(gc.check_disk_space().unwrap(), "0.80 is not under the low threshold");
    gc.add_cache_bytes("a", 79);
    assert!(!gc.check_disk_space().unwrap());
}

#[test]
fn test_eviction_failure_drops_record() {
    let fx = manager(common::LARGE_BUDGET);
    let gc = &fx.manager;
    // A directory where the cached file should be cannot be unlinked.
    fs::create_dir_all(gc.layout().local_path("weird/entry")).unwrap();

    gc.record_closed("weird/entry", 10, true);
    let report = gc.reclaim_once();
    assert_eq!(report.failed, 1);
    assert!(report.evicted.is_empty());
    assert_eq!(gc.pending(), 0);
    assert_eq!(gc.stats().eviction_failures, 1);
    // Nothing was removed, so nothing is subtracted.
    assert_eq!(gc.usage_bytes(), 10);
    assert_eq!(gc.stats().bytes_evicted, 0);

    // Never retried.
    let report = gc.reclaim_once();
    assert_eq!(report.failed, 0);
}

#[test]
fn test_reopen_while_reclaimer_waits_for_path_lock() {
    let fx = manager(common::LARGE_BUDGET);
    let gc = Arc::new(fx.manager);
    let locks = Arc::clone(&fx.locks);
    let layout = gc.layout().clone();

    let local = layout.local_path("busy");
    layout.ensure_parent_dirs(&local).unwrap();
    fs::write(&local, b"data").unwrap();
    gc.record_closed("busy", 4, true);

    // An open holds the path lock while the reclaimer picks the record.
    let guard = locks.lock("busy");
    let reclaimer = {
        let gc = Arc::clone(&gc);
        thread::spawn(move || gc.reclaim_once())
    };
    thread::sleep(Duration::from_millis(50));
    gc.cancel_pending_eviction("busy");
    drop(guard);

    let report = reclaimer.join().unwrap();
    assert!(report.evicted.is_empty());
    assert!(report.skipped <= 1);
    assert_eq!(fs::read(&local).unwrap(), b"data");
}

#[test]
fn test_recorded_again_replaces_record() {
    let fx = manager(common::LARGE_BUDGET);
    let gc = &fx.manager;
    fx.cache_file("f", 8);

    let t0 = Instant::now();
    gc.record_closed_at("f", 4, false, t0);
    gc.record_closed_at("f", 8, false, t0 + TIMEOUT);
    assert_eq!(gc.pending(), 1);
    assert_eq!(gc.usage_bytes(), 8);

    // The first close time no longer counts.
    let report = gc.reclaim_once_at(t0 + TIMEOUT + Duration::from_secs(1));
    assert!(report.evicted.is_empty());
}

#[test]
fn test_open_handle_blocks_eviction() {
    let fx = manager(100);
    let gc = &fx.manager;
    fx.cache_file("open", 50);
    fx.cache_file("closed", 45);

    let t0 = Instant::now();
    gc.open_handle("open");
    // An unlink of an open file queues a forced record anyway.
    gc.record_closed_at("open", 50, true, t0);
    gc.record_closed_at("closed", 45, false, t0 + Duration::from_secs(1));

    // Under pressure the open file is passed over for a younger one.
    let report = gc.reclaim_once_at(t0 + TIMEOUT * 2);
    assert_eq!(report.evicted, vec!["closed".to_string()]);
    assert!(gc.layout().is_cached("open"));
    assert!(gc.is_queued("open"));

    assert!(gc.release_handle("open"));
    let report = gc.reclaim_once_at(t0 + TIMEOUT * 2);
    assert_eq!(report.evicted, vec!["open".to_string()]);
    assert_eq!(gc.usage_bytes(), 0);
}
