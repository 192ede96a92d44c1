//! Per-path mutual exclusion for cache and remote mutations.
//!
//! Every logical path has at most one lock handle per [`LockSpace`]. Handles
//! are created lazily on first lookup and shared through `Arc`, so every
//! thread that locks `a/b` blocks on the same mutex.
//!
//! # Lock spaces
//!
//! - **Primary**: serializes anything that mutates a path's cached copy or its
//!   remote state (open/populate, close, eviction, rename, unlink).
//! - **Delay**: serializes deferred work on a path (upload on close) without
//!   blocking primary operations on the same path.
//!
//! # Ordering
//!
//! 1. A thread holds at most one primary lock, except for rename, which takes
//!    source and destination through [`PathLockRegistry::lock_pair`].
//! 2. `lock_pair` locks in lexicographic path order.
//! 3. A primary lock may be held while taking the cache manager's queue lock,
//!    never the other way round.
//!
//! The registry is owned by the top-level service and handed to the cache
//! manager and the backends by `Arc`; there is no process-wide instance.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::layout::normalize_path;

/// Shared exclusion handle for one path in one lock space.
pub type PathLock = Arc<Mutex<()>>;

/// Owned guard for a [`PathLock`]; the lock is released on drop.
pub type PathLockGuard = ArcMutexGuard<RawMutex, ()>;

/// Independent key spaces of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockSpace {
    Primary,
    Delay,
}

/// Table of per-path locks.
///
/// # Example
///
/// ```
/// use blobfs_core::locks::{LockSpace, PathLockRegistry};
/// use std::sync::Arc;
///
/// let registry = PathLockRegistry::new();
///
/// let a = registry.acquire("/dir/file.txt", LockSpace::Primary);
/// let b = registry.acquire("dir/file.txt", LockSpace::Primary);
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // The delay space is independent.
/// let c = registry.acquire("dir/file.txt", LockSpace::Delay);
/// assert!(!Arc::ptr_eq(&a, &c));
/// ```
#[derive(Debug, Default)]
pub struct PathLockRegistry {
    primary: DashMap<String, PathLock>,
    delay: DashMap<String, PathLock>,
}

impl PathLockRegistry {
    pub fn new() -> Self {
        Self {
            primary: DashMap::new(),
            delay: DashMap::new(),
        }
    }

    fn table(&self, space: LockSpace) -> &DashMap<String, PathLock> {
        match space {
            LockSpace::Primary => &self.primary,
            LockSpace::Delay => &self.delay,
        }
    }

    /// Get or create the lock handle for `path` in `space`.
    ///
    /// Concurrent first lookups converge on one handle: the shard lock taken
    /// by `entry` makes the first insert win and later lookups clone it.
    pub fn acquire(&self, path: &str, space: LockSpace) -> PathLock {
        let key = normalize_path(path);
        let table = self.table(space);
        if let Some(existing) = table.get(key) {
            return Arc::clone(existing.value());
        }
        table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Block until the primary lock for `path` is held.
    pub fn lock(&self, path: &str) -> PathLockGuard {
        self.acquire(path, LockSpace::Primary).lock_arc()
    }

    /// Block until the delay lock for `path` is held.
    pub fn lock_delay(&self, path: &str) -> PathLockGuard {
        self.acquire(path, LockSpace::Delay).lock_arc()
    }

    /// Take the primary lock for `path` only if nobody holds it.
    pub fn try_lock(&self, path: &str) -> Option<PathLockGuard> {
        self.acquire(path, LockSpace::Primary).try_lock_arc()
    }

    /// Lock the primary locks of two paths in lexicographic order.
    ///
    /// When both names refer to the same path only one guard is taken and the
    /// second element is `None`.
    pub fn lock_pair(&self, a: &str, b: &str) -> (PathLockGuard, Option<PathLockGuard>) {
        let (a, b) = (normalize_path(a), normalize_path(b));
        if a == b {
            return (self.lock(a), None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.lock(first);
        let second_guard = self.lock(second);
        (first_guard, Some(second_guard))
    }

    /// Whether the primary lock for `path` is currently held by someone.
    pub fn is_locked(&self, path: &str) -> bool {
        self.table(LockSpace::Primary)
            .get(normalize_path(path))
            .is_some_and(|lock| lock.is_locked())
    }

    /// Number of handles created in `space`.
    pub fn len(&self, space: LockSpace) -> usize {
        self.table(space).len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.delay.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_creation_is_lazy_and_reused() {
        let registry = PathLockRegistry::new();
        assert_eq!(registry.len(LockSpace::Primary), 0);

        let first = registry.acquire("a/b", LockSpace::Primary);
        assert_eq!(registry.len(LockSpace::Primary), 1);

        let second = registry.acquire("a/b", LockSpace::Primary);
        assert_eq!(registry.len(LockSpace::Primary), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_spaces_are_independent() {
        let registry = PathLockRegistry::new();
        let primary = registry.acquire("a", LockSpace::Primary);
        let delay = registry.acquire("a", LockSpace::Delay);

        assert!(!Arc::ptr_eq(&primary, &delay));
        assert_eq!(registry.len(LockSpace::Primary), 1);
        assert_eq!(registry.len(LockSpace::Delay), 1);

        // Holding the primary lock does not block the delay lock.
        let _primary_guard = registry.lock("a");
        let delay_guard = registry.acquire("a", LockSpace::Delay).try_lock_arc();
        assert!(delay_guard.is_some());
    }

    #[test]
    fn test_leading_slash_maps_to_same_handle() {
        let registry = PathLockRegistry::new();
        let a = registry.acquire("/dir/f", LockSpace::Primary);
        let b = registry.acquire("dir/f", LockSpace::Primary);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_concurrent_first_lookups_converge() {
        let registry = Arc::new(PathLockRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire("contended/path", LockSpace::Primary)
                })
            })
            .collect();

        let locks: Vec<PathLock> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for lock in &locks[1..] {
            assert!(Arc::ptr_eq(&locks[0], lock));
        }
        assert_eq!(registry.len(LockSpace::Primary), 1);
    }

    #[test]
    fn test_lock_blocks_second_holder() {
        let registry = Arc::new(PathLockRegistry::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let guard = registry.lock("file");

        let waiter = {
            let registry = Arc::clone(&registry);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = registry.lock("file");
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(
            !acquired.load(Ordering::SeqCst),
            "second holder must wait while the lock is held"
        );
        assert!(registry.is_locked("file"));

        drop(guard);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!registry.is_locked("file"));
    }

    #[test]
    fn test_try_lock() {
        let registry = PathLockRegistry::new();
        let guard = registry.try_lock("x");
        assert!(guard.is_some());
        assert!(registry.try_lock("x").is_none());
        drop(guard);
        assert!(registry.try_lock("x").is_some());
    }

    #[test]
    fn test_lock_pair_same_path() {
        let registry = PathLockRegistry::new();
        let (_first, second) = registry.lock_pair("a", "/a");
        assert!(second.is_none());
    }

    #[test]
    fn test_lock_pair_opposite_orders_do_not_deadlock() {
        let registry = Arc::new(PathLockRegistry::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let (_a, _b) = if i % 2 == 0 {
                        registry.lock_pair("left", "right")
                    } else {
                        registry.lock_pair("right", "left")
                    };
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
