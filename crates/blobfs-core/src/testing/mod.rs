//! In-memory remote clients for tests.
//!
//! - [`MemoryBlobClient`]: a flat blob container.
//! - [`MemoryDfsClient`]: a hierarchical namespace.
//!
//! Both count calls per operation name and consult a [`FaultPlan`] before
//! doing anything, so tests can make the n-th call of an operation fail with
//! a given status.
//!
//! # Usage
//!
//! ```
//! use blobfs_core::testing::{FaultPlan, MemoryBlobClient};
//! use blobfs_core::remote::BlobClient;
//! use blobfs_core::properties::Metadata;
//!
//! let client = MemoryBlobClient::new();
//! client.set_faults(FaultPlan::new().fail_nth("copy_blob", 2, 503));
//! client.insert("a", b"1", Metadata::new());
//!
//! assert!(client.copy_blob("a", "b").is_ok());
//! assert_eq!(client.copy_blob("a", "c").unwrap_err().status, 503);
//! assert_eq!(client.calls("copy_blob"), 2);
//! ```

mod blob;
mod dfs;

pub use blob::{MemoryBlobClient, StoredBlob};
pub use dfs::{DEFAULT_DIRECTORY_ACL, DEFAULT_FILE_ACL, DfsNode, MemoryDfsClient};

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::RemoteError;

#[derive(Debug, Clone)]
struct FaultRule {
    op: String,
    nth: usize,
    status: i32,
}

/// Which calls of which operations fail, and with what status.
///
/// Calls are counted from the moment the plan is installed.
#[derive(Debug, Default)]
pub struct FaultPlan {
    rules: Vec<FaultRule>,
    always: HashMap<String, i32>,
    seen: Mutex<HashMap<String, usize>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` call (1-based) of `op` with `status`.
    #[must_use]
    pub fn fail_nth(mut self, op: &str, nth: usize, status: i32) -> Self {
        self.rules.push(FaultRule {
            op: op.to_string(),
            nth,
            status,
        });
        self
    }

    /// Fail every call of `op` with `status`.
    #[must_use]
    pub fn fail_always(mut self, op: &str, status: i32) -> Self {
        self.always.insert(op.to_string(), status);
        self
    }

    fn check(&self, op: &str) -> Result<(), RemoteError> {
        let count = {
            let mut seen = self.seen.lock();
            let count = seen.entry(op.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(&status) = self.always.get(op) {
            return Err(injected(op, status));
        }
        match self.rules.iter().find(|r| r.op == op && r.nth == count) {
            Some(rule) => Err(injected(op, rule.status)),
            None => Ok(()),
        }
    }
}

fn injected(op: &str, status: i32) -> RemoteError {
    RemoteError::new(status, format!("injected failure in {op}")).with_code("InjectedFault")
}

/// Per-operation call counters plus the active fault plan.
#[derive(Debug, Default)]
pub(crate) struct CallLog {
    counts: Mutex<HashMap<String, usize>>,
    faults: Mutex<FaultPlan>,
}

impl CallLog {
    /// Counts a call of `op` and applies the fault plan.
    pub(crate) fn enter(&self, op: &str) -> Result<(), RemoteError> {
        *self.counts.lock().entry(op.to_string()).or_insert(0) += 1;
        self.faults.lock().check(op)
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.counts.lock().get(op).copied().unwrap_or(0)
    }

    pub(crate) fn reset(&self) {
        self.counts.lock().clear();
    }

    pub(crate) fn set_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_plan_counts_per_operation() {
        let plan = FaultPlan::new()
            .fail_nth("a", 2, 500)
            .fail_always("b", 403);
        assert!(plan.check("a").is_ok());
        assert_eq!(plan.check("a").unwrap_err().status, 500);
        assert!(plan.check("a").is_ok());
        assert_eq!(plan.check("b").unwrap_err().status, 403);
        assert!(plan.check("c").is_ok());
    }

    #[test]
    fn test_call_log() {
        let log = CallLog::default();
        log.enter("x").unwrap();
        log.enter("x").unwrap();
        assert_eq!(log.calls("x"), 2);
        assert_eq!(log.calls("y"), 0);
        log.reset();
        assert_eq!(log.calls("x"), 0);
    }
}
