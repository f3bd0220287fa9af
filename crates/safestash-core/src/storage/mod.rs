//! Storage layer
//!
//! Everything that touches the raw key-value store lives here.
//!
//! ## Architecture
//!
//! - **RawStore**: the injected store capability; one slot per key, string
//!   values, synchronous calls
//! - **Reliability components**: classification, quota, backups,
//!   reclamation and the safe operation runner, all built on `RawStore`
//!
//! No component reaches a global store; each one is handed an
//! `Arc<dyn RawStore>` so tests can swap in a `MemoryStore` with injected
//! faults.

pub mod backup;
pub mod error;
pub mod file;
pub mod memory;
pub mod quota;
pub mod reclaim;
pub mod safe;

use std::collections::BTreeMap;

pub use backup::{BackupManager, BackupRecord};
pub use error::{
    detect_error_type, error_message, ErrorCallback, ErrorKind, ErrorMessage, Severity,
    StorageError, StoreFailure,
};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use quota::{QuotaInfo, QuotaMonitor};
pub use reclaim::{ReclaimReport, SpaceReclaimer};
pub use safe::{OperationOutcome, SafeOperationRunner, SafeOptions};

/// A bounded, synchronous key-value store
///
/// Mirrors the browser storage surface: string keys, string values, and
/// every call may fail with a host-specific [`StoreFailure`]. Implementations
/// serialize calls internally, so all methods take `&self`.
pub trait RawStore: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreFailure>;

    /// Store `value` under `key`, replacing any previous value
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreFailure>;

    /// Remove `key`; removing a missing key is not an error
    fn remove_item(&self, key: &str) -> Result<(), StoreFailure>;

    /// List every key currently in the store
    fn keys(&self) -> Result<Vec<String>, StoreFailure>;
}

/// Bytes one entry occupies in the store
///
/// Shared by capacity enforcement and the quota monitor so both agree on
/// what "used" means.
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Total bytes used by a set of entries
pub(crate) fn total_size(entries: &BTreeMap<String, String>) -> u64 {
    entries.iter().map(|(k, v)| entry_size(k, v)).sum()
}

/// Reject a write that would push the entries past `capacity`
pub(crate) fn check_capacity(
    entries: &BTreeMap<String, String>,
    capacity: Option<u64>,
    key: &str,
    value: &str,
) -> Result<(), StoreFailure> {
    let Some(capacity) = capacity else {
        return Ok(());
    };

    let replaced = entries.get(key).map(|old| entry_size(key, old)).unwrap_or(0);
    let projected = total_size(entries) - replaced + entry_size(key, value);

    if projected > capacity {
        return Err(StoreFailure::quota_exceeded(format!(
            "Setting the value of '{}' exceeded the quota ({} of {} bytes)",
            key, projected, capacity
        )));
    }

    Ok(())
}
