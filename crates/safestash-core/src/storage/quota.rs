//! Store usage monitoring
//!
//! Usage is recomputed on every call from the live store contents and
//! compared against the configured capacity. Nothing here is persisted.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::QuotaPolicy;

use super::{entry_size, RawStore, StoreFailure};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshot of store usage versus the assumed capacity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    /// Bytes in use (keys plus values)
    pub used: u64,
    /// Bytes left before the assumed capacity
    pub available: u64,
    /// `used / capacity * 100`
    pub percentage: f64,
    #[serde(rename = "usedMB")]
    pub used_mb: f64,
    #[serde(rename = "availableMB")]
    pub available_mb: f64,
    #[serde(rename = "quotaMB")]
    pub quota_mb: f64,
    pub is_almost_full: bool,
    pub is_full: bool,
}

impl QuotaInfo {
    /// Fallback reported when the store cannot be measured
    fn unavailable(quota_mb: f64) -> Self {
        Self {
            used: 0,
            available: 0,
            percentage: 0.0,
            used_mb: 0.0,
            available_mb: 0.0,
            quota_mb,
            is_almost_full: false,
            is_full: false,
        }
    }
}

/// Computes store usage on demand
#[derive(Clone)]
pub struct QuotaMonitor {
    store: Arc<dyn RawStore>,
    policy: QuotaPolicy,
}

impl QuotaMonitor {
    pub fn new(store: Arc<dyn RawStore>, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Measure current usage
    ///
    /// Never fails: if the store cannot be enumerated or read, a zeroed
    /// snapshot is returned instead.
    pub fn check_storage_quota(&self) -> QuotaInfo {
        match self.measure() {
            Ok(used) => self.snapshot(used),
            Err(e) => {
                warn!("Could not measure storage usage: {}", e);
                QuotaInfo::unavailable(self.policy.capacity_mb)
            }
        }
    }

    /// Per-key sizes, largest first
    ///
    /// Returns an empty list when the store cannot be read.
    pub fn usage_by_key(&self) -> Vec<(String, u64)> {
        let mut sizes = match self.sizes() {
            Ok(sizes) => sizes,
            Err(e) => {
                warn!("Could not list storage usage by key: {}", e);
                return Vec::new();
            }
        };
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sizes
    }

    fn measure(&self) -> Result<u64, StoreFailure> {
        Ok(self.sizes()?.iter().map(|(_, size)| size).sum())
    }

    fn sizes(&self) -> Result<Vec<(String, u64)>, StoreFailure> {
        let mut sizes = Vec::new();
        for key in self.store.keys()? {
            if let Some(value) = self.store.get_item(&key)? {
                let size = entry_size(&key, &value);
                sizes.push((key, size));
            }
        }
        Ok(sizes)
    }

    fn snapshot(&self, used: u64) -> QuotaInfo {
        let capacity = self.policy.capacity_bytes();
        let available = capacity.saturating_sub(used);
        let percentage = if capacity == 0 {
            100.0
        } else {
            used as f64 / capacity as f64 * 100.0
        };

        QuotaInfo {
            used,
            available,
            percentage,
            used_mb: round2(used as f64 / BYTES_PER_MB),
            available_mb: round2(available as f64 / BYTES_PER_MB),
            quota_mb: self.policy.capacity_mb,
            is_almost_full: percentage > self.policy.almost_full_percent,
            is_full: percentage > self.policy.full_percent,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    /// 1 KiB capacity, expressed in MB
    const ONE_KIB_MB: f64 = 1024.0 / BYTES_PER_MB;

    fn policy(capacity_mb: f64) -> QuotaPolicy {
        QuotaPolicy {
            capacity_mb,
            ..QuotaPolicy::default()
        }
    }

    fn monitor(store: &Arc<MemoryStore>, capacity_mb: f64) -> QuotaMonitor {
        QuotaMonitor::new(store.clone(), policy(capacity_mb))
    }

    #[test]
    fn test_empty_store_uses_nothing() {
        let store = Arc::new(MemoryStore::new());
        let info = monitor(&store, 5.0).check_storage_quota();

        assert_eq!(info.used, 0);
        assert_eq!(info.percentage, 0.0);
        assert_eq!(info.quota_mb, 5.0);
        assert_eq!(info.available, 5 * 1024 * 1024);
        assert!(!info.is_almost_full);
        assert!(!info.is_full);
    }

    #[test]
    fn test_usage_counts_keys_and_values() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("tasks", "[1,2,3]").unwrap();
        store.set_item("notes", "[]").unwrap();

        let info = monitor(&store, 5.0).check_storage_quota();
        assert_eq!(info.used, 5 + 7 + 5 + 2);
    }

    #[test]
    fn test_thresholds() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store, ONE_KIB_MB);

        // 4 + 796 = 800 bytes => 78.1%
        store.set_item("data", &"x".repeat(796)).unwrap();
        let info = monitor.check_storage_quota();
        assert!(!info.is_almost_full);
        assert!(!info.is_full);

        // 4 + 896 = 900 bytes => 87.9%
        store.set_item("data", &"x".repeat(896)).unwrap();
        let info = monitor.check_storage_quota();
        assert!(info.is_almost_full);
        assert!(!info.is_full);

        // 4 + 996 = 1000 bytes => 97.7%
        store.set_item("data", &"x".repeat(996)).unwrap();
        let info = monitor.check_storage_quota();
        assert!(info.is_almost_full);
        assert!(info.is_full);
        assert_eq!(info.available, 24);
    }

    #[test]
    fn test_over_capacity_reports_no_availability() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("data", &"x".repeat(2000)).unwrap();

        let info = monitor(&store, ONE_KIB_MB).check_storage_quota();
        assert_eq!(info.available, 0);
        assert!(info.percentage > 100.0);
        assert!(info.is_full);
    }

    #[test]
    fn test_enumeration_failure_returns_zeroed_fallback() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("tasks", &"x".repeat(500)).unwrap();
        store.fail_enumeration(Some(StoreFailure::security("storage disabled")));

        let info = monitor(&store, 5.0).check_storage_quota();
        assert_eq!(info.used, 0);
        assert_eq!(info.percentage, 0.0);
        assert!(!info.is_almost_full);
        assert!(!info.is_full);
    }

    #[test]
    fn test_usage_by_key_sorted_largest_first() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("small", "1").unwrap();
        store.set_item("large", &"x".repeat(100)).unwrap();
        store.set_item("medium", &"x".repeat(10)).unwrap();

        let usage = monitor(&store, 5.0).usage_by_key();
        let keys: Vec<&str> = usage.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["large", "medium", "small"]);
        assert_eq!(usage[0].1, 105);
    }

    #[test]
    fn test_mb_fields_rounded() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("blob", &"x".repeat(1024 * 1024)).unwrap();

        let info = monitor(&store, 5.0).check_storage_quota();
        assert_eq!(info.used_mb, 1.0);
        assert_eq!(info.available_mb, 4.0);
    }
}
