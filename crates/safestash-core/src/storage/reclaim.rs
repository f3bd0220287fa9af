//! Space reclamation
//!
//! Frees capacity by deleting expendable data: snapshots beyond the
//! retention count (for every logical key) and stale transient keys left
//! behind by imports or migrations.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{BackupPolicy, ReclaimPolicy};

use super::{entry_size, BackupManager, RawStore, StoreFailure};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of a reclamation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimReport {
    /// True only if something was freed
    pub success: bool,
    /// Bytes freed
    pub freed_space: u64,
    #[serde(rename = "freedMB")]
    pub freed_mb: f64,
    /// Readable descriptions of what was removed
    pub actions: Vec<String>,
}

/// Deletes expendable keys to regain capacity
#[derive(Clone)]
pub struct SpaceReclaimer {
    store: Arc<dyn RawStore>,
    backups: BackupManager,
    policy: ReclaimPolicy,
}

impl SpaceReclaimer {
    pub fn new(
        store: Arc<dyn RawStore>,
        backup_policy: BackupPolicy,
        policy: ReclaimPolicy,
    ) -> Self {
        let backups = BackupManager::new(store.clone(), backup_policy);
        Self {
            store,
            backups,
            policy,
        }
    }

    /// Delete excess snapshots and stale keys
    pub fn try_free_space(&self) -> ReclaimReport {
        let mut freed_space = 0;
        let mut actions = Vec::new();

        match self.backups.excess_backups(None) {
            Ok(keys) => {
                let (removed, freed) = self.remove_keys(&keys);
                if removed > 0 {
                    freed_space += freed;
                    actions.push(format!(
                        "Removed {} old backup(s), freeing {}",
                        removed,
                        human_size(freed)
                    ));
                }
            }
            Err(e) => warn!("Could not enumerate backups for reclamation: {}", e),
        }

        match self.stale_keys() {
            Ok(keys) => {
                let (removed, freed) = self.remove_keys(&keys);
                if removed > 0 {
                    freed_space += freed;
                    actions.push(format!(
                        "Removed {} temporary key(s), freeing {}",
                        removed,
                        human_size(freed)
                    ));
                }
            }
            Err(e) => warn!("Could not enumerate stale keys for reclamation: {}", e),
        }

        if freed_space > 0 {
            info!("Reclaimed {} bytes: {}", freed_space, actions.join("; "));
        }

        ReclaimReport {
            success: freed_space > 0,
            freed_space,
            freed_mb: (freed_space as f64 / BYTES_PER_MB * 100.0).round() / 100.0,
            actions,
        }
    }

    fn stale_keys(&self) -> Result<Vec<String>, StoreFailure> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter(|key| {
                self.policy
                    .stale_prefixes
                    .iter()
                    .any(|prefix| key.starts_with(prefix.as_str()))
            })
            .collect())
    }

    /// Remove `keys`, returning how many were removed and the bytes freed
    ///
    /// Keeps going past individual failures; whatever was freed still counts.
    fn remove_keys(&self, keys: &[String]) -> (usize, u64) {
        let mut removed = 0;
        let mut freed = 0;

        for key in keys {
            let size = match self.store.get_item(key) {
                Ok(Some(value)) => entry_size(key, &value),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Could not read '{}' during reclamation: {}", key, e);
                    continue;
                }
            };
            match self.store.remove_item(key) {
                Ok(()) => {
                    removed += 1;
                    freed += size;
                }
                Err(e) => warn!("Could not remove '{}' during reclamation: {}", key, e),
            }
        }

        (removed, freed)
    }
}

fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if (bytes as f64) < BYTES_PER_MB {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / BYTES_PER_MB)
    }
}
