//! Timestamped snapshots of logical keys
//!
//! A backup copies the exact raw text stored under a logical key to
//! `<namespace>_<key>_<millis>`. Rotation keeps the newest
//! `max_backups` snapshots per key and runs on every new backup; listing
//! never prunes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BackupPolicy;

use super::{RawStore, StoreFailure};

/// A stored snapshot of one logical key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Raw store key holding the snapshot
    pub key: String,
    /// Logical key the snapshot was taken from
    pub storage_key: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// ISO-8601 rendering of `timestamp`
    pub date: String,
    /// Length of the stored snapshot
    pub size: usize,
}

/// Backup key and its parsed parts
#[derive(Debug, Clone)]
struct BackupEntry {
    key: String,
    storage_key: String,
    timestamp: i64,
}

/// Creates, rotates, restores and lists snapshots
#[derive(Clone)]
pub struct BackupManager {
    store: Arc<dyn RawStore>,
    policy: BackupPolicy,
}

impl BackupManager {
    pub fn new(store: Arc<dyn RawStore>, policy: BackupPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &BackupPolicy {
        &self.policy
    }

    /// Store key for a snapshot of `storage_key` taken at `timestamp`
    pub fn backup_key(&self, storage_key: &str, timestamp: i64) -> String {
        format!("{}_{}_{}", self.policy.namespace, storage_key, timestamp)
    }

    /// Split a backup key into its logical key and timestamp
    ///
    /// Returns `None` for keys outside the backup namespace. Logical keys
    /// may themselves contain underscores; the timestamp is always the last
    /// segment.
    pub fn parse_backup_key<'a>(&self, key: &'a str) -> Option<(&'a str, i64)> {
        let rest = key
            .strip_prefix(self.policy.namespace.as_str())?
            .strip_prefix('_')?;
        let (storage_key, timestamp) = rest.rsplit_once('_')?;

        if storage_key.is_empty()
            || timestamp.is_empty()
            || !timestamp.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        Some((storage_key, timestamp.parse().ok()?))
    }

    /// Snapshot the current value of `storage_key`
    ///
    /// Returns `false` when there is nothing to back up or the store
    /// rejected the snapshot.
    pub fn create_backup(&self, storage_key: &str) -> bool {
        match self.try_create_backup(storage_key) {
            Ok(created) => created,
            Err(e) => {
                warn!("Backup of '{}' failed: {}", storage_key, e);
                false
            }
        }
    }

    fn try_create_backup(&self, storage_key: &str) -> Result<bool, StoreFailure> {
        let Some(value) = self.store.get_item(storage_key)? else {
            debug!("Nothing to back up for '{}'", storage_key);
            return Ok(false);
        };

        // Successive backups within one millisecond must not collide
        let newest = self.entries(Some(storage_key))?.first().map(|e| e.timestamp);
        let now = Utc::now().timestamp_millis();
        let timestamp = match newest {
            Some(ts) if ts >= now => ts + 1,
            _ => now,
        };

        let key = self.backup_key(storage_key, timestamp);
        self.store.set_item(&key, &value)?;

        let mut pruned = 0;
        for excess in self.excess_backups(Some(storage_key))? {
            self.store.remove_item(&excess)?;
            pruned += 1;
        }

        debug!(
            "Backed up '{}' to '{}' ({} bytes, pruned {})",
            storage_key,
            key,
            value.len(),
            pruned
        );
        Ok(true)
    }

    /// Copy the newest snapshot of `storage_key` back into place
    ///
    /// Returns `false` when no snapshot exists or the write fails.
    pub fn restore_from_backup(&self, storage_key: &str) -> bool {
        match self.try_restore(storage_key) {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Restore of '{}' failed: {}", storage_key, e);
                false
            }
        }
    }

    fn try_restore(&self, storage_key: &str) -> Result<bool, StoreFailure> {
        for entry in self.entries(Some(storage_key))? {
            // A snapshot can vanish between listing and reading
            let Some(value) = self.store.get_item(&entry.key)? else {
                continue;
            };
            self.store.set_item(storage_key, &value)?;
            info!("Restored '{}' from '{}'", storage_key, entry.key);
            return Ok(true);
        }

        debug!("No backup available for '{}'", storage_key);
        Ok(false)
    }

    /// Snapshots, newest first, optionally for one logical key
    pub fn list_backups(&self, storage_key: Option<&str>) -> Vec<BackupRecord> {
        let entries = match self.entries(storage_key) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list backups: {}", e);
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| {
                let size = match self.store.get_item(&entry.key) {
                    Ok(Some(value)) => value.len(),
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Could not read backup '{}': {}", entry.key, e);
                        return None;
                    }
                };
                Some(BackupRecord {
                    date: format_timestamp(entry.timestamp),
                    key: entry.key,
                    storage_key: entry.storage_key,
                    timestamp: entry.timestamp,
                    size,
                })
            })
            .collect()
    }

    /// Remove every snapshot of `storage_key`, returning how many went
    pub fn delete_backups(&self, storage_key: &str) -> usize {
        let entries = match self.entries(Some(storage_key)) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list backups of '{}': {}", storage_key, e);
                return 0;
            }
        };

        let mut deleted = 0;
        for entry in entries {
            match self.store.remove_item(&entry.key) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Could not delete backup '{}': {}", entry.key, e),
            }
        }
        deleted
    }

    /// Snapshot keys beyond the retention count
    ///
    /// With `None`, rotation is applied to every logical key at once.
    pub(crate) fn excess_backups(
        &self,
        storage_key: Option<&str>,
    ) -> Result<Vec<String>, StoreFailure> {
        let mut groups: BTreeMap<String, Vec<BackupEntry>> = BTreeMap::new();
        for entry in self.entries(storage_key)? {
            groups
                .entry(entry.storage_key.clone())
                .or_default()
                .push(entry);
        }

        // Entries arrive newest first, so each group is already ordered
        Ok(groups
            .into_values()
            .flat_map(|group| group.into_iter().skip(self.policy.max_backups))
            .map(|entry| entry.key)
            .collect())
    }

    /// Backup entries sorted newest first
    fn entries(&self, storage_key: Option<&str>) -> Result<Vec<BackupEntry>, StoreFailure> {
        let mut entries: Vec<BackupEntry> = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| {
                let (owner, timestamp) = self.parse_backup_key(&key)?;
                if storage_key.is_some_and(|wanted| wanted != owner) {
                    return None;
                }
                let storage_key = owner.to_string();
                Some(BackupEntry {
                    key,
                    storage_key,
                    timestamp,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
