//! Per-collection CRUD API
//!
//! A `StorageApi` owns one logical key holding a JSON array of
//! [`EntityRecord`]s. Every mutation snapshots the key first, and a write
//! rejected for quota triggers reclamation plus exactly one retry.
//! Reads recover from corrupted values by restoring the newest snapshot.
//!
//! No operation here panics or returns `Err`: failures resolve to `None`,
//! `false` or a result record, and the error callback (if any) receives
//! the classified [`StorageError`].

use std::ops::Deref;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{generate_id, merge_defaults, EntityRecord};
use crate::storage::{
    detect_error_type, BackupManager, ErrorCallback, ErrorKind, QuotaMonitor, RawStore,
    SpaceReclaimer, StorageError, StoreFailure,
};

/// Message returned by `add_many` for a missing or empty list
pub const INVALID_INPUT: &str = "Invalid input";

/// Result of [`StorageApi::add_many`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddManyResult {
    pub success: bool,
    pub items: Vec<EntityRecord>,
    pub error: Option<String>,
}

impl AddManyResult {
    fn failed(error: &str) -> Self {
        Self {
            success: false,
            items: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Result of [`migrate_storage`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub success: bool,
    pub migrated_count: usize,
    pub error: Option<String>,
}

/// CRUD over one logical key
#[derive(Clone)]
pub struct StorageApi {
    storage_key: String,
    defaults: Map<String, Value>,
    store: Arc<dyn RawStore>,
    backups: BackupManager,
    quota: QuotaMonitor,
    reclaimer: SpaceReclaimer,
    error_callback: Option<ErrorCallback>,
}

impl StorageApi {
    pub fn new(
        store: Arc<dyn RawStore>,
        config: &Config,
        storage_key: impl Into<String>,
        defaults: Map<String, Value>,
        error_callback: Option<ErrorCallback>,
    ) -> Self {
        Self {
            storage_key: storage_key.into(),
            defaults,
            backups: BackupManager::new(store.clone(), config.backup.clone()),
            quota: QuotaMonitor::new(store.clone(), config.quota.clone()),
            reclaimer: SpaceReclaimer::new(
                store.clone(),
                config.backup.clone(),
                config.reclaim.clone(),
            ),
            store,
            error_callback,
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// All records, or an empty list if none are readable
    ///
    /// A value that is not a JSON array is restored from the newest
    /// snapshot once before giving up. Elements of a well-formed array that
    /// do not decode as records are skipped but left in the store.
    pub fn get(&self) -> Vec<EntityRecord> {
        match self.load() {
            Ok(entries) => records(entries),
            Err(error) => {
                self.notify(error);
                Vec::new()
            }
        }
    }

    /// Record with the given id
    pub fn get_by_id(&self, id: &str) -> Option<EntityRecord> {
        self.get().into_iter().find(|record| record.id == id)
    }

    /// Replace the whole collection
    ///
    /// On a quota failure, reclaims space and retries the write once.
    pub fn save(&self, items: &[EntityRecord], create_backup_first: bool) -> bool {
        let entries: Vec<Entry> = items.iter().cloned().map(Entry::Record).collect();
        self.settle(self.commit(&entries, create_backup_first)).is_some()
    }

    /// Append a new record built from the defaults and `item_data`
    ///
    /// Nothing is written if the current value cannot be read.
    pub fn add(&self, item_data: Map<String, Value>) -> Option<EntityRecord> {
        let record = EntityRecord::stamped(
            generate_id(),
            Utc::now(),
            merge_defaults(&self.defaults, item_data),
        );

        self.settle(self.mutate(|entries| {
            entries.push(Entry::Record(record.clone()));
            Some(record)
        }))
        .flatten()
    }

    /// Append several records in one write
    ///
    /// `items_data` must be a non-empty JSON array of objects; anything else
    /// is rejected with [`INVALID_INPUT`] and nothing is written.
    pub fn add_many(&self, items_data: Value) -> AddManyResult {
        let list = match items_data {
            Value::Array(list) if !list.is_empty() => list,
            _ => return AddManyResult::failed(INVALID_INPUT),
        };

        let now = Utc::now();
        let mut created = Vec::with_capacity(list.len());
        for entry in list {
            let Value::Object(fields) = entry else {
                return AddManyResult::failed(INVALID_INPUT);
            };
            created.push(EntityRecord::stamped(
                generate_id(),
                now,
                merge_defaults(&self.defaults, fields),
            ));
        }

        let saved = self.mutate(|entries| {
            entries.extend(created.iter().cloned().map(Entry::Record));
            Some(())
        });

        match self.settle(saved) {
            Some(Some(())) => AddManyResult {
                success: true,
                items: created,
                error: None,
            },
            _ => AddManyResult::failed("Failed to save items"),
        }
    }

    /// Merge `updates` into the record with `id`
    ///
    /// Returns `None` without touching the store if no such record exists.
    pub fn update(&self, id: &str, updates: Map<String, Value>) -> Option<EntityRecord> {
        self.settle(self.mutate(|entries| {
            let Some(record) = entries.iter_mut().find_map(|entry| match entry {
                Entry::Record(record) if record.id == id => Some(record),
                _ => None,
            }) else {
                debug!("No record '{}' in '{}' to update", id, self.storage_key);
                return None;
            };

            record.apply(updates, Utc::now());
            Some(record.clone())
        }))
        .flatten()
    }

    /// Delete the record with `id`
    ///
    /// Returns `false` without touching the store if no such record exists.
    pub fn remove(&self, id: &str) -> bool {
        self.remove_where(|record| record.id == id) > 0
    }

    /// Delete every record matching `pred`, in one write
    ///
    /// Returns how many were removed; zero if none matched or the write failed.
    fn remove_where(&self, pred: impl Fn(&EntityRecord) -> bool) -> usize {
        let removed = self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|entry| !matches!(entry, Entry::Record(record) if pred(record)));
            let removed = before - entries.len();
            if removed == 0 {
                debug!("Nothing to remove from '{}'", self.storage_key);
                return None;
            }
            Some(removed)
        });

        self.settle(removed).flatten().unwrap_or(0)
    }

    /// Read, edit in place and write back with a backup first
    ///
    /// `edit` returning `None` means there is nothing to write. A failed
    /// read stops before any write.
    fn mutate<T>(
        &self,
        edit: impl FnOnce(&mut Vec<Entry>) -> Option<T>,
    ) -> Result<Option<T>, StorageError> {
        let mut entries = self.load()?;
        let Some(value) = edit(&mut entries) else {
            return Ok(None);
        };
        self.commit(&entries, true)?;
        Ok(Some(value))
    }

    /// Report a failed operation through the callback, exactly once
    fn settle<T>(&self, result: Result<T, StorageError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.notify(error);
                None
            }
        }
    }

    /// Current entries, restoring from backup if the value is corrupted
    fn load(&self) -> Result<Vec<Entry>, StorageError> {
        let failure = match self.read() {
            Ok(entries) => return Ok(entries),
            Err(failure) => failure,
        };

        if detect_error_type(Some(&failure)) != ErrorKind::ParseError {
            return Err(StorageError::from_failure(failure));
        }

        warn!(
            "Stored value of '{}' is unreadable ({}), restoring from backup",
            self.storage_key, failure
        );
        if !self.backups.restore_from_backup(&self.storage_key) {
            return Err(StorageError::from_failure(failure));
        }

        let entries = self.read().map_err(StorageError::from_failure)?;
        info!("Recovered '{}' from backup", self.storage_key);
        Ok(entries)
    }

    fn read(&self) -> Result<Vec<Entry>, StoreFailure> {
        let Some(raw) = self.store.get_item(&self.storage_key)? else {
            return Ok(Vec::new());
        };

        let items = match serde_json::from_str::<Value>(&raw)? {
            Value::Array(items) => items,
            other => {
                return Err(StoreFailure::syntax(format!(
                    "JSON parse error: expected an array, found {}",
                    json_type(&other)
                )))
            }
        };

        Ok(items
            .into_iter()
            .map(|item| match EntityRecord::deserialize(&item) {
                Ok(record) => Entry::Record(record),
                Err(e) => {
                    warn!(
                        "Skipping an item of '{}' that is not a record: {}",
                        self.storage_key, e
                    );
                    Entry::Foreign(item)
                }
            })
            .collect())
    }

    fn commit(&self, entries: &[Entry], create_backup_first: bool) -> Result<(), StorageError> {
        if create_backup_first {
            self.backups.create_backup(&self.storage_key);
        }

        let encoded = serde_json::to_string(entries).map_err(|e| {
            StorageError::new(
                ErrorKind::DataClone,
                Some(StoreFailure::data_clone(e.to_string())),
            )
        })?;

        self.write_with_reclaim(&encoded)
    }

    fn write_with_reclaim(&self, encoded: &str) -> Result<(), StorageError> {
        let failure = match self.store.set_item(&self.storage_key, encoded) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        let kind = detect_error_type(Some(&failure));
        if kind != ErrorKind::QuotaExceeded {
            return Err(StorageError::new(kind, Some(failure)));
        }

        let report = self.reclaimer.try_free_space();
        debug!(
            "Write to '{}' hit the quota; reclaimed {} bytes, retrying",
            self.storage_key, report.freed_space
        );

        match self.store.set_item(&self.storage_key, encoded) {
            Ok(()) => {
                info!("Write to '{}' succeeded after reclamation", self.storage_key);
                Ok(())
            }
            Err(retry_failure) => {
                let error = StorageError::from_failure(retry_failure);
                Err(match error.kind {
                    ErrorKind::QuotaExceeded => error.with_quota(self.quota.check_storage_quota()),
                    _ => error,
                })
            }
        }
    }

    fn notify(&self, error: StorageError) {
        warn!("Storage error on '{}': {}", self.storage_key, error);
        if let Some(ref callback) = self.error_callback {
            callback(&error);
        }
    }
}

/// One element of a stored array
///
/// Elements that are valid JSON but not records are carried through
/// rewrites untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Entry {
    Record(EntityRecord),
    Foreign(Value),
}

fn records(entries: Vec<Entry>) -> Vec<EntityRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::Record(record) => Some(record),
            Entry::Foreign(_) => None,
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// CRUD API with foreign-key helpers
///
/// Derefs to [`StorageApi`] for the basic operations.
#[derive(Clone)]
pub struct MultiKeyStorageApi {
    api: StorageApi,
}

impl MultiKeyStorageApi {
    pub fn new(api: StorageApi) -> Self {
        Self { api }
    }

    /// Records whose `field` equals `value`
    pub fn get_by_foreign_key(&self, field: &str, value: &Value) -> Vec<EntityRecord> {
        self.api
            .get()
            .into_iter()
            .filter(|record| record.field(field) == Some(value))
            .collect()
    }

    /// Delete records whose `field` equals `value`
    ///
    /// Returns how many were removed; zero if none matched or the save failed.
    pub fn remove_by_foreign_key(&self, field: &str, value: &Value) -> usize {
        self.api
            .remove_where(|record| record.field(field) == Some(value))
    }
}

impl Deref for MultiKeyStorageApi {
    type Target = StorageApi;

    fn deref(&self) -> &StorageApi {
        &self.api
    }
}

/// Rewrite every item stored under `storage_key`
///
/// Items are handed to `migration` as raw JSON, so records that predate
/// the current shape (missing ids, renamed fields) can be migrated too.
/// The key is backed up first.
pub fn migrate_storage<F>(
    store: Arc<dyn RawStore>,
    config: &Config,
    storage_key: &str,
    migration: F,
    error_callback: Option<ErrorCallback>,
) -> MigrationResult
where
    F: FnMut(Value) -> Value,
{
    let backups = BackupManager::new(store.clone(), config.backup.clone());
    backups.create_backup(storage_key);

    let fail = |failure: StoreFailure| {
        let error = StorageError::from_failure(failure);
        warn!("Migration of '{}' failed: {}", storage_key, error);
        let message = error
            .original_error
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| error.message.clone());
        if let Some(ref callback) = error_callback {
            callback(&error);
        }
        MigrationResult {
            success: false,
            migrated_count: 0,
            error: Some(message),
        }
    };

    let raw = match store.get_item(storage_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("Nothing to migrate in '{}'", storage_key);
            return MigrationResult {
                success: true,
                migrated_count: 0,
                error: None,
            };
        }
        Err(failure) => return fail(failure),
    };

    let items: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => return fail(e.into()),
    };

    let migrated: Vec<Value> = items.into_iter().map(migration).collect();
    let encoded = match serde_json::to_string(&migrated) {
        Ok(encoded) => encoded,
        Err(e) => return fail(e.into()),
    };

    if let Err(failure) = store.set_item(storage_key, &encoded) {
        return fail(failure);
    }

    info!("Migrated {} item(s) in '{}'", migrated.len(), storage_key);
    MigrationResult {
        success: true,
        migrated_count: migrated.len(),
        error: None,
    }
}
