//! Unified storage interface
//!
//! The `Storage` facade owns the injected raw store and the configuration,
//! and hands out the components built on top of it:
//! - backup manager, quota monitor and space reclaimer
//! - the safe operation runner
//! - per-collection CRUD APIs
//!
//! ## Usage
//!
//! ```ignore
//! let storage = Storage::open()?;  // File store under the data directory
//!
//! let tasks = storage.create_storage_api("tasks", Map::new(), None);
//! let all = tasks.get();
//!
//! let quota = storage.quota().check_storage_quota();
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::crud::{migrate_storage, MigrationResult, MultiKeyStorageApi, StorageApi};
use crate::storage::{
    BackupManager, ErrorCallback, FileStore, QuotaMonitor, RawStore, SafeOperationRunner,
    SpaceReclaimer,
};

/// Entry point tying a raw store to its configuration
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn RawStore>,
    config: Config,
}

impl Storage {
    /// Open the file store described by the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the file store at `config.store_path()`
    ///
    /// The store's capacity is the configured quota, so a full store fails
    /// writes the same way a browser host would.
    pub fn open_with_config(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        config
            .ensure_data_dir()
            .context("Failed to create data directory")?;

        let path = config.store_path();
        let store = FileStore::open(&path, Some(config.quota.capacity_bytes()))
            .with_context(|| format!("Failed to open store at {:?}", path))?;
        debug!("Storage ready at {:?}", path);

        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Wrap an already constructed store
    pub fn with_store(store: Arc<dyn RawStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying raw store
    pub fn raw(&self) -> Arc<dyn RawStore> {
        self.store.clone()
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.store.clone(), self.config.backup.clone())
    }

    pub fn quota(&self) -> QuotaMonitor {
        QuotaMonitor::new(self.store.clone(), self.config.quota.clone())
    }

    pub fn reclaimer(&self) -> SpaceReclaimer {
        SpaceReclaimer::new(
            self.store.clone(),
            self.config.backup.clone(),
            self.config.reclaim.clone(),
        )
    }

    pub fn runner(&self) -> SafeOperationRunner {
        SafeOperationRunner::new(self.store.clone(), &self.config)
    }

    /// CRUD API over `storage_key`
    pub fn create_storage_api(
        &self,
        storage_key: &str,
        defaults: Map<String, Value>,
        error_callback: Option<ErrorCallback>,
    ) -> StorageApi {
        StorageApi::new(
            self.store.clone(),
            &self.config,
            storage_key,
            defaults,
            error_callback,
        )
    }

    /// CRUD API with foreign-key helpers over `storage_key`
    pub fn create_multi_key_storage_api(
        &self,
        storage_key: &str,
        defaults: Map<String, Value>,
        error_callback: Option<ErrorCallback>,
    ) -> MultiKeyStorageApi {
        MultiKeyStorageApi::new(self.create_storage_api(storage_key, defaults, error_callback))
    }

    /// Rewrite every item under `storage_key` with `migration`
    pub fn migrate_storage<F>(
        &self,
        storage_key: &str,
        migration: F,
        error_callback: Option<ErrorCallback>,
    ) -> MigrationResult
    where
        F: FnMut(Value) -> Value,
    {
        migrate_storage(
            self.store.clone(),
            &self.config,
            storage_key,
            migration,
            error_callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaPolicy;
    use crate::storage::{MemoryStore, SafeOptions, StoreFailure};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_open_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let storage = Storage::open_with_config(config.clone()).unwrap();
        assert!(config.data_dir.exists());
        assert_eq!(storage.config(), &config);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.backup.max_backups = 0;

        assert!(Storage::open_with_config(config).is_err());
    }

    #[test]
    fn test_records_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let id = {
            let storage = Storage::open_with_config(config.clone()).unwrap();
            let tasks = storage.create_storage_api("tasks", Map::new(), None);
            tasks.add(fields(json!({"name": "persisted"}))).unwrap().id
        };

        let storage = Storage::open_with_config(config).unwrap();
        let tasks = storage.create_storage_api("tasks", Map::new(), None);
        let record = tasks.get_by_id(&id).unwrap();
        assert_eq!(record.field("name"), Some(&json!("persisted")));
    }

    #[test]
    fn test_components_share_one_store() {
        let store = Arc::new(MemoryStore::new());
        let storage = Storage::with_store(store.clone(), Config::default());

        let tasks = storage.create_storage_api("tasks", Map::new(), None);
        tasks.add(fields(json!({"name": "a"}))).unwrap();
        tasks.add(fields(json!({"name": "b"}))).unwrap();

        assert_eq!(storage.backups().list_backups(Some("tasks")).len(), 1);
        assert!(storage.quota().check_storage_quota().used > 0);
        assert!(storage.raw().get_item("tasks").unwrap().is_some());
    }

    #[test]
    fn test_multi_key_and_migration_through_facade() {
        let store = Arc::new(MemoryStore::new());
        let storage = Storage::with_store(store, Config::default());

        let comments = storage.create_multi_key_storage_api("comments", Map::new(), None);
        comments.add(fields(json!({"taskId": "t1"}))).unwrap();

        let result = storage.migrate_storage(
            "comments",
            |mut item| {
                item["migrated"] = json!(true);
                item
            },
            None,
        );
        assert!(result.success);
        assert_eq!(result.migrated_count, 1);

        let found = comments.get_by_foreign_key("taskId", &json!("t1"));
        assert_eq!(found[0].field("migrated"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_file_store_quota_recovery_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.quota = QuotaPolicy {
            capacity_mb: 2048.0 / (1024.0 * 1024.0),
            ..QuotaPolicy::default()
        };
        let storage = Storage::open_with_config(config).unwrap();
        let raw = storage.raw();

        raw.set_item("temp_import", &"x".repeat(1700)).unwrap();
        raw.set_item("tasks", "[]").unwrap();

        // Over 80% full; the write fits only once the stale import is dropped
        let payload = format!("[\"{}\"]", "y".repeat(900));
        let outcome = storage
            .runner()
            .safe_storage_operation(
                || {
                    let raw = raw.clone();
                    let payload = payload.clone();
                    async move { raw.set_item("tasks", &payload) }
                },
                SafeOptions::new().named("grow tasks"),
            )
            .await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert!(raw.get_item("temp_import").unwrap().is_none());
        assert_eq!(raw.get_item("tasks").unwrap(), Some(payload));
    }

    #[test]
    fn test_file_store_rejects_oversized_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.quota.capacity_mb = 64.0 / (1024.0 * 1024.0);
        let storage = Storage::open_with_config(config).unwrap();

        let err = storage
            .raw()
            .set_item("tasks", &"z".repeat(100))
            .unwrap_err();
        assert_eq!(err, StoreFailure::quota_exceeded(err.message.clone()));
    }
}
