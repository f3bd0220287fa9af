//! SafeStash Core Library
//!
//! This crate keeps application records alive on a bounded, synchronous
//! key-value store (the kind a browser runtime embeds, capped near 5 MB).
//! It survives the two failure modes of that medium: corrupted values and
//! writes rejected once the quota is reached.
//!
//! # Architecture
//!
//! - **RawStore**: injected key-value capability (`MemoryStore`, `FileStore`)
//! - **ErrorClassifier**: maps raw failures to an `ErrorKind` and a
//!   user-facing `StorageError`
//! - **QuotaMonitor**: usage versus the assumed capacity
//! - **BackupManager**: timestamped snapshots with rotation
//! - **SpaceReclaimer**: drops excess snapshots and stale transient keys
//! - **SafeOperationRunner**: backup, attempt, classify, reclaim, retry once
//! - **StorageApi**: per-collection CRUD with all of the above built in
//!
//! # Quick Start
//!
//! ```text
//! let storage = Storage::open()?;
//!
//! let tasks = storage.create_storage_api("tasks", Map::new(), None);
//!
//! let mut fields = Map::new();
//! fields.insert("name".into(), json!("Write report"));
//! let task = tasks.add(fields);
//!
//! let quota = storage.quota().check_storage_quota();
//! ```
//!
//! # Modules
//!
//! - `store`: `Storage` facade (main entry point)
//! - `crud`: per-collection CRUD API and migrations
//! - `models`: `EntityRecord` and id generation
//! - `storage`: raw stores, classification, quota, backups, reclamation
//! - `config`: policy and application configuration

pub mod config;
pub mod crud;
pub mod models;
pub mod storage;
pub mod store;

pub use config::{BackupPolicy, Config, QuotaPolicy, ReclaimPolicy};
pub use crud::{migrate_storage, AddManyResult, MigrationResult, MultiKeyStorageApi, StorageApi};
pub use models::{generate_id, EntityRecord};
pub use storage::{
    detect_error_type, error_message, BackupManager, BackupRecord, ErrorCallback, ErrorKind,
    ErrorMessage, FileStore, MemoryStore, OperationOutcome, QuotaInfo, QuotaMonitor, RawStore,
    ReclaimReport, SafeOperationRunner, SafeOptions, Severity, SpaceReclaimer, StorageError,
    StoreFailure,
};
pub use store::Storage;
