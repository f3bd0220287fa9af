//! Safe storage operations
//!
//! Wraps an arbitrary unit of work with an optional pre-backup, failure
//! classification and a single reclaim-then-retry for quota failures.
//!
//! ```text
//! Attempt ──ok──────────────────────────────▶ Done
//!    │
//!    └─err─▶ ClassifyFailure ──quota + near full──▶ Reclaim ──freed──▶ Retry ──ok──▶ Done
//!                  │                                  │                  │
//!                  └─────────────otherwise────────────┴───nothing freed──┴──err──▶ Fail
//! ```
//!
//! The runner never panics on a failed operation and never returns `Err`;
//! every path resolves to an [`OperationOutcome`].

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;

use super::{
    detect_error_type, BackupManager, ErrorCallback, ErrorKind, QuotaMonitor, RawStore,
    SpaceReclaimer, StorageError, StoreFailure,
};

/// Options for [`SafeOperationRunner::safe_storage_operation`]
#[derive(Clone, Default)]
pub struct SafeOptions {
    /// Snapshot `storage_key` before running the operation
    pub backup: bool,
    pub storage_key: Option<String>,
    /// Invoked once with the classified error if the operation fails
    pub notify: Option<ErrorCallback>,
    /// Name used in log lines
    pub operation_name: Option<String>,
}

impl SafeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back up `storage_key` before the operation runs
    pub fn with_backup(mut self, storage_key: impl Into<String>) -> Self {
        self.backup = true;
        self.storage_key = Some(storage_key.into());
        self
    }

    pub fn with_notify(mut self, notify: ErrorCallback) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn named(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}

/// Result of a safe operation: data on success, a classified error otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<StorageError>,
}

impl<T> OperationOutcome<T> {
    fn succeeded(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(error: StorageError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, StorageError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(StorageError::new(ErrorKind::Unknown, None)),
        }
    }
}

enum Step<T> {
    Attempt,
    ClassifyFailure(StoreFailure),
    Reclaim(StoreFailure),
    Retry,
    Fail(StorageError),
    Done(T),
}

/// Runs units of work with backup, classification and bounded retry
#[derive(Clone)]
pub struct SafeOperationRunner {
    backups: BackupManager,
    quota: QuotaMonitor,
    reclaimer: SpaceReclaimer,
}

impl SafeOperationRunner {
    pub fn new(store: Arc<dyn RawStore>, config: &Config) -> Self {
        Self {
            backups: BackupManager::new(store.clone(), config.backup.clone()),
            quota: QuotaMonitor::new(store.clone(), config.quota.clone()),
            reclaimer: SpaceReclaimer::new(
                store,
                config.backup.clone(),
                config.reclaim.clone(),
            ),
        }
    }

    /// Run `operation`, recovering from quota failures once
    ///
    /// The operation may be retried, so it must be safe to invoke twice.
    pub async fn safe_storage_operation<T, F, Fut>(
        &self,
        mut operation: F,
        options: SafeOptions,
    ) -> OperationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreFailure>>,
    {
        let name = options
            .operation_name
            .as_deref()
            .unwrap_or("storage operation");

        if options.backup {
            if let Some(key) = options.storage_key.as_deref() {
                if !self.backups.create_backup(key) {
                    debug!("{}: no backup taken for '{}'", name, key);
                }
            }
        }

        let mut step = Step::Attempt;
        loop {
            step = match step {
                Step::Attempt => match operation().await {
                    Ok(data) => Step::Done(data),
                    Err(failure) => Step::ClassifyFailure(failure),
                },
                Step::ClassifyFailure(failure) => {
                    let kind = detect_error_type(Some(&failure));
                    debug!("{}: failed with {} ({})", name, kind, failure);

                    if kind != ErrorKind::QuotaExceeded {
                        Step::Fail(StorageError::new(kind, Some(failure)))
                    } else {
                        let quota = self.quota.check_storage_quota();
                        if quota.is_almost_full || quota.is_full {
                            Step::Reclaim(failure)
                        } else {
                            Step::Fail(StorageError::new(kind, Some(failure)).with_quota(quota))
                        }
                    }
                }
                Step::Reclaim(failure) => {
                    let report = self.reclaimer.try_free_space();
                    if report.success {
                        info!(
                            "{}: reclaimed {} bytes, retrying once",
                            name, report.freed_space
                        );
                        Step::Retry
                    } else {
                        Step::Fail(self.quota_error(failure))
                    }
                }
                Step::Retry => match operation().await {
                    Ok(data) => Step::Done(data),
                    Err(failure) => match detect_error_type(Some(&failure)) {
                        ErrorKind::QuotaExceeded => Step::Fail(self.quota_error(failure)),
                        kind => Step::Fail(StorageError::new(kind, Some(failure))),
                    },
                },
                Step::Fail(error) => {
                    warn!("{}: {} ({})", name, error, error.kind);
                    if let Some(ref notify) = options.notify {
                        notify(&error);
                    }
                    return OperationOutcome::failed(error);
                }
                Step::Done(data) => return OperationOutcome::succeeded(data),
            };
        }
    }

    fn quota_error(&self, failure: StoreFailure) -> StorageError {
        StorageError::new(ErrorKind::QuotaExceeded, Some(failure))
            .with_quota(self.quota.check_storage_quota())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaPolicy;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 1 KiB capacity, expressed in MB
    const ONE_KIB_MB: f64 = 1024.0 / (1024.0 * 1024.0);

    fn small_config() -> Config {
        Config {
            quota: QuotaPolicy {
                capacity_mb: ONE_KIB_MB,
                ..QuotaPolicy::default()
            },
            ..Config::default()
        }
    }

    fn recording_notifier() -> (ErrorCallback, Arc<Mutex<Vec<StorageError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let notify: ErrorCallback = Arc::new(move |err: &StorageError| {
            sink.lock().unwrap().push(err.clone());
        });
        (notify, seen)
    }

    #[tokio::test]
    async fn test_success_returns_data() {
        let store = Arc::new(MemoryStore::new());
        let runner = SafeOperationRunner::new(store.clone(), &Config::default());

        let outcome = runner
            .safe_storage_operation(|| async { Ok(42) }, SafeOptions::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.data, Some(42));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_backup_taken_before_operation() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("tasks", "[\"before\"]").unwrap();
        let runner = SafeOperationRunner::new(store.clone(), &Config::default());

        let writer = store.clone();
        let outcome = runner
            .safe_storage_operation(
                || {
                    let writer = writer.clone();
                    async move { writer.set_item("tasks", "[\"after\"]") }
                },
                SafeOptions::new().with_backup("tasks"),
            )
            .await;

        assert!(outcome.success);
        let backups = BackupManager::new(store.clone(), Config::default().backup);
        let listed = backups.list_backups(Some("tasks"));
        assert_eq!(listed.len(), 1);
        assert_eq!(
            store.get_item(&listed[0].key).unwrap().as_deref(),
            Some("[\"before\"]")
        );
    }

    #[tokio::test]
    async fn test_missing_backup_source_does_not_abort() {
        let store = Arc::new(MemoryStore::new());
        let runner = SafeOperationRunner::new(store.clone(), &Config::default());

        let outcome = runner
            .safe_storage_operation(
                || async { Ok("done") },
                SafeOptions::new().with_backup("missing"),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.data, Some("done"));
    }

    #[tokio::test]
    async fn test_non_quota_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let runner = SafeOperationRunner::new(store.clone(), &Config::default());
        let (notify, seen) = recording_notifier();
        let attempts = AtomicUsize::new(0);

        let outcome: OperationOutcome<()> = runner
            .safe_storage_operation(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(StoreFailure::security("blocked")) }
                },
                SafeOptions::new().with_notify(notify).named("save settings"),
            )
            .await;

        assert!(!outcome.success);
        assert!(outcome.data.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::SecurityError);
        assert_eq!(error.original_error.unwrap().name, "SecurityError");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ErrorKind::SecurityError);
    }

    #[tokio::test]
    async fn test_quota_failure_with_room_left_is_not_retried() {
        // Store far from full: the failure is reported without reclaiming
        let store = Arc::new(MemoryStore::new());
        store.set_item("temp_import", "xxxx").unwrap();
        let runner = SafeOperationRunner::new(store.clone(), &Config::default());
        let attempts = AtomicUsize::new(0);

        let outcome: OperationOutcome<()> = runner
            .safe_storage_operation(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(StoreFailure::quota_exceeded("full")) }
                },
                SafeOptions::new(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::QuotaExceeded);
        assert!(error.quota.is_some());
        // Nothing was reclaimed
        assert!(store.get_item("temp_import").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_quota_failure_reclaims_and_retries_once() {
        let config = small_config();
        let store = Arc::new(MemoryStore::with_capacity(config.quota.capacity_bytes()));

        // 5 + 150 = 155 bytes of live data
        store.set_item("tasks", &"x".repeat(150)).unwrap();

        // Four 176-byte snapshots, one more than the runner retains
        let generous = BackupManager::new(
            store.clone(),
            crate::config::BackupPolicy {
                max_backups: 10,
                ..Default::default()
            },
        );
        for _ in 0..4 {
            assert!(generous.create_backup("tasks"));
        }
        assert_eq!(store.usage(), 155 + 4 * 176);

        let runner = SafeOperationRunner::new(store.clone(), &config);
        let attempts = AtomicUsize::new(0);
        let writer = store.clone();
        let (notify, seen) = recording_notifier();

        let outcome = runner
            .safe_storage_operation(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let writer = writer.clone();
                    // 5 + 450 bytes only fit once a snapshot is gone
                    async move { writer.set_item("tasks", &"y".repeat(450)).map(|_| 450) }
                },
                SafeOptions::new().with_notify(notify).named("save tasks"),
            )
            .await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.data, Some(450));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.write_attempts("tasks"), 3); // initial seed + two attempts
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(generous.list_backups(Some("tasks")).len(), 3);
    }

    #[tokio::test]
    async fn test_failed_retry_reports_quota_details() {
        let config = small_config();
        let store = Arc::new(MemoryStore::with_capacity(config.quota.capacity_bytes()));
        store.set_item("tasks", &"x".repeat(700)).unwrap();
        store.set_item("temp_scratch", &"t".repeat(150)).unwrap();

        let runner = SafeOperationRunner::new(store.clone(), &config);
        let attempts = AtomicUsize::new(0);
        let writer = store.clone();
        let (notify, seen) = recording_notifier();

        let outcome = runner
            .safe_storage_operation(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let writer = writer.clone();
                    async move { writer.set_item("big", &"z".repeat(2000)) }
                },
                SafeOptions::new().with_notify(notify),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(store.get_item("temp_scratch").unwrap().is_none());

        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::QuotaExceeded);
        assert!(error.quota.is_some());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_reclaimable_fails_without_retry() {
        let config = small_config();
        let store = Arc::new(MemoryStore::with_capacity(config.quota.capacity_bytes()));
        store.set_item("tasks", &"x".repeat(900)).unwrap();

        let runner = SafeOperationRunner::new(store.clone(), &config);
        let attempts = AtomicUsize::new(0);
        let writer = store.clone();

        let outcome = runner
            .safe_storage_operation(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let writer = writer.clone();
                    async move { writer.set_item("more", &"z".repeat(500)) }
                },
                SafeOptions::new(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_into_result() {
        let ok = OperationOutcome::succeeded(1);
        assert_eq!(ok.into_result().unwrap(), 1);

        let err: OperationOutcome<i32> =
            OperationOutcome::failed(StorageError::new(ErrorKind::DataClone, None));
        assert_eq!(err.into_result().unwrap_err().kind, ErrorKind::DataClone);
    }
}
