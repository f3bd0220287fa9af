//! Record command handlers
//!
//! Every mutation goes through the CRUD API, so it gets a backup first and
//! one reclaim-and-retry on a full store. Failures reported through the
//! error callback are printed before the command fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use safestash_core::{
    EntityRecord, ErrorCallback, MultiKeyStorageApi, SafeOptions, Storage, StorageError,
    StoreFailure,
};

use crate::output::Output;

/// Collects errors reported by the CRUD layer during one command
#[derive(Clone, Default)]
struct ErrorSink {
    errors: Arc<Mutex<Vec<StorageError>>>,
}

impl ErrorSink {
    fn callback(&self) -> ErrorCallback {
        let errors = self.errors.clone();
        Arc::new(move |error: &StorageError| errors.lock().push(error.clone()))
    }

    fn take(&self) -> Vec<StorageError> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Print collected errors, returning how many there were
    fn flush(&self, output: &Output) -> Result<usize> {
        let errors = self.take();
        for error in &errors {
            output.print_storage_error(error)?;
        }
        Ok(errors.len())
    }
}

fn open_api(storage: &Storage, key: &str, sink: &ErrorSink) -> MultiKeyStorageApi {
    storage.create_multi_key_storage_api(key, Map::new(), Some(sink.callback()))
}

/// List records, optionally filtered by `FIELD=VALUE`
pub fn list(storage: &Storage, key: String, filter: Option<String>, output: &Output) -> Result<()> {
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    let records = match filter {
        Some(ref expr) => {
            let (field, value) = parse_filter(expr)?;
            api.get_by_foreign_key(field, &value)
        }
        None => api.get(),
    };

    sink.flush(output)?;
    output.print_records(&records)
}

/// Show a single record
pub fn get(storage: &Storage, key: String, id: String, output: &Output) -> Result<()> {
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    let record = api.get_by_id(&id);
    sink.flush(output)?;

    let record = record.ok_or_else(|| anyhow::anyhow!("Record not found: {}", id))?;
    output.print_record(&record)
}

/// Add a record from a JSON object
pub fn add(storage: &Storage, key: String, json: String, output: &Output) -> Result<()> {
    let fields = parse_object(&json)?;
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    let Some(record) = api.add(fields) else {
        sink.flush(output)?;
        bail!("Failed to add record to '{}'", key);
    };

    output.success(&format!("Created record: {}", record.id));
    output.print_record(&record)
}

/// Add several records from a JSON array
pub fn add_many(storage: &Storage, key: String, json: String, output: &Output) -> Result<()> {
    let items: Value = serde_json::from_str(&json).context("Records must be valid JSON")?;
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    let result = api.add_many(items);
    if !result.success {
        sink.flush(output)?;
        bail!(
            "Failed to add records to '{}': {}",
            key,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    output.success(&format!(
        "Created {} record(s) in '{}'",
        result.items.len(),
        key
    ));
    output.print_records(&result.items)
}

/// Merge fields into an existing record
pub fn update(
    storage: &Storage,
    key: String,
    id: String,
    json: String,
    output: &Output,
) -> Result<()> {
    let updates = parse_object(&json)?;
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    let Some(record) = api.update(&id, updates) else {
        if sink.flush(output)? > 0 {
            bail!("Failed to update record {}", id);
        }
        bail!("Record not found: {}", id);
    };

    output.success(&format!("Updated record: {}", record.id));
    output.print_record(&record)
}

/// Delete a record
pub fn remove(storage: &Storage, key: String, id: String, output: &Output) -> Result<()> {
    let sink = ErrorSink::default();
    let api = open_api(storage, &key, &sink);

    if !api.remove(&id) {
        if sink.flush(output)? > 0 {
            bail!("Failed to delete record {}", id);
        }
        bail!("Record not found: {}", id);
    }

    output.success(&format!("Deleted record: {}", id));
    Ok(())
}

/// Replace the whole value of `key` with the records in `file`
///
/// Runs through the safe runner: the current value is backed up first and
/// a write rejected for quota is retried once after reclamation.
pub async fn import(storage: &Storage, key: String, file: PathBuf, output: &Output) -> Result<()> {
    let raw = storage.raw();

    let outcome = storage
        .runner()
        .safe_storage_operation(
            || {
                let raw = raw.clone();
                let key = key.clone();
                let file = file.clone();
                async move {
                    let content = tokio::fs::read_to_string(&file)
                        .await
                        .map_err(|e| StoreFailure::from_io(&e, &key))?;
                    let records: Vec<EntityRecord> = serde_json::from_str(&content)?;
                    raw.set_item(&key, &serde_json::to_string(&records)?)?;
                    Ok::<usize, StoreFailure>(records.len())
                }
            },
            SafeOptions::new()
                .with_backup(key.clone())
                .named(format!("import into '{}'", key)),
        )
        .await;

    match outcome.into_result() {
        Ok(count) => {
            output.success(&format!(
                "Imported {} record(s) from {} into '{}'",
                count,
                file.display(),
                key
            ));
            Ok(())
        }
        Err(error) => {
            output.print_storage_error(&error)?;
            bail!("Failed to import {} into '{}'", file.display(), key);
        }
    }
}

/// Parse a JSON object argument
fn parse_object(json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json).context("Fields must be valid JSON")? {
        Value::Object(fields) => Ok(fields),
        other => bail!("Fields must be a JSON object, got: {}", other),
    }
}

/// Parse `FIELD=VALUE`; the value is JSON if it parses, else a string
fn parse_filter(expr: &str) -> Result<(&str, Value)> {
    let Some((field, raw)) = expr.split_once('=') else {
        bail!("Filter must look like FIELD=VALUE, got: {}", expr);
    };
    if field.is_empty() {
        bail!("Filter field must not be empty");
    }

    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field, value))
}
