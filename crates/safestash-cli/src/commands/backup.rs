//! Backup command handlers

use anyhow::{bail, Result};

use safestash_core::Storage;

use crate::output::Output;

/// Snapshot the current value of a key
pub fn create(storage: &Storage, key: String, output: &Output) -> Result<()> {
    if storage.raw().get_item(&key)?.is_none() {
        bail!("Key not found: {}", key);
    }

    if !storage.backups().create_backup(&key) {
        bail!("Failed to back up '{}'", key);
    }

    output.success(&format!("Backed up '{}'", key));
    Ok(())
}

/// Restore a key from its newest backup
pub fn restore(storage: &Storage, key: String, output: &Output) -> Result<()> {
    if !storage.backups().restore_from_backup(&key) {
        bail!("No backup of '{}' could be restored", key);
    }

    output.success(&format!("Restored '{}' from its newest backup", key));
    Ok(())
}

/// List backups, optionally for one key
pub fn list(storage: &Storage, key: Option<String>, output: &Output) -> Result<()> {
    let backups = storage.backups().list_backups(key.as_deref());
    output.print_backups(&backups)
}

/// Delete every backup of a key
pub fn clear(storage: &Storage, key: String, output: &Output) -> Result<()> {
    let deleted = storage.backups().delete_backups(&key);

    if deleted == 0 {
        output.message(&format!("No backups of '{}' to delete.", key));
    } else {
        output.success(&format!("Deleted {} backup(s) of '{}'", deleted, key));
    }
    Ok(())
}
