//! Quota and reclaim command handlers

use anyhow::Result;

use safestash_core::Storage;

use crate::output::Output;

/// Show usage against the quota and the `top` largest keys
pub fn show(storage: &Storage, top: usize, output: &Output) -> Result<()> {
    let quota = storage.quota();
    let info = quota.check_storage_quota();
    let largest: Vec<(String, u64)> = quota.usage_by_key().into_iter().take(top).collect();

    output.print_quota(&info, &largest)
}

/// Remove excess backups and stale keys
pub fn reclaim(storage: &Storage, output: &Output) -> Result<()> {
    let report = storage.reclaimer().try_free_space();
    output.print_reclaim(&report)
}
