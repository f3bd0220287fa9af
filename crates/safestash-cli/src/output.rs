//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use safestash_core::{BackupRecord, EntityRecord, QuotaInfo, ReclaimReport, StorageError};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("Failed to encode JSON output")?;
        println!("{}", json);
        Ok(())
    }

    /// Print a single record
    pub fn print_record(&self, record: &EntityRecord) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:      {}", record.id);
                println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S"));
                if !record.fields.is_empty() {
                    println!();
                    for (name, value) in &record.fields {
                        println!("  {}: {}", name, display_value(value));
                    }
                }
            }
            OutputFormat::Json => self.print_json(record)?,
            OutputFormat::Quiet => println!("{}", record.id),
        }
        Ok(())
    }

    /// Print a list of records
    pub fn print_records(&self, records: &[EntityRecord]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records found.");
                    return Ok(());
                }
                for record in records {
                    println!(
                        "{} | {} | {}",
                        record.id,
                        record.updated_at.format("%Y-%m-%d %H:%M"),
                        truncate(&summarize_fields(record), 50)
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => self.print_json(records)?,
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id);
                }
            }
        }
        Ok(())
    }

    /// Print quota usage and the largest keys
    pub fn print_quota(&self, quota: &QuotaInfo, largest: &[(String, u64)]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                let state = if quota.is_full {
                    "FULL"
                } else if quota.is_almost_full {
                    "almost full"
                } else {
                    "ok"
                };
                println!("Storage Quota");
                println!("=============");
                println!();
                println!(
                    "  Used:      {:.2} MB ({} bytes)",
                    quota.used_mb, quota.used
                );
                println!(
                    "  Available: {:.2} MB ({} bytes)",
                    quota.available_mb, quota.available
                );
                println!("  Quota:     {:.2} MB", quota.quota_mb);
                println!("  Usage:     {:.1}% [{}]", quota.percentage, state);

                if !largest.is_empty() {
                    println!();
                    println!("Largest keys:");
                    for (key, size) in largest {
                        println!("  {:>10}  {}", size, key);
                    }
                }
            }
            OutputFormat::Json => {
                let keys: Vec<Value> = largest
                    .iter()
                    .map(|(key, size)| serde_json::json!({"key": key, "size": size}))
                    .collect();
                self.print_json(&serde_json::json!({"quota": quota, "largestKeys": keys}))?;
            }
            OutputFormat::Quiet => println!("{:.1}", quota.percentage),
        }
        Ok(())
    }

    /// Print a list of backups
    pub fn print_backups(&self, backups: &[BackupRecord]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if backups.is_empty() {
                    println!("No backups found.");
                    return Ok(());
                }
                for backup in backups {
                    println!(
                        "{} | {} | {} bytes",
                        backup.date, backup.key, backup.size
                    );
                }
                println!("\n{} backup(s)", backups.len());
            }
            OutputFormat::Json => self.print_json(backups)?,
            OutputFormat::Quiet => {
                for backup in backups {
                    println!("{}", backup.key);
                }
            }
        }
        Ok(())
    }

    /// Print the outcome of a reclamation pass
    pub fn print_reclaim(&self, report: &ReclaimReport) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if !report.success {
                    println!("Nothing to reclaim.");
                    return Ok(());
                }
                for action in &report.actions {
                    println!("✓ {}", action);
                }
                println!(
                    "\nFreed {} bytes ({:.2} MB)",
                    report.freed_space, report.freed_mb
                );
            }
            OutputFormat::Json => self.print_json(report)?,
            OutputFormat::Quiet => println!("{}", report.freed_space),
        }
        Ok(())
    }

    /// Print a classified storage failure
    ///
    /// Human output goes to stderr; JSON output stays on stdout.
    pub fn print_storage_error(&self, error: &StorageError) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                eprintln!("✗ {} [{}]", error.title, error.severity);
                eprintln!("  {}", error.message);
                if let Some(ref original) = error.original_error {
                    eprintln!("  Cause: {}", original);
                }
                if let Some(ref quota) = error.quota {
                    eprintln!(
                        "  Usage: {:.2} of {:.2} MB ({:.1}%)",
                        quota.used_mb, quota.quota_mb, quota.percentage
                    );
                }
                if !error.actions.is_empty() {
                    eprintln!("  Try:");
                    for action in &error.actions {
                        eprintln!("    - {}", action);
                    }
                }
            }
            OutputFormat::Json => self.print_json(&serde_json::json!({"error": error}))?,
            OutputFormat::Quiet => eprintln!("{}", error.kind),
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One-line `name=value` summary of a record's application fields
fn summarize_fields(record: &EntityRecord) -> String {
    record
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, display_value(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strings print bare, everything else as compact JSON
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string to max chars, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
