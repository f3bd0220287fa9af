//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/safestash/config.toml)
//! 3. Environment variables (SAFESTASH_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! Every reliability policy (capacity, thresholds, retention, naming) lives
//! here so none of it is a magic number in the components.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "SAFESTASH";

/// Assumed capacity of the store, in MB
pub const DEFAULT_CAPACITY_MB: f64 = 5.0;

/// Usage percentage above which the store counts as almost full
pub const DEFAULT_ALMOST_FULL_PERCENT: f64 = 80.0;

/// Usage percentage above which the store counts as full
pub const DEFAULT_FULL_PERCENT: f64 = 95.0;

/// Snapshots retained per logical key
pub const DEFAULT_MAX_BACKUPS: usize = 3;

/// Prefix of every backup key
pub const DEFAULT_BACKUP_NAMESPACE: &str = "backup";

/// Prefixes of transient keys that reclamation may delete
pub const DEFAULT_STALE_PREFIXES: &[&str] = &["temp_", "migration_"];

/// Capacity and utilization thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Assumed total capacity of the store in MB
    pub capacity_mb: f64,
    /// Percentage above which `is_almost_full` is set
    pub almost_full_percent: f64,
    /// Percentage above which `is_full` is set
    pub full_percent: f64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            capacity_mb: DEFAULT_CAPACITY_MB,
            almost_full_percent: DEFAULT_ALMOST_FULL_PERCENT,
            full_percent: DEFAULT_FULL_PERCENT,
        }
    }
}

impl QuotaPolicy {
    /// Capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        (self.capacity_mb * 1024.0 * 1024.0).round() as u64
    }
}

/// Snapshot naming and rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupPolicy {
    /// Prefix of backup keys: `<namespace>_<key>_<millis>`
    pub namespace: String,
    /// Snapshots kept per logical key
    pub max_backups: usize,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_BACKUP_NAMESPACE.to_string(),
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

/// What reclamation may delete besides excess snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimPolicy {
    /// Key prefixes of stale transient entries
    pub stale_prefixes: Vec<String>,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self {
            stale_prefixes: DEFAULT_STALE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the file-backed store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level for the CLI (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub quota: QuotaPolicy,

    #[serde(default)]
    pub backup: BackupPolicy,

    #[serde(default)]
    pub reclaim: ReclaimPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: None,
            quota: QuotaPolicy::default(),
            backup: BackupPolicy::default(),
            reclaim: ReclaimPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SAFESTASH_DATA_DIR, SAFESTASH_QUOTA_MB, ...)
    /// 2. Config file (~/.config/safestash/config.toml or SAFESTASH_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // SAFESTASH_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // SAFESTASH_QUOTA_MB
        if let Ok(val) = std::env::var(format!("{}_QUOTA_MB", ENV_PREFIX)) {
            self.quota.capacity_mb = val
                .parse()
                .with_context(|| format!("Invalid {}_QUOTA_MB: {:?}", ENV_PREFIX, val))?;
        }

        // SAFESTASH_MAX_BACKUPS
        if let Ok(val) = std::env::var(format!("{}_MAX_BACKUPS", ENV_PREFIX)) {
            self.backup.max_backups = val
                .parse()
                .with_context(|| format!("Invalid {}_MAX_BACKUPS: {:?}", ENV_PREFIX, val))?;
        }

        // SAFESTASH_LOG_LEVEL
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.log_level = if val.is_empty() { None } else { Some(val) };
        }

        Ok(())
    }

    /// Reject policies the components cannot honor
    pub fn validate(&self) -> Result<()> {
        let quota = &self.quota;
        if quota.capacity_mb.is_nan() || quota.capacity_mb <= 0.0 {
            bail!("quota.capacity_mb must be positive, got {}", quota.capacity_mb);
        }
        for (name, value) in [
            ("almost_full_percent", quota.almost_full_percent),
            ("full_percent", quota.full_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("quota.{} must be between 0 and 100, got {}", name, value);
            }
        }
        if quota.almost_full_percent > quota.full_percent {
            bail!(
                "quota.almost_full_percent ({}) must not exceed quota.full_percent ({})",
                quota.almost_full_percent,
                quota.full_percent
            );
        }

        if self.backup.max_backups == 0 {
            bail!("backup.max_backups must be at least 1");
        }
        if self.backup.namespace.is_empty() {
            bail!("backup.namespace must not be empty");
        }

        let backup_prefix = format!("{}_", self.backup.namespace);
        for prefix in &self.reclaim.stale_prefixes {
            if prefix.is_empty() {
                bail!("reclaim.stale_prefixes must not contain an empty prefix");
            }
            if backup_prefix.starts_with(prefix.as_str()) || prefix.starts_with(&backup_prefix) {
                bail!(
                    "reclaim.stale_prefixes entry {:?} overlaps backup keys ({:?})",
                    prefix,
                    backup_prefix
                );
            }
        }

        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SAFESTASH_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("safestash")
            .join("config.toml")
    }

    /// Get the path to the file-backed store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("safestash")
}
