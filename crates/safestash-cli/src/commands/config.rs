//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use safestash_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.print_json(&config)?,
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:                  {}", config.data_dir.display());
            println!("  store:                     {}", config.store_path().display());
            println!(
                "  log_level:                 {}",
                config.log_level.as_deref().unwrap_or("(not set)")
            );
            println!("  quota.capacity_mb:         {}", config.quota.capacity_mb);
            println!(
                "  quota.almost_full_percent: {}",
                config.quota.almost_full_percent
            );
            println!("  quota.full_percent:        {}", config.quota.full_percent);
            println!("  backup.namespace:          {}", config.backup.namespace);
            println!("  backup.max_backups:        {}", config.backup.max_backups);
            println!(
                "  reclaim.stale_prefixes:    {}",
                config.reclaim.stale_prefixes.join(", ")
            );
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Print the config file in use
pub fn path(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = effective_path(config_path);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({"path": path, "exists": path.exists()})
            );
        }
        _ => println!("{}", path.display()),
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;
    config.validate()?;

    // Save to the CLI-specified path or default
    config
        .save_to(&effective_path(config_path))
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn effective_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path)
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "log_level" => {
            config.log_level = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "quota.capacity_mb" => {
            config.quota.capacity_mb = value
                .parse()
                .context("Invalid value for quota.capacity_mb. Use a number of megabytes.")?;
        }
        "quota.almost_full_percent" => {
            config.quota.almost_full_percent = value
                .parse()
                .context("Invalid value for quota.almost_full_percent. Use a percentage.")?;
        }
        "quota.full_percent" => {
            config.quota.full_percent = value
                .parse()
                .context("Invalid value for quota.full_percent. Use a percentage.")?;
        }
        "backup.namespace" => {
            config.backup.namespace = value.to_string();
        }
        "backup.max_backups" => {
            config.backup.max_backups = value
                .parse()
                .context("Invalid value for backup.max_backups. Use a whole number.")?;
        }
        "reclaim.stale_prefixes" => {
            config.reclaim.stale_prefixes = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, log_level, quota.capacity_mb, quota.almost_full_percent, \
                 quota.full_percent, backup.namespace, backup.max_backups, reclaim.stale_prefixes",
                key
            );
        }
    }
    Ok(())
}
