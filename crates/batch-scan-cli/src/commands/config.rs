//! Config command implementation.
//!
//! Manages CLI configuration.

use anyhow::Result;
use batch_scan_ops::{Config, CONFIG_KEYS};

/// Show current configuration.
pub fn show(config: &Config) -> Result<()> {
    println!("bscan Configuration");
    println!("{:-<40}", "");

    for key in CONFIG_KEYS {
        println!(
            "{:<24} {}",
            key,
            config.get(key).unwrap_or_else(|| "(not set)".to_string())
        );
    }

    if let Some(config_path) = Config::config_file_path() {
        println!("\nConfig file: {}", config_path.display());
    }

    Ok(())
}

/// Set a configuration value.
pub fn set(config: &mut Config, key: &str, value: &str) -> Result<()> {
    config.set(key, value)?;
    config.validate()?;
    config.save()?;

    match key {
        "analyzer_token" | "git_token" | "github_tokens" => {
            println!("✅ Set {}", key);
            println!("⚠️  Secrets stored in the config file are plain text. Prefer env vars.");
        }
        _ => println!("Set {} to: {}", key, value),
    }
    Ok(())
}

/// Get a configuration value.
pub fn get(config: &Config, key: &str) -> Result<()> {
    if !CONFIG_KEYS.contains(&key) {
        anyhow::bail!(
            "Unknown config key: {}. Valid keys: {}",
            key,
            CONFIG_KEYS.join(", ")
        );
    }

    let value = config.get(key).unwrap_or_else(|| "(not set)".to_string());
    println!("{}", value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn reset() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults");
    Ok(())
}
