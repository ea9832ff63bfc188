//! `magic-cli config` subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;

use crate::config::{display_value, ConfigStore, SCHEMA};

fn open(path: &Path) -> Result<ConfigStore> {
    ConfigStore::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Print the resolved value of `key`.
pub fn run_get(path: &Path, key: &str) -> Result<()> {
    let store = open(path)?;
    println!("{}", display_value(store.get(key)?));
    Ok(())
}

pub fn run_set(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut store = open(path)?;
    store.set(key, value)?;
    tracing::debug!(key, path = %path.display(), "configuration updated");
    Ok(())
}

pub fn run_reset(path: &Path) -> Result<()> {
    let mut store = open(path)?;
    store.reset()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

/// Print every key with its value and description.
pub fn run_list(path: &Path) -> Result<()> {
    let store = open(path)?;
    for entry in SCHEMA {
        let value = store.get(entry.key)?;
        let shown = if entry.secret { mask(value) } else { display_value(value) };
        println!("{} = {}", entry.key.bold(), shown);
        println!("    {}", entry.description.dimmed());
    }
    Ok(())
}

pub fn run_path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    Ok(())
}

/// Replace a secret with asterisks of the same length; unset stays empty.
fn mask(value: &Value) -> String {
    "*".repeat(display_value(value).chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask(&Value::String("sk-abc".to_string())), "******");
        assert_eq!(mask(&Value::Null), "");
    }
}
