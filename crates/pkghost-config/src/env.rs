//! Environment variable overrides.
//!
//! Applied after every file layer, so they win over all of them.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// Overrides `logging.level`.
pub const ENV_LOG_LEVEL: &str = "PKGHOST_LOG_LEVEL";
/// Overrides `host.units` with a platform path list (`:`-separated on Unix).
pub const ENV_UNITS: &str = "PKGHOST_UNITS";
/// Alternate directory holding the user `config.toml`.
pub const ENV_HOME: &str = "PKGHOST_HOME";

/// Snapshot the `PKGHOST_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("PKGHOST_"))
        .collect()
}

/// Apply overrides from `vars` onto the merged tree. Returns how many were
/// applied.
///
/// # Errors
///
/// [`ConfigError::EnvError`] if a set variable is blank.
pub fn apply_env_overrides(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    vars: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied = 0_usize;

    if let Some(level) = vars.get(ENV_LOG_LEVEL) {
        let level = non_blank(ENV_LOG_LEVEL, level)?;
        set(merged, "logging", "level", toml::Value::String(level.to_ascii_lowercase()));
        sources.insert("logging.level".to_owned(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }

    if let Some(units) = vars.get(ENV_UNITS) {
        let units = non_blank(ENV_UNITS, units)?;
        let list = std::env::split_paths(units)
            .map(|p| p.display().to_string())
            .filter(|s| !s.is_empty())
            .map(toml::Value::String)
            .collect();
        set(merged, "host", "units", toml::Value::Array(list));
        sources.insert("host.units".to_owned(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }

    Ok(applied)
}

fn non_blank<'a>(name: &str, value: &'a str) -> ConfigResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EnvError {
            var_name: name.to_owned(),
            message: "set but empty".to_owned(),
        });
    }
    Ok(trimmed)
}

fn set(root: &mut toml::Value, section: &str, key: &str, value: toml::Value) {
    let Some(root) = root.as_table_mut() else {
        return;
    };
    let section = root
        .entry(section)
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    if let Some(table) = section.as_table_mut() {
        table.insert(key.to_owned(), value);
    }
}
