//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `~/.pkghost/config.toml` (or `$PKGHOST_HOME/config.toml`)
//! 3. Merge `{workspace}/.pkghost/config.toml`
//! 4. Merge an explicitly named file, if any
//! 5. Apply `PKGHOST_*` environment overrides
//! 6. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{ENV_HOME, apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::HostConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Name of the per-user and per-workspace config directory.
pub const CONFIG_DIR_NAME: &str = ".pkghost";

/// Where to look for configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions<'a> {
    /// Project root whose `.pkghost/config.toml` is merged after the user file.
    pub workspace_root: Option<&'a Path>,
    /// Directory holding the user `config.toml`, replacing `~/.pkghost`.
    pub home_override: Option<&'a Path>,
    /// A file that must exist, merged last before the environment.
    pub explicit_file: Option<&'a Path>,
}

/// Load the configuration with full layer precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, an explicit
/// file is missing, or the merged configuration fails validation.
pub fn load(options: &LoadOptions<'_>) -> ConfigResult<ResolvedConfig> {
    load_with_env(options, &collect_env_vars())
}

/// [`load`] with an explicit environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    options: &LoadOptions<'_>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    let mut layer = |path: PathBuf, overlay: toml::Value, which: ConfigLayer| {
        deep_merge_tracking(&mut merged, &overlay, "", &which, &mut field_sources);
        info!(path = %path.display(), layer = %which, "loaded config");
        loaded_files.push(path.display().to_string());
    };

    if let Some(path) = user_config_path(options.home_override, env_vars)
        && let Some(overlay) = try_load_file(&path)?
    {
        layer(path, overlay, ConfigLayer::User);
    }

    if let Some(root) = options.workspace_root {
        let path = root.join(CONFIG_DIR_NAME).join("config.toml");
        if let Some(overlay) = try_load_file(&path)? {
            layer(path, overlay, ConfigLayer::Workspace);
        }
    }

    if let Some(path) = options.explicit_file {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        let which = ConfigLayer::File(path.display().to_string());
        layer(path.to_path_buf(), overlay, which);
    }

    let applied = apply_env_overrides(&mut merged, &mut field_sources, env_vars)?;
    if applied > 0 {
        debug!(count = applied, "applied environment overrides");
    }

    let config: HostConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a single file with no layering.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<HostConfig> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: HostConfig = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn user_config_path(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> Option<PathBuf> {
    if let Some(dir) = home_override {
        return Some(dir.join("config.toml"));
    }
    if let Some(dir) = env_vars.get(ENV_HOME).filter(|d| !d.trim().is_empty()) {
        return Some(PathBuf::from(dir).join("config.toml"));
    }
    match directories::BaseDirs::new() {
        Some(dirs) => Some(dirs.home_dir().join(CONFIG_DIR_NAME).join("config.toml")),
        None => {
            debug!("no home directory; skipping user config");
            None
        },
    }
}

/// Try to load a file, returning `None` if it doesn't exist.
///
/// Reads once and checks the size afterwards, avoiding a stat/read race.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir.join(CONFIG_DIR_NAME)).unwrap();
        std::fs::write(dir.join(CONFIG_DIR_NAME).join("config.toml"), body).unwrap();
    }

    #[test]
    fn defaults_deserialize_to_the_default_config() {
        let config: HostConfig = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn layers_apply_in_order() {
        let home = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[host]\nunits = [\"zip\"]\nqueue_capacity = 16\n[logging]\nlevel = \"info\"\n",
        )
        .unwrap();
        write_config(workspace.path(), "[host]\nqueue_capacity = 8\n");

        let options = LoadOptions {
            workspace_root: Some(workspace.path()),
            home_override: Some(home.path()),
            explicit_file: None,
        };
        let vars = HashMap::from([("PKGHOST_LOG_LEVEL".to_owned(), "debug".to_owned())]);
        let resolved = load_with_env(&options, &vars).unwrap();

        assert_eq!(resolved.config.host.units, ["zip"]);
        assert_eq!(resolved.config.host.queue_capacity, 8);
        assert_eq!(resolved.config.logging.level, "debug");
        assert_eq!(resolved.source_of("host.units"), ConfigLayer::User);
        assert_eq!(resolved.source_of("host.queue_capacity"), ConfigLayer::Workspace);
        assert_eq!(resolved.source_of("logging.level"), ConfigLayer::Environment);
        assert_eq!(resolved.source_of("logging.format"), ConfigLayer::Defaults);
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            home_override: Some(home.path()),
            explicit_file: Some(Path::new("/nonexistent/pkghost.toml")),
            ..LoadOptions::default()
        };
        let result = load_with_env(&options, &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn invalid_merged_value_fails_validation() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "[host]\nqueue_capacity = 0\n").unwrap();
        let options = LoadOptions {
            home_override: Some(home.path()),
            ..LoadOptions::default()
        };
        let result = load_with_env(&options, &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();
        assert!(matches!(
            try_load_file(&file_path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn load_file_skips_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only.toml");
        std::fs::write(&path, "[host]\nworker_threads = 2\n").unwrap();
        let config = load_file(&path).unwrap();
        assert_eq!(config.host.worker_threads, 2);
        assert_eq!(config.logging.level, "warn");
    }
}
