//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::HostConfig;

/// Largest accepted worker count.
const MAX_WORKER_THREADS: usize = 256;
/// Largest accepted per-call queue.
const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &HostConfig) -> ConfigResult<()> {
    validate_host(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_host(config: &HostConfig) -> ConfigResult<()> {
    let host = &config.host;

    if host.worker_threads > MAX_WORKER_THREADS {
        return Err(invalid(
            "host.worker_threads",
            format!(
                "{} workers is too many; must be at most {MAX_WORKER_THREADS} (0 = auto)",
                host.worker_threads
            ),
        ));
    }

    if host.queue_capacity == 0 || host.queue_capacity > MAX_QUEUE_CAPACITY {
        return Err(invalid(
            "host.queue_capacity",
            format!(
                "queue capacity {} is out of range; must be between 1 and {MAX_QUEUE_CAPACITY}",
                host.queue_capacity
            ),
        ));
    }

    if let Some(i) = host.units.iter().position(|u| u.trim().is_empty()) {
        return Err(invalid(&format!("host.units[{i}]"), "unit locator must not be empty".into()));
    }

    Ok(())
}

fn validate_logging(config: &HostConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message,
    }
}
