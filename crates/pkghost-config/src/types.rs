//! Configuration struct definitions.
//!
//! Every section derives `Default` with the same values as the embedded
//! `defaults.toml`, so a partially specified file deserializes cleanly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Top-level host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Discovery and call settings.
    pub host: HostSection,
    /// Logging settings.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// HostSection
// ---------------------------------------------------------------------------

/// `[host]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Unit locators loaded at startup: manifest paths or bare names.
    pub units: Vec<String>,
    /// Directories scanned for `*.toml` unit manifests.
    pub unit_dirs: Vec<PathBuf>,
    /// Units loaded concurrently during discovery. `0` means one per CPU.
    pub worker_threads: usize,
    /// Records buffered per streaming call.
    pub queue_capacity: usize,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            unit_dirs: Vec::new(),
            worker_threads: 0,
            queue_capacity: 64,
        }
    }
}

impl HostSection {
    /// Worker count with `0` resolved to the available parallelism.
    #[must_use]
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism().map_or(4, usize::from)
        } else {
            self.worker_threads
        }
    }

    /// Every configured locator: `units` first, then the manifests found in
    /// `unit_dirs` in name order. Unreadable directories are skipped.
    #[must_use]
    pub fn unit_locators(&self) -> Vec<String> {
        let mut locators = self.units.clone();
        for dir in &self.unit_dirs {
            locators.extend(scan_unit_dir(dir));
        }
        locators
    }
}

fn scan_unit_dir(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot scan unit directory");
            return Vec::new();
        },
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        })
        .collect();
    found.sort();
    debug!(dir = %dir.display(), units = found.len(), "Scanned unit directory");
    found
        .into_iter()
        .map(|p| p.display().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["pkghost_providers=debug"]`).
    pub directives: Vec<String>,
    /// Write logs to daily-rolling files in this directory instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            log_dir: None,
        }
    }
}
