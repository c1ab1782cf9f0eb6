//! Layered configuration for the pkghost provider host.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pkghost_config::{HostConfig, LoadOptions};
//!
//! let resolved = HostConfig::load(&LoadOptions::default()).unwrap();
//! for locator in resolved.config.host.unit_locators() {
//!     println!("unit: {locator}");
//! }
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment** (`PKGHOST_LOG_LEVEL`, `PKGHOST_UNITS`)
//! 2. **Explicit file** (`--config <path>`)
//! 3. **Workspace** (`{workspace}/.pkghost/config.toml`)
//! 4. **User** (`~/.pkghost/config.toml`, or `$PKGHOST_HOME/config.toml`)
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate has no dependency on the host itself; the CLI converts a
//! [`HostConfig`] into host options at startup.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Deep merge of configuration layers.
pub mod merge;
/// Resolved configuration and provenance.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::LoadOptions;
pub use merge::ConfigLayer;
pub use show::ResolvedConfig;
pub use types::{HostConfig, HostSection, LoggingSection};

impl HostConfig {
    /// Load configuration with full precedence.
    ///
    /// See [`loader::load`] for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(options: &LoadOptions<'_>) -> ConfigResult<ResolvedConfig> {
        loader::load(options)
    }

    /// Load configuration from a single file (no layering).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
