//! The resolved configuration and where each value came from.

use crate::error::ConfigResult;
use crate::merge::{ConfigLayer, FieldSources};
use crate::types::HostConfig;

/// A loaded configuration plus its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The merged, validated configuration.
    pub config: HostConfig,
    /// Dotted field path → layer that set it.
    pub field_sources: FieldSources,
    /// Files that contributed, in merge order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Layer that set `field` (e.g. `"host.units"`).
    #[must_use]
    pub fn source_of(&self, field: &str) -> ConfigLayer {
        self.field_sources
            .get(field)
            .cloned()
            .unwrap_or(ConfigLayer::Defaults)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RenderError`](crate::ConfigError::RenderError)
    /// if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }
}
