//! Command implementations.

pub(crate) mod config;
pub(crate) mod options;
pub(crate) mod packages;
pub(crate) mod providers;
pub(crate) mod sources;

use anyhow::{Result, bail};
use pkghost_providers::{CapabilityRouter, PackageHost, Provider};

use crate::formatter::OutputFormat;

/// Everything a command needs once the host is up.
pub(crate) struct CommandContext<'a> {
    pub(crate) host: &'a PackageHost,
    pub(crate) router: &'a CapabilityRouter,
    pub(crate) format: OutputFormat,
    pub(crate) assume_yes: bool,
    pub(crate) sources: &'a [String],
}

impl CommandContext<'_> {
    /// Providers to query: the named one, or all of them.
    pub(crate) fn providers(&self, name: Option<&str>) -> Result<Vec<Provider>> {
        let selected = self.host.select_providers(name, self.sources);
        if selected.is_empty() {
            match name {
                Some(name) => bail!("no provider named '{name}' is loaded"),
                None => bail!("no providers are loaded; add units to [host] in the config"),
            }
        }
        Ok(selected)
    }
}
