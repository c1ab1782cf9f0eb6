//! Bridge from `pkghost_config::HostConfig` to host and logging types.

use std::collections::HashMap;

use pkghost_config::HostConfig;
use pkghost_providers::PackageHost;
use pkghost_providers::unit::UnitCatalog;
use pkghost_telemetry::LogConfig;

/// Logging settings, with `--verbose` forcing debug.
pub(crate) fn to_log_config(config: &HostConfig, verbose: bool) -> LogConfig {
    let mut log = LogConfig::from(&config.logging);
    if verbose {
        "debug".clone_into(&mut log.level);
    }
    log
}

/// A host sized from `[host]`.
pub(crate) fn build_host(config: &HostConfig, catalog: UnitCatalog) -> PackageHost {
    PackageHost::builder()
        .catalog(catalog)
        .worker_threads(config.host.effective_worker_threads())
        .queue_capacity(config.host.queue_capacity)
        .build()
}

/// Locators from configuration followed by any given on the command line.
pub(crate) fn unit_locators(config: &HostConfig, extra: &[String]) -> Vec<String> {
    let mut locators = config.host.unit_locators();
    locators.extend(extra.iter().cloned());
    locators
}

/// Values served to providers through `GetConfiguration`.
pub(crate) fn configuration_values(config: &HostConfig) -> HashMap<String, String> {
    HashMap::from([
        ("host.queue_capacity".to_owned(), config.host.queue_capacity.to_string()),
        (
            "host.worker_threads".to_owned(),
            config.host.effective_worker_threads().to_string(),
        ),
        ("logging.level".to_owned(), config.logging.level.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_forces_debug() {
        let config = HostConfig::default();
        assert_eq!(to_log_config(&config, false).level, "warn");
        assert_eq!(to_log_config(&config, true).level, "debug");
    }

    #[test]
    fn command_line_units_follow_configured_ones() {
        let mut config = HostConfig::default();
        config.host.units = vec!["zip".into()];
        assert_eq!(unit_locators(&config, &["tar".into()]), ["zip", "tar"]);
    }

    #[test]
    fn host_uses_configured_queue() {
        let mut config = HostConfig::default();
        config.host.queue_capacity = 7;
        config.host.worker_threads = 2;
        let host = build_host(&config, UnitCatalog::new());
        assert_eq!(host.options().queue_capacity, 7);
        assert_eq!(host.options().worker_threads, 2);
    }
}
