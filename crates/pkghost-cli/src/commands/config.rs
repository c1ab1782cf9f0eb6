//! `pkghost config` - show the resolved configuration.

use colored::Colorize;
use pkghost_config::ResolvedConfig;

use crate::theme::Theme;

/// Fields listed with their origin.
const SHOWN_FIELDS: &[&str] = &[
    "host.units",
    "host.unit_dirs",
    "host.worker_threads",
    "host.queue_capacity",
    "logging.level",
    "logging.format",
    "logging.directives",
    "logging.log_dir",
];

pub(crate) fn show_config(resolved: &ResolvedConfig) -> anyhow::Result<()> {
    println!("{}", resolved.to_toml()?);

    println!("{}", Theme::header("Sources"));
    println!("{}", Theme::separator());
    for field in SHOWN_FIELDS {
        println!("{:<24} {}", field.bold(), Theme::dimmed(&resolved.source_of(field).to_string()));
    }
    if resolved.loaded_files.is_empty() {
        println!("\n{}", Theme::info("No config files found; using defaults"));
    } else {
        println!("\n{}", Theme::header("Files"));
        for file in &resolved.loaded_files {
            println!("  {file}");
        }
    }
    Ok(())
}
