//! Rendering records as tables or JSON lines.

use colored::Colorize;
use pkghost_providers::{OptionDefinition, PackageRecord, SourceRecord};
use serde::Serialize;

use crate::theme::Theme;

/// Output format selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Colored tables.
    Pretty,
    /// One JSON object per line.
    Json,
}

fn print_json_lines<T: Serialize>(items: &[T]) {
    for item in items {
        match serde_json::to_string(item) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize record"),
        }
    }
}

pub(crate) fn print_packages(title: &str, packages: &[PackageRecord], format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json_lines(packages);
        return;
    }
    if packages.is_empty() {
        println!("{}", Theme::info("No packages found"));
        return;
    }

    println!("\n{}", Theme::header(title));
    println!(
        "{:<28} {:<14} {:<14} {:<14} {}",
        "NAME".dimmed(),
        "VERSION".dimmed(),
        "STATUS".dimmed(),
        "SOURCE".dimmed(),
        "PROVIDER".dimmed()
    );
    println!("{}", Theme::separator());
    for p in packages {
        println!(
            "{:<28} {:<14} {:<14} {:<14} {}",
            p.name.bold(),
            p.version,
            Theme::status(p.status),
            p.source.as_deref().unwrap_or("-"),
            p.provider.dimmed()
        );
        if let Some(summary) = p.summary.as_deref().filter(|s| !s.is_empty()) {
            println!("    {}", Theme::dimmed(summary));
        }
    }
    println!();
}

pub(crate) fn print_sources(sources: &[SourceRecord], format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json_lines(sources);
        return;
    }
    if sources.is_empty() {
        println!("{}", Theme::info("No package sources"));
        return;
    }

    println!("\n{}", Theme::header("Package Sources"));
    println!("{}", Theme::separator());
    for s in sources {
        println!(
            "{:<20} {:<10} {:<40} {}",
            s.name.bold(),
            Theme::trust(s.trusted),
            s.location,
            s.provider.dimmed()
        );
    }
    println!();
}

pub(crate) fn print_options(options: &[OptionDefinition], format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json_lines(options);
        return;
    }
    if options.is_empty() {
        println!("{}", Theme::info("No dynamic options"));
        return;
    }

    println!("\n{}", Theme::header("Dynamic Options"));
    println!("{}", Theme::separator());
    for o in options {
        let required = if o.is_required { " (required)".yellow().to_string() } else { String::new() };
        println!("{:<24} {:<10} {}{}", o.name.bold(), o.expected_type, o.category, required);
        if !o.permitted_values.is_empty() {
            println!("    {}", Theme::dimmed(&o.permitted_values.join(", ")));
        }
    }
    println!();
}
