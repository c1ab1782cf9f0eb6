//! `pkghost providers` - list loaded providers.

use colored::Colorize;
use pkghost_providers::{FEATURE_FILE_EXTENSIONS, FEATURE_URI_SCHEMES};

use super::CommandContext;
use crate::formatter::OutputFormat;
use crate::theme::Theme;

pub(crate) fn list_providers(ctx: &CommandContext<'_>) {
    let providers = ctx.host.providers();

    if ctx.format == OutputFormat::Json {
        for p in &providers {
            let features = p.features(ctx.router);
            let line = serde_json::json!({
                "name": p.name(),
                "version": p.version(),
                "origin": p.origin().to_string(),
                "uri_schemes": features.values(FEATURE_URI_SCHEMES),
                "file_extensions": features.values(FEATURE_FILE_EXTENSIONS),
            });
            println!("{line}");
        }
        return;
    }

    if providers.is_empty() {
        println!("{}", Theme::info("No providers loaded"));
        return;
    }

    println!("\n{}", Theme::header("Package Providers"));
    println!(
        "{:<20} {:<12} {}",
        "NAME".dimmed(),
        "VERSION".dimmed(),
        "ORIGIN".dimmed()
    );
    println!("{}", Theme::separator());
    for p in &providers {
        println!(
            "{:<20} {:<12} {}",
            p.name().bold(),
            p.version().unwrap_or_else(|| "-".to_owned()),
            Theme::dimmed(&p.origin().to_string())
        );
        let features = p.features(ctx.router);
        for (name, values) in features.iter() {
            if values.is_empty() {
                println!("    {}", Theme::dimmed(name));
            } else {
                println!("    {} {}", Theme::dimmed(&format!("{name}:")), values.join(" "));
            }
        }
    }
    println!();
}
