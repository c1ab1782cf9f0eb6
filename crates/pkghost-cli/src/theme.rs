//! CLI theme and styling.

use colored::Colorize;
use pkghost_providers::PackageStatus;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(60).dimmed().to_string()
    }

    /// Format a package status.
    pub(crate) fn status(status: PackageStatus) -> String {
        match status {
            PackageStatus::Installed => status.to_string().green().to_string(),
            PackageStatus::Available => status.to_string().cyan().to_string(),
            PackageStatus::NotInstalled => status.to_string().dimmed().to_string(),
        }
    }

    /// Format a trust flag.
    pub(crate) fn trust(trusted: bool) -> String {
        if trusted {
            "trusted".green().to_string()
        } else {
            "untrusted".yellow().to_string()
        }
    }
}
