//! pkghost - package provider host
//!
//! Loads provider units named in configuration, then runs one package
//! operation across every provider they export. Prompts, progress and
//! cancellation are handled by the console the providers call back into.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use pkghost_config::{HostConfig, LoadOptions};
use pkghost_providers::OptionCategory;
use pkghost_providers::unit::UnitCatalog;

mod commands;
mod config_bridge;
mod console;
mod formatter;
mod theme;

use commands::packages::FindTarget;
use commands::{CommandContext, config, options, packages, providers, sources};
use console::{Console, ConsoleOptions};
use formatter::OutputFormat;

/// pkghost - discover, install and remove packages through provider plugins
#[derive(Parser)]
#[command(name = "pkghost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Extra config file, merged after the user and workspace files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Additional unit locator (repeatable)
    #[arg(short, long = "unit", global = true)]
    units: Vec<String>,

    /// Answer yes to every prompt
    #[arg(short, long, global = true)]
    yes: bool,

    /// Restrict providers to these package sources (repeatable)
    #[arg(long = "source", global = true)]
    sources: Vec<String>,

    /// Dynamic option passed to providers, as key=value (repeatable)
    #[arg(short = 'o', long = "option", global = true, value_parser = parse_key_value)]
    options: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List loaded providers and their features
    Providers,

    /// Find available packages
    Find {
        #[command(flatten)]
        target: TargetArgs,
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// List installed packages
    Installed {
        /// Filter by package name
        name: Option<String>,
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Find a package and install it
    Install {
        #[command(flatten)]
        target: TargetArgs,
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Uninstall an installed package
    Uninstall {
        /// Package name
        name: String,
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Manage package sources
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// List the dynamic options providers accept
    Options {
        /// Which operation the options apply to
        #[arg(long, value_enum, default_value_t = OptionKind::Install)]
        category: OptionKind,
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Package name (`*` for everything)
    #[arg(required_unless_present_any = ["file", "uri"])]
    name: Option<String>,
    /// Exact version
    #[arg(long = "version", conflicts_with_all = ["minimum", "maximum"])]
    required: Option<String>,
    /// Lowest acceptable version
    #[arg(long = "min")]
    minimum: Option<String>,
    /// Highest acceptable version
    #[arg(long = "max")]
    maximum: Option<String>,
    /// Look up a local package file instead of a name
    #[arg(long, conflicts_with_all = ["name", "uri"])]
    file: Option<String>,
    /// Look up a package URI instead of a name
    #[arg(long, conflicts_with = "name")]
    uri: Option<String>,
}

impl TargetArgs {
    fn into_target(self) -> FindTarget {
        match (self.file, self.uri) {
            (Some(file), _) => FindTarget::File(file),
            (None, Some(uri)) => FindTarget::Uri(uri),
            (None, None) => FindTarget::named(
                self.name.as_deref().unwrap_or("*"),
                self.required.as_deref(),
                self.minimum.as_deref(),
                self.maximum.as_deref(),
            ),
        }
    }
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List sources
    List {
        /// Only ask this provider
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Register a source with a provider
    Add {
        /// Provider to register with
        provider: String,
        /// Source name
        name: String,
        /// Source location
        location: String,
        /// Mark the source trusted
        #[arg(long)]
        trusted: bool,
    },
    /// Unregister a source
    Remove {
        /// Provider owning the source
        provider: String,
        /// Source name
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OptionKind {
    Metadata,
    Install,
}

impl From<OptionKind> for OptionCategory {
    fn from(kind: OptionKind) -> Self {
        match kind {
            OptionKind::Metadata => Self::Metadata,
            OptionKind::Install => Self::Install,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        },
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workspace_root = std::env::current_dir().ok();
    let resolved = HostConfig::load(&LoadOptions {
        workspace_root: workspace_root.as_deref(),
        explicit_file: cli.config.as_deref(),
        ..LoadOptions::default()
    })?;

    let log_config = config_bridge::to_log_config(&resolved.config, cli.verbose);
    if let Err(e) = pkghost_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Commands::Config { command: ConfigCommands::Show } = cli.command {
        return config::show_config(&resolved);
    }

    let console = Console::new(ConsoleOptions {
        assume_yes: cli.yes,
        verbose: cli.verbose,
        sources: cli.sources.clone(),
        options: cli.options.clone(),
        configuration: config_bridge::configuration_values(&resolved.config),
    });
    let router = console.router();

    let cancel = console.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let host = config_bridge::build_host(&resolved.config, UnitCatalog::new());
    let locators = config_bridge::unit_locators(&resolved.config, &cli.units);
    if !host.initialize(&router, &locators).await {
        bail!("provider host failed to initialize");
    }

    let ctx = CommandContext {
        host: &host,
        router: &router,
        format: cli.format,
        assume_yes: cli.yes,
        sources: &cli.sources,
    };
    let outcome = dispatch(&ctx, cli.command).await;
    host.shutdown();
    outcome
}

async fn dispatch(ctx: &CommandContext<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Providers => {
            providers::list_providers(ctx);
            Ok(())
        },
        Commands::Find { target, provider } => {
            packages::find(ctx, provider.as_deref(), &target.into_target()).await
        },
        Commands::Installed { name, provider } => {
            packages::installed(ctx, provider.as_deref(), name.as_deref()).await
        },
        Commands::Install { target, provider } => {
            packages::install(ctx, provider.as_deref(), &target.into_target()).await
        },
        Commands::Uninstall { name, provider } => {
            packages::uninstall(ctx, provider.as_deref(), &name).await
        },
        Commands::Sources { command } => handle_sources(ctx, command).await,
        Commands::Options { category, provider } => {
            options::list_options(ctx, provider.as_deref(), category.into()).await
        },
        Commands::Config { .. } => Ok(()),
    }
}

async fn handle_sources(ctx: &CommandContext<'_>, command: SourceCommands) -> Result<()> {
    match command {
        SourceCommands::List { provider } => sources::list_sources(ctx, provider.as_deref()).await,
        SourceCommands::Add {
            provider,
            name,
            location,
            trusted,
        } => sources::add_source(ctx, &provider, &name, &location, trusted).await,
        SourceCommands::Remove { provider, name } => {
            sources::remove_source(ctx, &provider, &name).await
        },
    }
}
