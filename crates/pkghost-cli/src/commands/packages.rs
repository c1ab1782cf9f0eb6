//! `pkghost find`, `installed`, `install` and `uninstall`.

use std::io::Read;

use anyhow::{Context, Result, bail};
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use futures::future::join_all;
use pkghost_providers::{FindRequest, PackageRecord, SessionState, StreamSession};

use super::CommandContext;
use crate::formatter::{OutputFormat, print_packages};
use crate::theme::Theme;

const HEADER_LEN: usize = 16;

/// What a find is keyed on.
#[derive(Debug, Clone)]
pub(crate) enum FindTarget {
    /// Package name with optional version constraints.
    Name(FindRequest),
    /// A local package file.
    File(String),
    /// A package URI.
    Uri(String),
}

impl FindTarget {
    pub(crate) fn named(name: &str, version: Option<&str>, min: Option<&str>, max: Option<&str>) -> Self {
        let mut request = FindRequest::named(name);
        if let Some(version) = version {
            request = request.with_required_version(version);
        }
        if min.is_some() || max.is_some() {
            request = request.with_range(min.unwrap_or_default(), max.unwrap_or_default());
        }
        Self::Name(request)
    }
}

/// Query every selected provider concurrently and merge the results.
async fn find_all(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    target: &FindTarget,
) -> Result<Vec<PackageRecord>> {
    let providers = ctx.providers(provider)?;
    let header = match target {
        FindTarget::File(file) => read_header(file).await,
        _ => Vec::new(),
    };
    let sessions: Vec<StreamSession<PackageRecord>> = providers
        .iter()
        .filter_map(|p| match target {
            FindTarget::Name(request) => Some(p.find_package(request, ctx.router)),
            FindTarget::File(file) => (p.is_supported_file(file, ctx.router)
                || p.is_supported_content(&header, ctx.router))
            .then(|| p.find_package_by_file(file, ctx.router)),
            FindTarget::Uri(uri) => p
                .is_supported_uri(uri, ctx.router)
                .then(|| p.find_package_by_uri(uri, ctx.router)),
        })
        .collect();

    Ok(join_all(sessions.into_iter().map(StreamSession::collect_all))
        .await
        .into_iter()
        .flatten()
        .collect())
}

/// The leading bytes of `file`, for magic-signature matching. Empty when
/// the file cannot be read.
async fn read_header(file: &str) -> Vec<u8> {
    let path = file.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut header = Vec::with_capacity(HEADER_LEN);
        match std::fs::File::open(&path) {
            Ok(f) => {
                if let Err(e) = f.take(HEADER_LEN as u64).read_to_end(&mut header) {
                    tracing::debug!(file = %path, error = %e, "Could not read file header");
                }
            },
            Err(e) => tracing::debug!(file = %path, error = %e, "Could not open file"),
        }
        header
    })
    .await
    .unwrap_or_default()
}

pub(crate) async fn find(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    target: &FindTarget,
) -> Result<()> {
    let packages = find_all(ctx, provider, target).await?;
    print_packages("Available Packages", &packages, ctx.format);
    Ok(())
}

pub(crate) async fn installed(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    name: Option<&str>,
) -> Result<()> {
    let providers = ctx.providers(provider)?;
    let name = name.unwrap_or_default();
    let packages: Vec<_> = join_all(
        providers
            .iter()
            .map(|p| p.installed_packages(name, ctx.router).collect_all()),
    )
    .await
    .into_iter()
    .flatten()
    .collect();
    print_packages("Installed Packages", &packages, ctx.format);
    Ok(())
}

pub(crate) async fn install(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    target: &FindTarget,
) -> Result<()> {
    let candidates = find_all(ctx, provider, target).await?;
    let Some(chosen) = choose(ctx, "install", candidates)? else {
        bail!("no matching package found");
    };
    let provider = ctx
        .host
        .provider(&chosen.provider)
        .with_context(|| format!("provider '{}' is no longer loaded", chosen.provider))?;

    let session = provider.install_package(&chosen, ctx.router);
    drain("Installed", ctx.format, session).await
}

pub(crate) async fn uninstall(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    name: &str,
) -> Result<()> {
    let providers = ctx.providers(provider)?;
    let candidates: Vec<_> = join_all(
        providers
            .iter()
            .map(|p| p.installed_packages(name, ctx.router).collect_all()),
    )
    .await
    .into_iter()
    .flatten()
    .collect();
    let Some(chosen) = choose(ctx, "uninstall", candidates)? else {
        bail!("'{name}' is not installed");
    };
    let provider = ctx
        .host
        .provider(&chosen.provider)
        .with_context(|| format!("provider '{}' is no longer loaded", chosen.provider))?;

    let session = provider.uninstall_package(&chosen, ctx.router);
    drain("Uninstalled", ctx.format, session).await
}

/// Pick one record. Several candidates need `--yes` (takes the first) or
/// an interactive choice.
fn choose(
    ctx: &CommandContext<'_>,
    verb: &str,
    mut candidates: Vec<PackageRecord>,
) -> Result<Option<PackageRecord>> {
    if candidates.len() <= 1 || ctx.assume_yes {
        return Ok((!candidates.is_empty()).then(|| candidates.swap_remove(0)));
    }

    let labels: Vec<String> = candidates
        .iter()
        .map(|p| {
            format!(
                "{} {} ({}, {})",
                p.name,
                p.version,
                p.source.as_deref().unwrap_or("-"),
                p.provider
            )
        })
        .collect();
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Select the package to {verb}"))
        .items(&labels)
        .default(0)
        .interact_opt()?;
    Ok(picked.map(|i| candidates.swap_remove(i)))
}

/// Print records as they stream in, then report how the session ended.
async fn drain(
    verb: &str,
    format: OutputFormat,
    mut session: StreamSession<PackageRecord>,
) -> Result<()> {
    let mut count = 0usize;
    while let Some(record) = session.next_record().await {
        count = count.saturating_add(1);
        match format {
            OutputFormat::Json => match serde_json::to_string(&record) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize record"),
            },
            OutputFormat::Pretty => println!(
                "{} {} {}",
                Theme::success(verb),
                record.name,
                record.version
            ),
        }
    }

    match session.state() {
        SessionState::Completed | SessionState::Running => {
            if count == 0 && format == OutputFormat::Pretty {
                println!("{}", Theme::info("Nothing to do"));
            }
            Ok(())
        },
        SessionState::Cancelled => {
            eprintln!("{}", Theme::warning("Cancelled"));
            Ok(())
        },
        SessionState::Faulted => bail!("{} failed after {count} record(s)", verb.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_target_carries_constraints() {
        let FindTarget::Name(request) = FindTarget::named("foo", Some("1.2.0"), None, Some("2.0")) else {
            panic!("expected a name target");
        };
        assert_eq!(request.name, "foo");
        assert_eq!(request.required_version, "1.2.0");
        assert_eq!(request.minimum_version, "");
        assert_eq!(request.maximum_version, "2.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn header_is_the_leading_bytes_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.bin");
        std::fs::write(&path, b"PK\x03\x04 and a long tail past the header").unwrap();
        let header = read_header(path.to_str().unwrap()).await;
        assert_eq!(header.len(), HEADER_LEN);
        assert!(header.starts_with(b"PK\x03\x04"));
        assert!(read_header(dir.path().join("missing").to_str().unwrap()).await.is_empty());
    }

    #[test]
    fn unconstrained_name_leaves_versions_empty() {
        let FindTarget::Name(request) = FindTarget::named("*", None, None, None) else {
            panic!("expected a name target");
        };
        assert_eq!(request, FindRequest::named("*"));
    }
}
