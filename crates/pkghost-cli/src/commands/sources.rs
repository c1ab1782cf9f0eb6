//! `pkghost sources` - list, add and remove package sources.

use anyhow::{Result, bail};
use futures::future::join_all;
use pkghost_providers::SessionState;

use super::CommandContext;
use crate::formatter::print_sources;
use crate::theme::Theme;

pub(crate) async fn list_sources(ctx: &CommandContext<'_>, provider: Option<&str>) -> Result<()> {
    let providers = ctx.providers(provider)?;
    let sources: Vec<_> = join_all(
        providers
            .iter()
            .map(|p| p.package_sources(ctx.router).collect_all()),
    )
    .await
    .into_iter()
    .flatten()
    .collect();
    print_sources(&sources, ctx.format);
    Ok(())
}

pub(crate) async fn add_source(
    ctx: &CommandContext<'_>,
    provider: &str,
    name: &str,
    location: &str,
    trusted: bool,
) -> Result<()> {
    let Some(provider) = ctx.host.provider(provider) else {
        bail!("no provider named '{provider}' is loaded");
    };
    if !provider.is_valid_package_source(location, ctx.router) {
        tracing::debug!(provider = provider.name(), location, "Provider did not validate source location");
    }

    let session = provider.add_package_source(name, location, trusted, ctx.router);
    let added = session.collect_all().await;
    if added.is_empty() {
        bail!("provider '{}' did not add source '{name}'", provider.name());
    }
    print_sources(&added, ctx.format);
    Ok(())
}

pub(crate) async fn remove_source(ctx: &CommandContext<'_>, provider: &str, name: &str) -> Result<()> {
    let Some(provider) = ctx.host.provider(provider) else {
        bail!("no provider named '{provider}' is loaded");
    };

    let mut session = provider.remove_package_source(name, ctx.router);
    let mut removed = 0usize;
    while session.next_record().await.is_some() {
        removed = removed.saturating_add(1);
    }
    match (session.state(), removed) {
        (SessionState::Faulted, _) => bail!("removing source '{name}' failed"),
        (_, 0) => bail!("provider '{}' has no source named '{name}'", provider.name()),
        _ => {
            println!("{}", Theme::success(&format!("Removed source '{name}'")));
            Ok(())
        },
    }
}
