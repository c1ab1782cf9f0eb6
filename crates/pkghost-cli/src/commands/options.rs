//! `pkghost options` - dynamic options a provider accepts.

use anyhow::Result;
use futures::future::join_all;
use pkghost_providers::OptionCategory;

use super::CommandContext;
use crate::formatter::print_options;

pub(crate) async fn list_options(
    ctx: &CommandContext<'_>,
    provider: Option<&str>,
    category: OptionCategory,
) -> Result<()> {
    let providers = ctx.providers(provider)?;
    let options: Vec<_> = join_all(
        providers
            .iter()
            .map(|p| p.dynamic_options(category, ctx.router).collect_all()),
    )
    .await
    .into_iter()
    .flatten()
    .collect();
    print_options(&options, ctx.format);
    Ok(())
}
