//! `kforge alpha` subcommands

use anyhow::{Context as _, Result};
use kf_core::Role;
use kf_orchestrator::alpha;
use kf_orchestrator::prune::pruners;
use kf_orchestrator::{FanOut, Services};

use crate::context::Context;
use crate::output::{format_exec_results, print_info, print_success};

/// Add subject alternative names to the API server certificate
pub async fn cert_command(ctx: &Context, name: Option<&str>, alt_names: &[String]) -> Result<()> {
    let name = ctx.cluster_name(name)?;
    let current = ctx.current_cluster(&name)?;
    let services = Services::over_ssh(&current.cluster, None, &ctx.data, &ctx.config)?;

    alpha::update_cert_sans(
        &services.executor,
        FanOut::with_limit(ctx.config.max_parallel),
        &current.cluster,
        alt_names,
    )
    .await
    .with_context(|| format!("Failed to update certificates of cluster {}", name))?;

    print_success(&format!("Added {} to the API server certificate", alt_names.join(",")));
    Ok(())
}

/// Run a shell command on the hosts carrying any of `roles`
pub async fn exec_command(
    ctx: &Context,
    name: Option<&str>,
    roles: &[String],
    command: &str,
) -> Result<()> {
    let roles = roles
        .iter()
        .map(|r| r.parse::<Role>())
        .collect::<Result<Vec<_>, _>>()?;
    let name = ctx.cluster_name(name)?;
    let current = ctx.current_cluster(&name)?;
    let hosts = alpha::hosts_by_roles(&current.cluster, &roles)?;
    let services = Services::over_ssh(&current.cluster, None, &ctx.data, &ctx.config)?;

    let results = alpha::exec_command(
        &services.executor,
        FanOut::with_limit(ctx.config.max_parallel),
        &hosts,
        command,
    )
    .await;
    println!("{}", format_exec_results(&results));

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("Command failed on {} of {} host(s)", failed, results.len());
    }
    Ok(())
}

/// Remove leftovers of deleted clusters from the data directory
pub fn prune_command(ctx: &Context) -> Result<()> {
    let mut total = 0;
    for pruner in pruners(&ctx.data) {
        print_info(pruner.message());
        let removed = pruner
            .prune()
            .with_context(|| format!("Failed to prune {}", ctx.data.root().display()))?;
        total += removed.len();
    }
    print_success(&format!("Pruned {} item(s)", total));
    Ok(())
}
