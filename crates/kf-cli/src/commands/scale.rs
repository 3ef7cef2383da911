//! Join and delete hosts of an applied cluster

use anyhow::{Context as _, Result};
use clap::Args;
use kf_orchestrator::{scale, Applier, ScaleRequest, Services};

use super::{stdin_confirm, SshArgs};
use crate::context::Context;
use crate::output::{print_info, print_success};

/// Hosts to add or remove
#[derive(Args, Debug, Clone, Default)]
pub struct ScaleArgs {
    /// Masters: `ip1,ip2` or `first-last`
    #[arg(short, long)]
    pub masters: Option<String>,

    /// Workers: `ip1,ip2` or `first-last`
    #[arg(short, long)]
    pub nodes: Option<String>,

    /// Cluster to scale, defaults to the only applied cluster
    #[arg(short = 'c', long = "cluster-name")]
    pub cluster: Option<String>,

    /// `KEY=VALUE` appended to the cluster env
    #[arg(short, long = "env")]
    pub env: Vec<String>,
}

enum Direction {
    Join,
    Delete,
}

/// Execute the join command
pub async fn join_command(ctx: &Context, args: &ScaleArgs, ssh: &SshArgs) -> Result<()> {
    let request = ScaleRequest {
        masters: args.masters.clone().unwrap_or_default(),
        nodes: args.nodes.clone().unwrap_or_default(),
        ssh: Some(ssh.to_config()),
        env: args.env.clone(),
    };
    rescale(ctx, args.cluster.as_deref(), &request, Direction::Join, false).await
}

/// Execute the delete command for individual hosts
pub async fn delete_command(ctx: &Context, args: &ScaleArgs, force: bool) -> Result<()> {
    let request = ScaleRequest {
        masters: args.masters.clone().unwrap_or_default(),
        nodes: args.nodes.clone().unwrap_or_default(),
        ssh: None,
        env: args.env.clone(),
    };
    rescale(ctx, args.cluster.as_deref(), &request, Direction::Delete, force).await
}

async fn rescale(
    ctx: &Context,
    name: Option<&str>,
    request: &ScaleRequest,
    direction: Direction,
    force: bool,
) -> Result<()> {
    let name = ctx.cluster_name(name)?;
    let current = ctx.current_cluster(&name)?;

    let mut desired = current.clone();
    match direction {
        Direction::Join => scale::join(&mut desired.cluster, request),
        Direction::Delete => scale::delete(&mut desired.cluster, request),
    }
    .with_context(|| format!("Rejected scale request for cluster {}", name))?;

    let mut config = ctx.config.clone();
    config.force_delete |= force;
    let services = Services::over_ssh(&desired.cluster, Some(&current.cluster), &ctx.data, &config)?;

    print_info(&format!("Scaling cluster {}", name));
    Applier::new(desired, ctx.data.clone(), config, services)
        .with_confirm(stdin_confirm())
        .apply()
        .await
        .with_context(|| format!("Failed to scale cluster {}", name))?;

    print_success(&format!("Cluster {} scaled", name));
    Ok(())
}
