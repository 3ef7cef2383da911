//! Apply and delete whole clusters

use std::path::Path;

use anyhow::{Context as _, Result};
use kf_core::cluster::CLUSTERFILE_ANNOTATION;
use kf_core::config::ClusterFile;
use kf_orchestrator::{Applier, Services};

use super::stdin_confirm;
use crate::context::Context;
use crate::output::{print_info, print_success, print_warning};

/// Execute the apply command
pub async fn apply_command(ctx: &Context, file: &Path, force: bool) -> Result<()> {
    let mut desired = ClusterFile::load(file)
        .with_context(|| format!("Failed to load Clusterfile {}", file.display()))?;
    desired
        .cluster
        .set_annotation(CLUSTERFILE_ANNOTATION, file.display().to_string());

    let mut config = ctx.config.clone();
    config.force_delete |= force;

    let name = desired.cluster.name.clone();
    let current = ctx.data.load_cluster(&name)?;
    let services = Services::over_ssh(
        &desired.cluster,
        current.as_ref().map(|c| &c.cluster),
        &ctx.data,
        &config,
    )?;

    print_info(&format!("Applying cluster {}", name));
    Applier::new(desired, ctx.data.clone(), config, services)
        .with_confirm(stdin_confirm())
        .apply()
        .await
        .with_context(|| format!("Failed to apply cluster {}", name))?;

    print_success(&format!("Cluster {} applied", name));
    Ok(())
}

/// Execute `delete --all`: tear the whole cluster down
pub async fn delete_cluster_command(ctx: &Context, name: Option<&str>, force: bool) -> Result<()> {
    let name = ctx.cluster_name(name)?;
    let current = ctx.current_cluster(&name)?;

    if !(force || ctx.config.force_delete)
        && !crate::output::confirm(&format!(
            "Delete cluster {} and reset all {} host(s)?",
            name,
            current.cluster.all_ips().len()
        ))
    {
        print_warning("Aborted");
        return Ok(());
    }

    let services = Services::over_ssh(&current.cluster, None, &ctx.data, &ctx.config)?;
    let mut config = ctx.config.clone();
    config.force_delete = true;

    Applier::new(current, ctx.data.clone(), config, services)
        .delete()
        .await
        .with_context(|| format!("Failed to delete cluster {}", name))?;

    print_success(&format!("Cluster {} deleted", name));
    Ok(())
}
