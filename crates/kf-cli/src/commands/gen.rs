//! Take over a cluster that was installed by other means

use std::net::IpAddr;

use anyhow::{Context as _, Result};
use kf_core::{Cluster, Host, Role};
use kf_orchestrator::applier::{generate_cluster, GenerateArgs};
use kf_orchestrator::{GenerateProcessor, Services};
use kf_ssh::SshExecutor;

use super::SshArgs;
use crate::context::Context;
use crate::output::{print_info, print_success};

/// Execute the gen command
pub async fn gen_command(
    ctx: &Context,
    name: &str,
    image: &str,
    master: IpAddr,
    ssh: &SshArgs,
) -> Result<()> {
    let args = GenerateArgs {
        name: name.to_string(),
        image: image.to_string(),
        ssh: ssh.to_config(),
    };

    // Only the given master is known until its node list is read
    let mut seed = Cluster::new(name, image);
    seed.ssh = args.ssh.clone();
    seed.hosts.push(Host::new(vec![master], Role::Master));
    let seed_ssh = SshExecutor::new(&seed);

    print_info(&format!("Reading nodes of the cluster behind {}", master));
    let cluster = generate_cluster(&seed_ssh, master, &args)
        .await
        .with_context(|| format!("Failed to describe the cluster behind {}", master))?;

    let services = Services::over_ssh(&cluster, None, &ctx.data, &ctx.config)?;
    GenerateProcessor::new(ctx.data.clone(), ctx.config.clone(), services)
        .run(&cluster)
        .await
        .with_context(|| format!("Failed to take over cluster {}", name))?;

    print_success(&format!(
        "Cluster {} is now managed ({} master(s), {} worker(s))",
        name,
        cluster.master_ips().len(),
        cluster.node_ips().len()
    ));
    Ok(())
}
