//! Control-plane bootstrap

use kf_core::KfError;

use super::commands::{self, ADMIN_KUBECONFIG, INSTALL_KUBECONFIG};
use super::join::cgroup_driver;
use super::{local, KubernetesRuntime};

impl KubernetesRuntime {
    /// Bring up master-0, then join every other host
    pub(super) async fn bootstrap(&self) -> Result<(), KfError> {
        let ctx = &self.ctx;
        let master0 = ctx.master0;

        self.wait_ready(&ctx.cluster.all_ips()).await?;
        self.generate_registry_cert().await?;
        self.send_registry_cert(&ctx.cluster.all_ips()).await?;
        self.start_registry().await?;

        tracing::info!("Initializing control plane on {}", master0);
        let config = ctx.kubeadm_config()?;
        let cgroup = cgroup_driver(self.executor.as_ref(), master0).await;
        let document = config.init_document(master0, &cgroup)?;
        let init = vec![
            commands::write_file(&commands::kubeadm_config_path(&ctx.rootfs), &document),
            commands::add_etc_hosts(master0, ctx.api_server_domain()),
            commands::kubeadm_init(&ctx.rootfs, ctx.vlog()),
            INSTALL_KUBECONFIG.to_string(),
        ];
        self.executor
            .run_all(master0, &init)
            .await
            .map_err(|e| KfError::host(master0, e))?;

        self.executor
            .fetch(master0, ADMIN_KUBECONFIG, &ctx.config.kubeconfig_path)
            .await
            .map_err(|e| KfError::host(master0, e))?;
        local::ensure_hosts_entry(&ctx.config.hosts_file, master0, ctx.api_server_domain()).await?;
        tracing::info!(
            "Control plane ready, kubeconfig at {}",
            ctx.config.kubeconfig_path.display()
        );

        let masters = ctx.masters();
        self.add_masters(&masters[1..]).await?;
        self.add_nodes(&ctx.cluster.node_ips()).await
    }
}
