//! In-place version upgrade

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::error::ConfigError;
use kf_core::KfError;

use super::commands::{self, RESTART_KUBELET, UPGRADE_NODE};
use super::KubernetesRuntime;

impl KubernetesRuntime {
    /// Upgrade master-0, then the other masters in turn, then all workers
    pub(super) async fn upgrade_hosts(&self) -> Result<(), KfError> {
        let ctx = &self.ctx;
        let version = ctx
            .kubernetes_version()
            .ok_or_else(|| ConfigError::MissingField("kubernetes version in image metadata".into()))?;
        tracing::info!("Upgrading cluster {} to {}", ctx.cluster.name, version);

        let apply = vec![commands::upgrade_apply(&version), RESTART_KUBELET.to_string()];
        self.executor
            .run_all(ctx.master0, &apply)
            .await
            .map_err(|e| KfError::host(ctx.master0, e))?;

        let upgrade_node = Arc::new(vec![UPGRADE_NODE.to_string(), RESTART_KUBELET.to_string()]);
        let masters = ctx.masters();
        for &master in masters.iter().filter(|m| **m != ctx.master0) {
            self.executor
                .run_all(master, &upgrade_node)
                .await
                .map_err(|e| KfError::host(master, e))?;
        }

        self.fanout
            .run(&ctx.cluster.node_ips(), |node: IpAddr| {
                let executor = Arc::clone(&self.executor);
                let upgrade_node = Arc::clone(&upgrade_node);
                async move { executor.run_all(node, &upgrade_node).await.map_err(KfError::from) }
            })
            .await
    }
}
