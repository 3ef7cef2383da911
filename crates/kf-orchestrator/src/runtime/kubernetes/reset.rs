//! Cluster teardown
//!
//! Host cleanup is best effort: failures are logged and the teardown goes
//! on. Route and registry removal failures are returned.

use std::sync::Arc;

use kf_core::KfError;

use super::commands;
use super::{local, KubernetesRuntime};

impl KubernetesRuntime {
    pub(super) async fn teardown(&self) -> Result<(), KfError> {
        let ctx = &self.ctx;
        let nodes = ctx.cluster.node_ips();
        let masters = ctx.masters();
        let cleanup = Arc::new(ctx.cleanup_commands());

        let results = self
            .fanout
            .collect(&nodes, |node| {
                let executor = Arc::clone(&self.executor);
                let cleanup = Arc::clone(&cleanup);
                async move { executor.run_all(node, &cleanup).await.map_err(KfError::from) }
            })
            .await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            tracing::error!("{} of {} workers were not cleaned", failed, nodes.len());
        }

        for &master in &masters {
            if let Err(e) = self.executor.run_all(master, &cleanup).await {
                tracing::error!("failed to reset master {}: {}", master, e);
            }
        }

        local::remove_hosts_entries(&ctx.config.hosts_file, ctx.api_server_domain()).await?;

        for &node in &nodes {
            self.exec(node, &commands::delete_route(ctx.vip(), node))
                .await
                .map_err(|e| KfError::host(node, e))?;
        }
        self.delete_registry().await?;
        tracing::info!("Cluster {} reset", ctx.cluster.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::runtime::{ClusterRuntime, RuntimeState};

    #[tokio::test]
    async fn test_reset_tolerates_host_cleanup_failures() {
        let h = harness(cluster(), true, false);
        std::fs::write(
            h.dir.path().join("hosts"),
            "127.0.0.1 localhost\n10.0.0.1 apiserver.cluster.local\n",
        )
        .unwrap();
        h.mock
            .fail_on(ip("10.0.0.10"), "kubeadm reset")
            .fail_on(ip("10.0.0.2"), "kubeadm reset");

        h.runtime.reset().await.unwrap();

        assert_eq!(h.runtime.state(), RuntimeState::Reset);
        assert!(h.mock.ran(ip("10.0.0.11"), "rm -rf ~/.kube/"));
        assert!(h.mock.ran(ip("10.0.0.1"), "kubeadm reset -f"));
        assert!(h.mock.ran(ip("10.0.0.10"), "route del --host 10.103.97.2 --gateway 10.0.0.10"));
        assert!(h.mock.ran(ip("10.0.0.1"), "docker rm -f kforge-registry"));
        assert_eq!(
            std::fs::read_to_string(h.dir.path().join("hosts")).unwrap(),
            "127.0.0.1 localhost\n"
        );
        assert!(h.runtime.join_nodes(&[ip("10.0.0.30")]).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_fails_when_registry_removal_fails() {
        let h = harness(cluster(), true, false);
        h.mock.fail_on(ip("10.0.0.1"), "kforge-registry");

        assert!(h.runtime.reset().await.is_err());
        assert_eq!(h.runtime.state(), RuntimeState::Bootstrapped);
    }
}
