//! Removing masters and workers

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

use kf_core::error::ScaleError;
use kf_core::KfError;

use super::commands::{self, HOSTNAME, LVSCARE_MANIFEST, REMOVE_KUBECONFIG};
use super::{lvscare, KubernetesRuntime, RuntimeContext};

impl RuntimeContext {
    /// Commands that strip a host of everything the cluster put there
    pub fn cleanup_commands(&self) -> Vec<String> {
        let mut cleanup = vec![commands::clean_host(self.vlog())];
        cleanup.extend(self.registry_cleanup());
        cleanup.push(commands::remove_etc_hosts(self.api_server_domain()));
        cleanup.push(REMOVE_KUBECONFIG.to_string());
        cleanup
    }
}

impl KubernetesRuntime {
    /// Remove workers: clean them concurrently, then deregister them
    pub(super) async fn remove_nodes(&self, nodes: &[IpAddr]) -> Result<(), KfError> {
        self.confirm_delete("nodes", nodes)?;

        let hostnames: Arc<DashMap<IpAddr, String>> = Arc::new(DashMap::new());
        let cleanup = Arc::new(self.ctx.cleanup_commands());
        let vip = self.ctx.vip();

        let cleaned = self
            .fanout
            .run(nodes, |node| {
                let executor = Arc::clone(&self.executor);
                let hostnames = Arc::clone(&hostnames);
                let cleanup = Arc::clone(&cleanup);
                async move {
                    tracing::info!("Start to delete worker {}", node);
                    let hostname = executor.run(node, HOSTNAME).await?;
                    hostnames.insert(node, hostname.trim().to_string());
                    executor.run_all(node, &cleanup).await?;
                    executor.run(node, &commands::delete_route(vip, node)).await?;
                    tracing::info!("Succeeded in cleaning worker {}", node);
                    Ok::<(), KfError>(())
                }
            })
            .await;

        let mut first = cleaned.err();
        for node in nodes {
            let Some(hostname) = hostnames.get(node).map(|h| h.value().clone()) else {
                continue;
            };
            if let Err(e) = self.deregister(&hostname).await {
                tracing::error!("failed to deregister {} ({}): {}", node, hostname, e);
                first.get_or_insert(KfError::host(*node, e));
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove control-plane hosts one at a time
    pub(super) async fn remove_masters(&self, masters: &[IpAddr]) -> Result<(), KfError> {
        let ctx = &self.ctx;
        if masters.contains(&ctx.master0) {
            return Err(ScaleError::ProtectedMasterRemoval(ctx.master0).into());
        }
        self.confirm_delete("masters", masters)?;

        let cleanup = ctx.cleanup_commands();
        for &master in masters {
            tracing::info!("Start to delete master {}", master);
            let hostname = self
                .exec(master, HOSTNAME)
                .await
                .map_err(|e| KfError::host(master, e))?;
            self.executor
                .run_all(master, &cleanup)
                .await
                .map_err(|e| KfError::host(master, e))?;
            self.deregister(hostname.trim())
                .await
                .map_err(|e| KfError::host(master, e))?;
            tracing::info!("Succeeded in deleting master {}", master);
        }

        let remaining: Vec<IpAddr> = ctx
            .masters()
            .into_iter()
            .filter(|m| !masters.contains(m))
            .collect();
        self.rewrite_lvscare(&remaining).await
    }

    /// `kubectl delete node` through master-0
    async fn deregister(&self, hostname: &str) -> Result<(), KfError> {
        self.exec(self.ctx.master0, &commands::kubectl_delete_node(hostname))
            .await
            .map(|_| ())
    }

    /// Point every worker's lvscare at `masters`
    async fn rewrite_lvscare(&self, masters: &[IpAddr]) -> Result<(), KfError> {
        let workers = self.ctx.cluster.node_ips();
        if workers.is_empty() {
            return Ok(());
        }
        let image = lvscare::image(&self.ctx.registry.repo());
        let manifest = lvscare::static_pod_yaml(self.ctx.vip(), masters, &image)?;
        let command = Arc::new(commands::write_file(LVSCARE_MANIFEST, &manifest));

        self.fanout
            .run(&workers, |node| {
                let executor = Arc::clone(&self.executor);
                let command = Arc::clone(&command);
                async move {
                    executor.run(node, &command).await?;
                    Ok::<(), KfError>(())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::runtime::{ClusterRuntime, RuntimeState};
    use kf_core::error::ScaleError;
    use kf_core::KfError;

    #[tokio::test]
    async fn test_delete_nodes_cleans_then_deregisters() {
        let h = harness(cluster(), true, true);
        let (a, b) = (ip("10.0.0.10"), ip("10.0.0.11"));
        h.mock
            .respond_on(a, "hostname", "worker-a\n")
            .respond_on(b, "hostname", "worker-b\n");

        h.runtime.delete_nodes(&[a, b]).await.unwrap();

        for node in [a, b] {
            let commands = h.mock.commands_for(node);
            assert_eq!(commands[0], "hostname");
            assert!(commands[1].contains("kubeadm reset -f"));
            assert!(commands.last().unwrap().contains("route del --host 10.103.97.2"));
        }
        let master0 = h.mock.commands_for(ip("10.0.0.1"));
        assert!(master0.contains(&"kubectl delete node worker-a".to_string()));
        assert!(master0.contains(&"kubectl delete node worker-b".to_string()));
        assert_eq!(h.runtime.state(), RuntimeState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_cleanup_failure_still_deregisters_recorded_nodes() {
        let h = harness(cluster(), true, true);
        let (a, b) = (ip("10.0.0.10"), ip("10.0.0.11"));
        h.mock
            .respond_on(a, "hostname", "worker-a")
            .respond_on(b, "hostname", "worker-b")
            .fail_on(a, "kubeadm reset");

        let err = h.runtime.delete_nodes(&[a, b]).await.unwrap_err();
        assert_eq!(err.failed_host(), Some(a));
        let master0 = h.mock.commands_for(ip("10.0.0.1"));
        assert!(master0.contains(&"kubectl delete node worker-a".to_string()));
        assert!(master0.contains(&"kubectl delete node worker-b".to_string()));
    }

    #[tokio::test]
    async fn test_delete_without_confirmation_is_aborted() {
        let h = harness(cluster(), true, false);
        let err = h.runtime.delete_nodes(&[ip("10.0.0.10")]).await.unwrap_err();
        assert!(matches!(err, KfError::Aborted(_)));
        assert!(h.mock.calls().is_empty());
        assert_eq!(h.runtime.state(), RuntimeState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_delete_master0_is_rejected() {
        let h = harness(cluster(), true, true);
        let err = h.runtime.delete_masters(&[ip("10.0.0.1")]).await.unwrap_err();
        assert!(matches!(err, KfError::Scale(ScaleError::ProtectedMasterRemoval(_))));
        assert!(h.mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_master_repoints_lvscare_on_workers() {
        let h = harness(cluster(), true, true);
        let m2 = ip("10.0.0.2");
        h.mock.respond_on(m2, "hostname", "master-2");

        h.runtime.delete_masters(&[m2]).await.unwrap();

        assert!(h.mock.ran(ip("10.0.0.1"), "kubectl delete node master-2"));
        for worker in ["10.0.0.10", "10.0.0.11"] {
            let commands = h.mock.commands_for(ip(worker));
            assert_eq!(commands.len(), 1);
            assert!(commands[0].contains("10.0.0.1:6443"));
            assert!(!commands[0].contains("10.0.0.2:6443"));
        }
    }
}
