//! Joining masters and workers

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::error::RemoteError;
use kf_core::traits::RemoteExecutor;
use kf_core::KfError;

use super::commands::{self, INSTALL_KUBECONFIG, LVSCARE_MANIFEST, ROUTE_OK, STATIC_POD_MKDIR};
use super::kubeadm::{parse_certificate_key, JoinToken, KubeadmConfig, DEFAULT_CGROUP_DRIVER};
use super::{lvscare, KubernetesRuntime, RuntimeContext};

/// Cgroup driver of the container runtime on `host`
///
/// Falls back to systemd when the host does not report one.
pub(super) async fn cgroup_driver(executor: &dyn RemoteExecutor, host: IpAddr) -> String {
    match executor.run(host, commands::CGROUP_DRIVER).await {
        Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
        Ok(_) => DEFAULT_CGROUP_DRIVER.to_string(),
        Err(e) => {
            tracing::warn!("{}: cannot detect cgroup driver ({}), using {}", host, e, DEFAULT_CGROUP_DRIVER);
            DEFAULT_CGROUP_DRIVER.to_string()
        }
    }
}

fn unexpected_output(host: IpAddr, command: &str, output: &str) -> KfError {
    RemoteError::ExecutionFailed {
        host,
        command: command.to_string(),
        reason: format!("unexpected output: {:?}", output.trim()),
    }
    .into()
}

impl KubernetesRuntime {
    /// Ask master-0 for fresh join credentials and cache them
    ///
    /// Control-plane joins also need the certificate key of re-uploaded
    /// control-plane certificates.
    async fn refresh_join_token(&self, with_certificate_key: bool) -> Result<JoinToken, KfError> {
        let master0 = self.ctx.master0;
        let mut cached = self.join_token.lock().await;

        let output = self.exec(master0, commands::TOKEN_CREATE).await?;
        let mut token = JoinToken::from_join_command(&output)
            .ok_or_else(|| unexpected_output(master0, commands::TOKEN_CREATE, &output))?;

        if with_certificate_key {
            let output = self.exec(master0, commands::UPLOAD_CERTS).await?;
            let key = parse_certificate_key(&output)
                .ok_or_else(|| unexpected_output(master0, commands::UPLOAD_CERTS, &output))?;
            token.certificate_key = Some(key);
        }

        tracing::debug!("Fetched join token from {}", master0);
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Join control-plane hosts one at a time
    pub(super) async fn add_masters(&self, masters: &[IpAddr]) -> Result<(), KfError> {
        if masters.is_empty() {
            return Ok(());
        }
        let ctx = &self.ctx;
        self.wait_ready(masters).await?;
        self.send_registry_cert(masters).await?;
        let config = ctx.kubeadm_config()?;

        for &master in masters {
            tracing::info!("Start to join {} as master", master);
            let token = self.refresh_join_token(true).await?;
            let cgroup = cgroup_driver(self.executor.as_ref(), master).await;
            let document =
                config.join_master_document(&token, &ctx.master0_endpoint(), master, &cgroup)?;
            let join = vec![
                ctx.registry_hosts_and_login(),
                commands::write_file(&commands::kubeadm_config_path(&ctx.rootfs), &document),
                commands::add_etc_hosts(ctx.master0, ctx.api_server_domain()),
                commands::kubeadm_join(&ctx.rootfs, ctx.vlog()),
                commands::remove_etc_hosts(ctx.api_server_domain()),
                commands::add_etc_hosts(master, ctx.api_server_domain()),
                INSTALL_KUBECONFIG.to_string(),
            ];
            self.executor
                .run_all(master, &join)
                .await
                .map_err(|e| KfError::host(master, e))?;
            tracing::info!("Succeeded in joining {} as master", master);
        }
        Ok(())
    }

    /// Join workers concurrently
    pub(super) async fn add_nodes(&self, nodes: &[IpAddr]) -> Result<(), KfError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let ctx = &self.ctx;
        let config = ctx.kubeadm_config()?;
        self.wait_ready(nodes).await?;
        self.send_registry_cert(nodes).await?;
        let token = self.refresh_join_token(false).await?;

        let masters = ctx.masters();
        let manifest =
            lvscare::static_pod_yaml(ctx.vip(), &masters, &lvscare::image(&ctx.registry.repo()))?;
        let job = Arc::new(NodeJoin {
            ctx: Arc::clone(ctx),
            executor: Arc::clone(&self.executor),
            config,
            token,
            registry: ctx.registry_hosts_and_login(),
            ipvs: commands::add_ipvs(ctx.vip(), &masters),
            lvscare: commands::write_file(LVSCARE_MANIFEST, &manifest),
        });

        self.fanout
            .run(nodes, |node| {
                let job = Arc::clone(&job);
                async move { job.join(node).await }
            })
            .await
    }
}

/// Everything a single worker join needs, shared by all tasks
struct NodeJoin {
    ctx: Arc<RuntimeContext>,
    executor: Arc<dyn RemoteExecutor>,
    config: KubeadmConfig,
    token: JoinToken,
    registry: String,
    ipvs: String,
    lvscare: String,
}

impl NodeJoin {
    async fn join(&self, node: IpAddr) -> Result<(), KfError> {
        tracing::info!("Start to join {} as worker", node);
        self.ensure_vip_route(node).await?;

        let cgroup = cgroup_driver(self.executor.as_ref(), node).await;
        let document =
            self.config
                .join_node_document(&self.token, &self.ctx.vip_endpoint(), &cgroup)?;
        let join = vec![
            self.registry.clone(),
            commands::write_file(&commands::kubeadm_config_path(&self.ctx.rootfs), &document),
            commands::add_etc_hosts(self.ctx.vip(), self.ctx.api_server_domain()),
            self.ipvs.clone(),
            commands::kubeadm_join(&self.ctx.rootfs, self.ctx.vlog()),
            STATIC_POD_MKDIR.to_string(),
            self.lvscare.clone(),
        ];
        self.executor.run_all(node, &join).await?;
        tracing::info!("Succeeded in joining {} as worker", node);
        Ok(())
    }

    /// Hosts on another network need an explicit route to the VIP
    async fn ensure_vip_route(&self, node: IpAddr) -> Result<(), KfError> {
        let check = self.executor.run(node, &commands::check_route(node)).await?;
        if check.trim() == ROUTE_OK {
            return Ok(());
        }
        tracing::debug!("{} needs a route to the VIP", node);
        self.executor
            .run(node, &commands::add_route(self.ctx.vip(), node))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::runtime::{ClusterRuntime, RuntimeState};
    use kf_core::KfError;

    #[tokio::test]
    async fn test_join_nodes_runs_sequence_in_order() {
        let h = harness(cluster(), true, false);
        let node = ip("10.0.0.20");
        h.mock.respond_on(node, "docker info", "cgroupfs\n");

        h.runtime.join_nodes(&[node]).await.unwrap();

        let commands = h.mock.commands_for(node);
        let order = [
            "route check --host 10.0.0.20",
            "docker info",
            "10.0.0.1 sea.hub",
            "kubeadm.yml <<'KFORGE_EOF'",
            "10.103.97.2 apiserver.cluster.local",
            "kf-util ipvs --vs 10.103.97.2:6443 --rs 10.0.0.1:6443 --rs 10.0.0.2:6443",
            "kubeadm join --config=",
            "mkdir -p /etc/kubernetes/manifests",
            "kube-lvscare.yaml",
        ];
        let mut last = 0;
        for step in order {
            let at = commands[last..]
                .iter()
                .position(|c| c.contains(step))
                .unwrap_or_else(|| panic!("{} missing or out of order in {:?}", step, commands));
            last += at + 1;
        }
        let config = commands.iter().find(|c| c.contains("JoinConfiguration")).unwrap();
        assert!(config.contains("cgroupDriver: cgroupfs"));
        assert!(config.contains("apiServerEndpoint: 10.103.97.2:6443"));
        assert!(!h.mock.ran(node, "route add"));
        assert_eq!(h.certs.sent.lock().unwrap()[0], vec![node]);
        assert_eq!(h.runtime.state(), RuntimeState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_node_on_other_network_gets_vip_route() {
        let h = harness(cluster(), true, false);
        let node = ip("10.1.0.5");
        h.mock.respond_on(node, "route check", "route missing");

        h.runtime.join_nodes(&[node]).await.unwrap();
        assert!(h.mock.ran(node, "kf-util route add --host 10.103.97.2 --gateway 10.1.0.5"));
    }

    #[tokio::test]
    async fn test_one_failing_node_does_not_stop_others() {
        let h = harness(cluster(), true, false);
        let (a, b, c) = (ip("10.0.0.21"), ip("10.0.0.22"), ip("10.0.0.23"));
        h.mock.fail_on(b, "kubeadm join");

        let err = h.runtime.join_nodes(&[a, b, c]).await.unwrap_err();
        assert_eq!(err.failed_host(), Some(b));
        assert!(h.mock.ran(a, "kube-lvscare.yaml"));
        assert!(h.mock.ran(c, "kube-lvscare.yaml"));
        assert!(!h.mock.ran(b, "kube-lvscare.yaml"));
        assert_eq!(h.runtime.state(), RuntimeState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_masters_join_one_at_a_time_with_fresh_keys() {
        let h = harness(cluster(), true, false);
        let (m3, m4) = (ip("10.0.0.3"), ip("10.0.0.4"));

        h.runtime.join_masters(&[m3, m4]).await.unwrap();

        let master0 = h.mock.commands_for(ip("10.0.0.1"));
        assert_eq!(master0.iter().filter(|c| c.contains("upload-certs")).count(), 2);
        let joins: Vec<_> = h
            .mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                kf_core::mock::Call::Run { host, command } if command.starts_with("kubeadm join") => {
                    Some(host)
                }
                _ => None,
            })
            .collect();
        assert_eq!(joins, vec![m3, m4]);

        let m3_commands = h.mock.commands_for(m3);
        let join = m3_commands.iter().position(|c| c.starts_with("kubeadm join")).unwrap();
        assert!(m3_commands[join - 1].contains("10.0.0.1 apiserver.cluster.local"));
        assert!(m3_commands[join + 2].contains("10.0.0.3 apiserver.cluster.local"));
        assert!(m3_commands.iter().any(|c| c.contains("certificateKey: cccc")));
    }

    #[tokio::test]
    async fn test_unparseable_token_fails_join() {
        let h = harness(cluster(), true, false);
        h.mock.respond_on(ip("10.0.0.1"), "token create", "error: unauthorized");

        let err = h.runtime.join_nodes(&[ip("10.0.0.20")]).await.unwrap_err();
        assert!(matches!(err.root(), KfError::Remote(_)));
        assert!(!h.mock.ran(ip("10.0.0.20"), "kubeadm join"));
    }
}
