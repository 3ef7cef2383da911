//! Shell plugin execution
//!
//! A plugin runs its shell snippet on every cluster host matching its roles
//! that takes part in the current operation. Apart from `originally`, the
//! snippet runs from inside the cluster rootfs directory.

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::config::remote_rootfs_dir;
use kf_core::env::wrap_shell;
use kf_core::plugin::{Phase, PluginSpec};
use kf_core::traits::RemoteExecutor;
use kf_core::{Cluster, KfError, Role};

use crate::fanout::FanOut;
use crate::runtime::kubernetes::commands;

/// A shell action bound to lifecycle phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellPlugin {
    pub name: String,
    pub phases: Vec<Phase>,
    /// Roles the plugin is limited to, all hosts when empty
    pub on_roles: Vec<Role>,
    pub command: String,
}

impl From<&PluginSpec> for ShellPlugin {
    fn from(spec: &PluginSpec) -> Self {
        Self {
            name: spec.name.clone(),
            phases: spec.phases.clone(),
            on_roles: spec.on.clone(),
            command: spec.data.clone(),
        }
    }
}

impl ShellPlugin {
    /// Hosts of `cluster` the plugin runs on, restricted to `hosts`
    pub fn targets(&self, cluster: &Cluster, hosts: &[IpAddr]) -> Vec<IpAddr> {
        let candidates = if self.on_roles.is_empty() {
            cluster.all_ips()
        } else {
            let mut ips = Vec::new();
            for role in &self.on_roles {
                ips.extend(cluster.ips_by_role(*role));
            }
            kf_core::net::remove_duplicate(&ips)
        };
        candidates.into_iter().filter(|ip| hosts.contains(ip)).collect()
    }

    fn command_for(&self, cluster: &Cluster, phase: Phase) -> String {
        match phase {
            Phase::Originally => self.command.clone(),
            _ => commands::cd_and_exec(&remote_rootfs_dir(&cluster.name), &self.command),
        }
    }

    /// Run the plugin for `phase`; a no-op when it does not hook the phase
    pub async fn run(
        &self,
        executor: &Arc<dyn RemoteExecutor>,
        fanout: FanOut,
        cluster: &Cluster,
        hosts: &[IpAddr],
        phase: Phase,
    ) -> Result<(), KfError> {
        if !self.phases.contains(&phase) {
            return Ok(());
        }
        let targets = self.targets(cluster, hosts);
        let command = self.command_for(cluster, phase);
        let cluster = Arc::new(cluster.clone());

        let result = fanout
            .run(&targets, |host| {
                let executor = Arc::clone(executor);
                let wrapped = wrap_shell(&cluster, host, &command);
                async move {
                    executor.run(host, &wrapped).await?;
                    Ok::<(), KfError>(())
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("{} plugin '{}' ran on {:?}", phase, self.name, targets);
                Ok(())
            }
            Err(e) if phase == Phase::PreClean => {
                tracing::error!("{} plugin '{}' failed: {}", phase, self.name, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Every plugin declared for a cluster
#[derive(Clone)]
pub struct PluginRunner {
    executor: Arc<dyn RemoteExecutor>,
    fanout: FanOut,
    plugins: Vec<ShellPlugin>,
}

impl PluginRunner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, fanout: FanOut, specs: &[PluginSpec]) -> Self {
        Self {
            executor,
            fanout,
            plugins: specs.iter().map(ShellPlugin::from).collect(),
        }
    }

    /// Run the plugins hooking `phase` in declaration order
    pub async fn run(&self, cluster: &Cluster, hosts: &[IpAddr], phase: Phase) -> Result<(), KfError> {
        for plugin in &self.plugins {
            plugin
                .run(&self.executor, self.fanout, cluster, hosts, phase)
                .await?;
        }
        Ok(())
    }
}
