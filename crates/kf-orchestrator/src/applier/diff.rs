//! Difference between the applied and the desired cluster

use std::net::IpAddr;

use kf_core::net::subtract;
use kf_core::Cluster;

/// What an update has to do to reach the desired topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDiff {
    pub masters_to_add: Vec<IpAddr>,
    pub nodes_to_add: Vec<IpAddr>,
    pub masters_to_delete: Vec<IpAddr>,
    pub nodes_to_delete: Vec<IpAddr>,
    pub image_changed: bool,
}

impl ClusterDiff {
    pub fn between(current: &Cluster, desired: &Cluster) -> Self {
        let (current_masters, desired_masters) = (current.master_ips(), desired.master_ips());
        let (current_nodes, desired_nodes) = (current.node_ips(), desired.node_ips());
        Self {
            masters_to_add: subtract(&desired_masters, &current_masters),
            nodes_to_add: subtract(&desired_nodes, &current_nodes),
            masters_to_delete: subtract(&current_masters, &desired_masters),
            nodes_to_delete: subtract(&current_nodes, &desired_nodes),
            image_changed: current.image != desired.image,
        }
    }

    /// Hosts that need the rootfs
    pub fn added(&self) -> Vec<IpAddr> {
        let mut hosts = self.masters_to_add.clone();
        hosts.extend(&self.nodes_to_add);
        hosts
    }

    /// Hosts leaving the cluster
    pub fn deleted(&self) -> Vec<IpAddr> {
        let mut hosts = self.masters_to_delete.clone();
        hosts.extend(&self.nodes_to_delete);
        hosts
    }

    pub fn is_empty(&self) -> bool {
        !self.image_changed && self.added().is_empty() && self.deleted().is_empty()
    }
}
