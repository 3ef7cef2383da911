//! Build a Cluster from a running Kubernetes cluster

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

use kf_core::error::ConfigError;
use kf_core::traits::RemoteExecutor;
use kf_core::{Cluster, Host, KfError, Role, SshConfig};

/// Labels marking a control-plane node
pub const MASTER_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

const LIST_NODES: &str = "kubectl get nodes -o json";

/// Identity of the generated cluster
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub name: String,
    pub image: String,
    pub ssh: SshConfig,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    metadata: NodeMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct NodeMeta {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

impl Node {
    fn is_master(&self) -> bool {
        MASTER_LABELS
            .iter()
            .any(|label| self.metadata.labels.contains_key(*label))
    }

    fn internal_ip(&self) -> Option<IpAddr> {
        self.status
            .addresses
            .iter()
            .filter(|a| a.kind == "InternalIP")
            .find_map(|a| a.address.parse().ok())
    }
}

/// Split a `kubectl get nodes -o json` listing into masters and workers
fn parse_nodes(json: &str) -> Result<(Vec<IpAddr>, Vec<IpAddr>), KfError> {
    let list: NodeList = serde_json::from_str(json)
        .map_err(|e| ConfigError::Invalid(format!("unreadable node list: {}", e)))?;
    let (mut masters, mut nodes) = (Vec::new(), Vec::new());
    for node in &list.items {
        let Some(ip) = node.internal_ip() else {
            tracing::warn!("Skipping node without an InternalIP address");
            continue;
        };
        if node.is_master() {
            masters.push(ip);
        } else {
            nodes.push(ip);
        }
    }
    Ok((masters, nodes))
}

/// Describe the cluster `master` belongs to
pub async fn generate_cluster(
    executor: &dyn RemoteExecutor,
    master: IpAddr,
    args: &GenerateArgs,
) -> Result<Cluster, KfError> {
    let listing = executor
        .run(master, LIST_NODES)
        .await
        .map_err(|e| KfError::host(master, e))?;
    let (masters, nodes) = parse_nodes(&listing)?;

    let mut cluster = Cluster::new(args.name.clone(), args.image.clone());
    cluster.ssh = args.ssh.clone();
    cluster.hosts.push(Host::new(masters, Role::Master));
    cluster.hosts.push(Host::new(nodes, Role::Node));
    cluster.validate()?;
    tracing::info!(
        "Generated cluster {} with {} master(s) and {} worker(s)",
        cluster.name,
        cluster.master_ips().len(),
        cluster.node_ips().len()
    );
    Ok(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::mock::MockExecutor;

    const NODES: &str = r#"{
      "items": [
        {"metadata": {"labels": {"node-role.kubernetes.io/control-plane": ""}},
         "status": {"addresses": [{"type": "Hostname", "address": "m1"},
                                  {"type": "InternalIP", "address": "10.0.0.1"}]}},
        {"metadata": {"labels": {"node-role.kubernetes.io/master": ""}},
         "status": {"addresses": [{"type": "InternalIP", "address": "10.0.0.2"}]}},
        {"metadata": {"labels": {"kubernetes.io/os": "linux"}},
         "status": {"addresses": [{"type": "InternalIP", "address": "10.0.0.10"}]}},
        {"metadata": {}, "status": {"addresses": [{"type": "Hostname", "address": "ghost"}]}}
      ]
    }"#;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_nodes_by_label() {
        let (masters, nodes) = parse_nodes(NODES).unwrap();
        assert_eq!(masters, vec![ip("10.0.0.1"), ip("10.0.0.2")]);
        assert_eq!(nodes, vec![ip("10.0.0.10")]);
        assert!(parse_nodes("not json").is_err());
    }

    #[tokio::test]
    async fn test_generate_cluster() {
        let mock = MockExecutor::new();
        mock.respond(LIST_NODES, NODES);
        let args = GenerateArgs {
            name: "imported".into(),
            image: "kubernetes:v1.22.8".into(),
            ssh: SshConfig {
                password: Some("secret".into()),
                ..Default::default()
            },
        };

        let cluster = generate_cluster(&mock, ip("10.0.0.1"), &args).await.unwrap();
        assert_eq!(cluster.master0_ip(), Some(ip("10.0.0.1")));
        assert_eq!(cluster.node_ips(), vec![ip("10.0.0.10")]);
        assert_eq!(cluster.ssh.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_generate_without_masters_fails() {
        let mock = MockExecutor::new();
        mock.respond(LIST_NODES, r#"{"items": []}"#);
        let args = GenerateArgs {
            name: "imported".into(),
            ..Default::default()
        };
        assert!(generate_cluster(&mock, ip("10.0.0.1"), &args).await.is_err());
    }
}
