//! kubeadm configuration documents
//!
//! kubeadm reads a multi-document YAML file. The cluster-wide parts
//! (`ClusterConfiguration`, `KubeletConfiguration`) are merged once per
//! operation; the per-host parts are rendered for every host.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use kf_core::error::ConfigError;
use kf_core::KfError;

use super::commands::API_SERVER_PORT;

const KUBELET_API_VERSION: &str = "kubelet.config.k8s.io/v1beta1";
const DEFAULT_POD_SUBNET: &str = "100.64.0.0/10";
const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/22";
const DEFAULT_DNS_DOMAIN: &str = "cluster.local";

/// Cgroup driver used when a host does not report one
pub const DEFAULT_CGROUP_DRIVER: &str = "systemd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub advertise_address: String,
    pub bind_port: u16,
}

impl ApiEndpoint {
    fn on(ip: IpAddr) -> Self {
        Self {
            advertise_address: ip.to_string(),
            bind_port: API_SERVER_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri_socket: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfiguration {
    pub api_version: String,
    pub kind: String,
    pub local_api_endpoint: ApiEndpoint,
    #[serde(default)]
    pub node_registration: NodeRegistration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub pod_subnet: String,
    pub service_subnet: String,
    pub dns_domain: String,
}

impl Default for Networking {
    fn default() -> Self {
        Self {
            pod_subnet: DEFAULT_POD_SUBNET.to_string(),
            service_subnet: DEFAULT_SERVICE_SUBNET.to_string(),
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(rename = "certSANs", default)]
    pub cert_sans: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    pub api_version: String,
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    #[serde(default)]
    pub control_plane_endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,

    #[serde(default)]
    pub networking: Networking,

    #[serde(default)]
    pub api_server: ApiServer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapTokenDiscovery {
    pub api_server_endpoint: String,
    pub token: String,
    pub ca_cert_hashes: Vec<String>,
    pub unsafe_skip_ca_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub bootstrap_token: BootstrapTokenDiscovery,
    pub timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinControlPlane {
    pub local_api_endpoint: ApiEndpoint,
    pub certificate_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfiguration {
    pub api_version: String,
    pub kind: String,
    pub discovery: Discovery,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<JoinControlPlane>,

    #[serde(default)]
    pub node_registration: NodeRegistration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    pub api_version: String,
    pub kind: String,
    pub cgroup_driver: String,
}

/// Credentials a host presents to join the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinToken {
    pub token: String,
    pub ca_cert_hash: String,
    /// Only needed by control-plane joins
    pub certificate_key: Option<String>,
}

impl JoinToken {
    /// Parse the output of `kubeadm token create --print-join-command`
    pub fn from_join_command(output: &str) -> Option<Self> {
        let words: Vec<&str> = output.split_whitespace().collect();
        let value_of = |flag: &str| {
            words
                .iter()
                .position(|w| *w == flag)
                .and_then(|i| words.get(i + 1))
                .map(|v| v.to_string())
        };
        Some(Self {
            token: value_of("--token")?,
            ca_cert_hash: value_of("--discovery-token-ca-cert-hash")?,
            certificate_key: None,
        })
    }
}

/// Certificate key from `kubeadm init phase upload-certs --upload-certs`
///
/// kubeadm prints it as the last line: 64 hex characters.
pub fn parse_certificate_key(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .filter(|l| l.len() == 64 && l.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
}

/// kubeadm API version matching a Kubernetes version
pub fn api_version_for(kubernetes_version: Option<&str>) -> &'static str {
    let minor = kubernetes_version
        .map(|v| v.trim_start_matches('v'))
        .and_then(|v| v.split('.').nth(1))
        .and_then(|m| m.parse::<u32>().ok());
    match minor {
        Some(m) if m < 22 => "kubeadm.k8s.io/v1beta2",
        _ => "kubeadm.k8s.io/v1beta3",
    }
}

/// Inputs of a kubeadm configuration merge
pub struct MergeInput<'a> {
    pub kubernetes_version: Option<&'a str>,
    pub api_server_domain: &'a str,
    pub vip: IpAddr,
    pub masters: &'a [IpAddr],
    pub env: &'a [(String, String)],
    pub image_repository: Option<String>,
}

/// The cluster-wide kubeadm documents
#[derive(Debug, Clone, PartialEq)]
pub struct KubeadmConfig {
    pub cluster: ClusterConfiguration,
    pub kubelet: KubeletConfiguration,
}

impl KubeadmConfig {
    /// Merge the image's `kubeadm.yml` (when present) with cluster settings
    ///
    /// Explicit cluster env (`PodCIDR`, `SvcCIDR`, `DNSDomain`) wins over the
    /// file, which wins over built-in defaults.
    pub fn merge(base: Option<&Path>, input: &MergeInput<'_>) -> Result<Self, KfError> {
        let api_version = api_version_for(input.kubernetes_version).to_string();

        let mut cluster = ClusterConfiguration {
            api_version: api_version.clone(),
            kind: "ClusterConfiguration".to_string(),
            kubernetes_version: None,
            control_plane_endpoint: String::new(),
            image_repository: None,
            networking: Networking::default(),
            api_server: ApiServer::default(),
        };
        let mut kubelet = KubeletConfiguration {
            api_version: KUBELET_API_VERSION.to_string(),
            kind: "KubeletConfiguration".to_string(),
            cgroup_driver: DEFAULT_CGROUP_DRIVER.to_string(),
        };

        if let Some(path) = base.filter(|p| p.exists()) {
            let text = std::fs::read_to_string(path)?;
            if let Some(found) = find_document::<ClusterConfiguration>(&text, "ClusterConfiguration")? {
                cluster = found;
            }
            if let Some(found) = find_document::<KubeletConfiguration>(&text, "KubeletConfiguration")? {
                kubelet = found;
            }
        }

        cluster.api_version = api_version;
        if let Some(version) = input.kubernetes_version {
            cluster.kubernetes_version = Some(version.to_string());
        }
        if input.image_repository.is_some() {
            cluster.image_repository = input.image_repository.clone();
        }
        cluster.control_plane_endpoint =
            format!("{}:{}", input.api_server_domain, API_SERVER_PORT);

        for (key, value) in input.env {
            match key.as_str() {
                "PodCIDR" => cluster.networking.pod_subnet = value.clone(),
                "SvcCIDR" => cluster.networking.service_subnet = value.clone(),
                "DNSDomain" => cluster.networking.dns_domain = value.clone(),
                _ => {}
            }
        }

        let sans = &mut cluster.api_server.cert_sans;
        let mut wanted = vec![
            "127.0.0.1".to_string(),
            "localhost".to_string(),
            input.api_server_domain.to_string(),
            input.vip.to_string(),
        ];
        wanted.extend(input.masters.iter().map(IpAddr::to_string));
        for san in wanted {
            if !sans.contains(&san) {
                sans.push(san);
            }
        }

        Ok(Self { cluster, kubelet })
    }

    fn kubelet_with(&self, cgroup_driver: &str) -> KubeletConfiguration {
        let mut kubelet = self.kubelet.clone();
        if !cgroup_driver.trim().is_empty() {
            kubelet.cgroup_driver = cgroup_driver.trim().to_string();
        }
        kubelet
    }

    /// Documents for `kubeadm init` on master-0
    pub fn init_document(&self, master0: IpAddr, cgroup_driver: &str) -> Result<String, KfError> {
        let init = InitConfiguration {
            api_version: self.cluster.api_version.clone(),
            kind: "InitConfiguration".to_string(),
            local_api_endpoint: ApiEndpoint::on(master0),
            node_registration: NodeRegistration::default(),
        };
        join_documents(&[
            to_yaml(&init)?,
            to_yaml(&self.cluster)?,
            to_yaml(&self.kubelet_with(cgroup_driver))?,
        ])
    }

    /// Documents for a worker joining through `endpoint`
    pub fn join_node_document(
        &self,
        token: &JoinToken,
        endpoint: &str,
        cgroup_driver: &str,
    ) -> Result<String, KfError> {
        let join = self.join_configuration(token, endpoint, None);
        join_documents(&[to_yaml(&join)?, to_yaml(&self.kubelet_with(cgroup_driver))?])
    }

    /// Documents for a master joining the control plane
    pub fn join_master_document(
        &self,
        token: &JoinToken,
        endpoint: &str,
        master: IpAddr,
        cgroup_driver: &str,
    ) -> Result<String, KfError> {
        let certificate_key = token.certificate_key.clone().ok_or_else(|| {
            KfError::from(ConfigError::MissingField("certificate key".to_string()))
        })?;
        let control_plane = JoinControlPlane {
            local_api_endpoint: ApiEndpoint::on(master),
            certificate_key,
        };
        let join = self.join_configuration(token, endpoint, Some(control_plane));
        join_documents(&[to_yaml(&join)?, to_yaml(&self.kubelet_with(cgroup_driver))?])
    }

    fn join_configuration(
        &self,
        token: &JoinToken,
        endpoint: &str,
        control_plane: Option<JoinControlPlane>,
    ) -> JoinConfiguration {
        JoinConfiguration {
            api_version: self.cluster.api_version.clone(),
            kind: "JoinConfiguration".to_string(),
            discovery: Discovery {
                bootstrap_token: BootstrapTokenDiscovery {
                    api_server_endpoint: endpoint.to_string(),
                    token: token.token.clone(),
                    ca_cert_hashes: vec![token.ca_cert_hash.clone()],
                    unsafe_skip_ca_verification: false,
                },
                timeout: "5m0s".to_string(),
            },
            control_plane,
            node_registration: NodeRegistration::default(),
        }
    }
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String, KfError> {
    serde_yaml::to_string(value)
        .map_err(|e| KfError::Internal(format!("failed to render kubeadm config: {}", e)))
}

fn join_documents(docs: &[String]) -> Result<String, KfError> {
    Ok(docs.join("---\n"))
}

/// First document of `kind` in a multi-document YAML text
fn find_document<T: DeserializeOwned>(text: &str, kind: &str) -> Result<Option<T>, KfError> {
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| ConfigError::Invalid(format!("invalid kubeadm config: {}", e)))?;
        if value.get("kind").and_then(serde_yaml::Value::as_str) == Some(kind) {
            let parsed = serde_yaml::from_value(value)
                .map_err(|e| ConfigError::Invalid(format!("invalid {}: {}", kind, e)))?;
            return Ok(Some(parsed));
        }
    }
    Ok(None)
}
