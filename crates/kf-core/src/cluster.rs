//! Declarative cluster model
//!
//! A [`Cluster`] is both the desired state read from a Clusterfile and the
//! actual state persisted after every successful apply. Host groups are only
//! mutated by the scale reconciler; everything downstream reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::net::remove_duplicate;
use crate::types::Role;

/// Annotation remembering the Clusterfile a cluster was applied from
pub const CLUSTERFILE_ANNOTATION: &str = "kforge.io/clusterfile";

/// Default SSH user
pub const DEFAULT_SSH_USER: &str = "root";

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH credentials, either the cluster default or a host-group override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Path to a private key on the machine running kforge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
}

impl SshConfig {
    /// Effective user
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_SSH_USER)
    }

    /// Effective port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == SshConfig::default()
    }

    /// Fill every unset field of `self` from `fallback`
    pub fn or(&self, fallback: &SshConfig) -> SshConfig {
        SshConfig {
            user: self.user.clone().or_else(|| fallback.user.clone()),
            password: self.password.clone().or_else(|| fallback.password.clone()),
            port: self.port.or(fallback.port),
            private_key: self
                .private_key
                .clone()
                .or_else(|| fallback.private_key.clone()),
            private_key_passphrase: self
                .private_key_passphrase
                .clone()
                .or_else(|| fallback.private_key_passphrase.clone()),
        }
    }

    /// Whether these credentials authenticate the same way as `other`
    pub fn same_credentials(&self, other: &SshConfig) -> bool {
        self.user() == other.user()
            && self.port() == other.port()
            && self.password == other.password
            && self.private_key == other.private_key
            && self.private_key_passphrase == other.private_key_passphrase
    }
}

/// A group of IPs sharing roles and SSH credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub ips: Vec<IpAddr>,

    pub roles: Vec<Role>,

    /// Extra `KEY=VALUE` entries for commands run on this group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Credential override, falls back to the cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
}

impl Host {
    /// Create a host group with a single role
    pub fn new(ips: Vec<IpAddr>, role: Role) -> Self {
        Self {
            ips,
            roles: vec![role],
            ..Default::default()
        }
    }

    /// Check if the group carries a role
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Desired/actual specification of a Kubernetes cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Immutable identity
    pub name: String,

    /// Cluster image reference
    pub image: String,

    /// `KEY=VALUE` entries exported before remote scripts
    #[serde(default)]
    pub env: Vec<String>,

    /// Free-form arguments passed through to image scripts
    #[serde(default)]
    pub cmd_args: Vec<String>,

    /// Default SSH credentials
    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Ordered host groups; the first IP of the first master group is master-0
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl Cluster {
    /// Create an empty cluster
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Check the invariants every operation relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyClusterName);
        }
        if self.master0_ip().is_none() {
            return Err(ConfigError::Invalid(format!(
                "cluster {} has no master host",
                self.name
            )));
        }
        Ok(())
    }

    /// IPs of every group carrying `role`, in declaration order
    pub fn ips_by_role(&self, role: Role) -> Vec<IpAddr> {
        let ips: Vec<IpAddr> = self
            .hosts
            .iter()
            .filter(|h| h.has_role(role))
            .flat_map(|h| h.ips.iter().copied())
            .collect();
        remove_duplicate(&ips)
    }

    /// Control-plane IPs
    pub fn master_ips(&self) -> Vec<IpAddr> {
        self.ips_by_role(Role::Master)
    }

    /// Worker IPs
    pub fn node_ips(&self) -> Vec<IpAddr> {
        self.ips_by_role(Role::Node)
    }

    /// Every IP, masters first
    pub fn all_ips(&self) -> Vec<IpAddr> {
        let mut ips = self.master_ips();
        ips.extend(self.node_ips());
        remove_duplicate(&ips)
    }

    /// The first master IP, anchor of the cluster identity
    pub fn master0_ip(&self) -> Option<IpAddr> {
        self.master_ips().first().copied()
    }

    /// Whether `ip` belongs to any host group
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.hosts.iter().any(|h| h.ips.contains(&ip))
    }

    /// The group owning `ip`
    pub fn host_of(&self, ip: IpAddr) -> Option<&Host> {
        self.hosts.iter().find(|h| h.ips.contains(&ip))
    }

    /// Effective SSH credentials for `ip`
    pub fn ssh_for(&self, ip: IpAddr) -> SshConfig {
        match self.host_of(ip).and_then(|h| h.ssh.as_ref()) {
            Some(ssh) => ssh.or(&self.ssh),
            None => self.ssh.clone(),
        }
    }

    /// Read an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Set an annotation, replacing any previous value
    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }
}
