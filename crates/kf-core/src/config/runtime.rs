//! Runtime configuration
//!
//! Everything the runtime state machine needs to know that is not part of the
//! cluster spec itself. Passed explicitly into the runtime constructor.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Default virtual IP fronting the API servers
pub const DEFAULT_VIP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 103, 97, 2));

/// Default API server domain
pub const DEFAULT_API_SERVER_DOMAIN: &str = "apiserver.cluster.local";

/// Default registry domain
pub const DEFAULT_REGISTRY_DOMAIN: &str = "sea.hub";

/// Configuration handed to the runtime state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Skip the confirmation before deleting hosts
    pub force_delete: bool,

    /// kubeadm verbosity (`-v N`)
    pub vlog: u8,

    /// Virtual IP fronting the API servers
    pub vip: IpAddr,

    /// Domain the API server certificate is issued for
    pub api_server_domain: String,

    /// Cap on concurrent per-host tasks in one fan-out (unbounded when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Where the admin kubeconfig is fetched to on this machine
    pub kubeconfig_path: PathBuf,

    /// Hosts file of this machine, receives the API server entry
    pub hosts_file: PathBuf,

    /// Local image registry
    pub registry: RegistryConfig,

    /// Budget for the wait-until-SSH-answers poll
    pub ssh_ready: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            force_delete: false,
            vlog: 0,
            vip: DEFAULT_VIP,
            api_server_domain: DEFAULT_API_SERVER_DOMAIN.to_string(),
            max_parallel: None,
            kubeconfig_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".kube")
                .join("config"),
            hosts_file: PathBuf::from("/etc/hosts"),
            registry: RegistryConfig::default(),
            ssh_ready: RetryPolicy::default(),
        }
    }
}

/// Registry served from inside the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub domain: String,

    /// Host running the registry; master-0 when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,

    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_REGISTRY_DOMAIN.to_string(),
            ip: None,
            port: 5000,
            username: None,
            password: None,
        }
    }
}

impl RegistryConfig {
    /// `domain:port`, the prefix of every image served by the registry
    pub fn repo(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    /// Credentials, when both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Bounded retry budget
///
/// With the defaults (multiplier 1.0, no jitter) the delay between attempts
/// is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,

    #[serde(with = "duration_millis")]
    pub initial: Duration,

    #[serde(with = "duration_millis")]
    pub max: Duration,

    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(6, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// `attempts` tries separated by a constant `delay`
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}
