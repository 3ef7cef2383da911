//! Cluster runtime state machine
//!
//! A runtime drives the remote procedures that bring a cluster to its
//! desired topology: bootstrap, join, delete, reset and upgrade. The set of
//! runtimes is closed; [`new_runtime`] picks one by [`RuntimeKind`].

pub mod kubernetes;
mod state;

pub use kubernetes::{KubernetesRuntime, Metadata};
pub use state::{Operation, RuntimeState, StateMachine};

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use kf_core::config::RuntimeConfig;
use kf_core::error::ConfigError;
use kf_core::traits::{CertService, RemoteExecutor};
use kf_core::{Cluster, KfError};

/// Lifecycle operations every runtime provides
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    /// Bootstrap the control plane and join every other host
    async fn init(&self) -> Result<(), KfError>;

    /// Upgrade every host to the version of the mounted image
    async fn upgrade(&self) -> Result<(), KfError>;

    /// Tear the cluster down
    async fn reset(&self) -> Result<(), KfError>;

    /// Add control-plane hosts, one at a time
    async fn join_masters(&self, ips: &[IpAddr]) -> Result<(), KfError>;

    /// Add workers, concurrently
    async fn join_nodes(&self, ips: &[IpAddr]) -> Result<(), KfError>;

    /// Remove control-plane hosts, one at a time
    async fn delete_masters(&self, ips: &[IpAddr]) -> Result<(), KfError>;

    /// Remove workers, concurrently
    async fn delete_nodes(&self, ips: &[IpAddr]) -> Result<(), KfError>;

    /// Install information shipped with the cluster image
    async fn cluster_metadata(&self) -> Result<Metadata, KfError>;

    /// Issue the registry certificate, send it to every host and start the
    /// registry; safe to repeat
    async fn apply_registry(&self) -> Result<(), KfError>;

    /// Current lifecycle state
    fn state(&self) -> RuntimeState;
}

/// Available runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Kubernetes,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(RuntimeKind::Kubernetes),
            other => Err(ConfigError::Invalid(format!("unknown runtime: {}", other))),
        }
    }
}

/// Asked before hosts are deleted; returns whether to proceed
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything a runtime is built from
pub struct RuntimeSetup {
    /// Cluster the runtime operates on, read-only for its lifetime
    pub cluster: Cluster,
    pub config: RuntimeConfig,
    /// Local directory the cluster image is mounted at
    pub local_rootfs: PathBuf,
    /// Whether the cluster is already bootstrapped
    pub existing: bool,
    pub executor: Arc<dyn RemoteExecutor>,
    pub certs: Arc<dyn CertService>,
    /// Deletion prompt; without one, deletions need `force_delete`
    pub confirm: Option<ConfirmFn>,
}

/// Build the runtime of `kind`
///
/// Fails when the cluster has no name or no master.
pub fn new_runtime(kind: RuntimeKind, setup: RuntimeSetup) -> Result<Box<dyn ClusterRuntime>, KfError> {
    match kind {
        RuntimeKind::Kubernetes => Ok(Box::new(KubernetesRuntime::new(setup)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_from_str() {
        assert_eq!("Kubernetes".parse::<RuntimeKind>().unwrap(), RuntimeKind::Kubernetes);
        assert_eq!("k8s".parse::<RuntimeKind>().unwrap(), RuntimeKind::Kubernetes);
        assert!("k3s".parse::<RuntimeKind>().is_err());
    }
}
