//! Core error types for kForge

use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Role;

/// Top-level error type for the kForge ecosystem
#[derive(Error, Debug)]
pub enum KfError {
    /// Topology reconciliation error
    #[error("Scale error: {0}")]
    Scale(#[from] ScaleError),

    /// Remote execution error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A per-host task of a fan-out failed
    #[error("host {host}: {source}")]
    Host {
        host: IpAddr,
        #[source]
        source: Box<KfError>,
    },

    /// The user declined a destructive operation
    #[error("operation aborted: {0}")]
    Aborted(String),

    /// A task panicked or was aborted
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KfError {
    /// Attach the failing host to an error
    pub fn host(host: IpAddr, source: impl Into<KfError>) -> Self {
        KfError::Host {
            host,
            source: Box::new(source.into()),
        }
    }

    /// The innermost error, with all host wrappers peeled off
    pub fn root(&self) -> &KfError {
        match self {
            KfError::Host { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost host this error is attributed to, if any
    pub fn failed_host(&self) -> Option<IpAddr> {
        match self {
            KfError::Host { host, .. } => Some(*host),
            KfError::Remote(RemoteError::ExecutionFailed { host, .. })
            | KfError::Remote(RemoteError::SshNotReady { host, .. })
            | KfError::Remote(RemoteError::UnknownHost(host)) => Some(*host),
            _ => None,
        }
    }
}

/// Host-set reconciliation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    /// Target text is neither an IP list nor an IP range
    #[error("invalid address format: {0:?}")]
    InvalidAddressFormat(String),

    /// Requested IP already holds the role
    #[error("failed to scale {role} for duplicated ip: {ip}")]
    DuplicateIpConflict { role: Role, ip: IpAddr },

    /// Master-0 was targeted for removal
    #[error("master0 machine({0}) cannot be deleted")]
    ProtectedMasterRemoval(IpAddr),
}

/// Remote execution errors
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Connection failure or non-zero exit
    #[error("failed to execute {command:?} on {host}: {reason}")]
    ExecutionFailed {
        host: IpAddr,
        command: String,
        reason: String,
    },

    /// Host did not answer within the retry budget
    #[error("ssh on {host} not ready after {attempts} attempts")]
    SshNotReady { host: IpAddr, attempts: u32 },

    /// Host is not managed by this executor
    #[error("host {0} is not managed by this executor")]
    UnknownHost(IpAddr),

    /// Local side of a copy or fetch failed
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Cluster has no name
    #[error("cluster name cannot be empty")]
    EmptyClusterName,

    /// Scale request names neither masters nor nodes
    #[error("master and node cannot both be empty")]
    EmptyTargets,

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_peels_host_wrappers() {
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let err = KfError::host(ip, KfError::host(ip, ConfigError::EmptyTargets));
        assert!(matches!(
            err.root(),
            KfError::Config(ConfigError::EmptyTargets)
        ));
        assert_eq!(err.failed_host(), Some(ip));
        assert!(err.to_string().contains("10.0.0.2"));
    }

    #[test]
    fn test_remote_error_names_host_and_command() {
        let ip: IpAddr = "192.168.0.3".parse().unwrap();
        let err = RemoteError::ExecutionFailed {
            host: ip,
            command: "kubeadm join".to_string(),
            reason: "exit status 1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.0.3"));
        assert!(msg.contains("kubeadm join"));
    }
}
