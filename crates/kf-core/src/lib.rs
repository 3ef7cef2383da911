//! kf-core: Core cluster model and configuration for kForge
//!
//! This crate provides the declarative cluster model, host target parsing,
//! the error taxonomy, configuration and persistence helpers, and the traits
//! through which the orchestrator reaches remote hosts and its collaborators.

pub mod cluster;
pub mod config;
pub mod env;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod net;
pub mod plugin;
pub mod traits;
pub mod types;

pub use cluster::{Cluster, Host, SshConfig};
pub use error::KfError;
pub use types::Role;
