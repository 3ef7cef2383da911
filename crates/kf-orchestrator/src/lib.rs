//! kf-orchestrator: Cluster lifecycle orchestration for kForge
//!
//! Reconciles the host set of a cluster, drives the kubeadm runtime over
//! the remote executor, and sequences image mounting, registry setup and
//! shell plugins around it.

pub mod alpha;
pub mod applier;
pub mod cert;
pub mod fanout;
pub mod filesystem;
pub mod image;
pub mod platform;
pub mod plugin;
pub mod prune;
pub mod readiness;
pub mod runtime;
pub mod scale;

pub use applier::{Applier, ClusterDiff, GenerateProcessor, Services};
pub use fanout::FanOut;
pub use runtime::{new_runtime, ClusterRuntime, RuntimeKind, RuntimeSetup, RuntimeState};
pub use scale::ScaleRequest;
