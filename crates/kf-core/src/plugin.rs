//! Shell plugin declarations
//!
//! Plugins are user supplied shell actions attached to lifecycle phases.
//! They are declared next to the cluster in the Clusterfile and executed by
//! the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Role;

/// Lifecycle phase a plugin can hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Before anything touches the hosts; runs outside the rootfs dir
    Originally,
    PreInit,
    PostInstall,
    PreJoin,
    PostJoin,
    PreClean,
    PostClean,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Originally => "originally",
            Phase::PreInit => "pre-init",
            Phase::PostInstall => "post-install",
            Phase::PreJoin => "pre-join",
            Phase::PostJoin => "post-join",
            Phase::PreClean => "pre-clean",
            Phase::PostClean => "post-clean",
        };
        f.write_str(name)
    }
}

/// A shell action bound to one or more phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,

    pub phases: Vec<Phase>,

    /// Shell snippet to run
    pub data: String,

    /// Restrict execution to hosts carrying one of these roles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<Role>,
}
