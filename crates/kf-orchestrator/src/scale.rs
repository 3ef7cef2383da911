//! Host-set reconciliation
//!
//! Turns a scale request into an updated cluster topology. Everything is
//! parsed and validated before the cluster is touched, so a rejected request
//! leaves the cluster exactly as it was. No network I/O happens here.

use std::net::IpAddr;

use kf_core::error::{ConfigError, ScaleError};
use kf_core::net::{parse_targets, remove_duplicate, subtract};
use kf_core::{Cluster, Host, KfError, Role, SshConfig};

/// A request to add or remove hosts
#[derive(Debug, Clone, Default)]
pub struct ScaleRequest {
    /// Master targets: a comma separated list or one `a-b` range
    pub masters: String,

    /// Worker targets, same format as `masters`
    pub nodes: String,

    /// Credentials of the new hosts, when they differ from the cluster default
    pub ssh: Option<SshConfig>,

    /// `KEY=VALUE` entries appended to the cluster env
    pub env: Vec<String>,
}

impl ScaleRequest {
    fn is_empty(&self) -> bool {
        self.masters.trim().is_empty() && self.nodes.trim().is_empty()
    }
}

struct Targets {
    masters: Vec<IpAddr>,
    nodes: Vec<IpAddr>,
}

fn parse(request: &ScaleRequest) -> Result<Targets, KfError> {
    if request.is_empty() {
        return Err(ConfigError::EmptyTargets.into());
    }
    Ok(Targets {
        masters: parse_targets(&request.masters)?,
        nodes: parse_targets(&request.nodes)?,
    })
}

/// Add the requested hosts to `cluster`
pub fn join(cluster: &mut Cluster, request: &ScaleRequest) -> Result<(), KfError> {
    let targets = parse(request)?;

    let additions = [(Role::Master, targets.masters), (Role::Node, targets.nodes)];
    for (role, ips) in &additions {
        let existing = cluster.ips_by_role(*role);
        if let Some(ip) = ips.iter().find(|ip| existing.contains(ip)) {
            return Err(ScaleError::DuplicateIpConflict {
                role: *role,
                ip: *ip,
            }
            .into());
        }
    }

    let override_ssh = request
        .ssh
        .as_ref()
        .filter(|ssh| !ssh.is_empty() && !ssh.same_credentials(&cluster.ssh))
        .cloned();

    cluster.env.extend(request.env.iter().cloned());

    for (role, ips) in additions {
        if ips.is_empty() {
            continue;
        }
        let mut host = Host::new(remove_duplicate(&ips), role);
        host.ssh = override_ssh.clone();
        tracing::info!("Scaling {} {}(s): {:?}", host.ips.len(), role, host.ips);
        cluster.hosts.push(host);
    }
    Ok(())
}

/// Remove the requested hosts from `cluster`
///
/// Groups left without IPs are kept.
pub fn delete(cluster: &mut Cluster, request: &ScaleRequest) -> Result<(), KfError> {
    let targets = parse(request)?;

    if let Some(master0) = cluster.master0_ip() {
        if targets.masters.contains(&master0) {
            return Err(ScaleError::ProtectedMasterRemoval(master0).into());
        }
    }

    cluster.env.extend(request.env.iter().cloned());

    for (role, ips) in [(Role::Master, &targets.masters), (Role::Node, &targets.nodes)] {
        if ips.is_empty() {
            continue;
        }
        for host in cluster.hosts.iter_mut().filter(|h| h.has_role(role)) {
            host.ips = subtract(&host.ips, ips);
        }
    }
    Ok(())
}
