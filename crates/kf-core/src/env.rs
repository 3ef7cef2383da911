//! Environment wrapping for remote scripts
//!
//! Cluster images ship shell scripts (`init.sh`, `clean.sh`, plugin actions)
//! that read their settings from the environment. The effective environment
//! of a host is the cluster env followed by its group's env; later keys win.

use std::net::IpAddr;

use crate::cluster::Cluster;

/// Effective `(key, value)` pairs for `host`, in first-definition order
pub fn host_env(cluster: &Cluster, host: IpAddr) -> Vec<(String, String)> {
    let group_env = cluster
        .host_of(host)
        .map(|h| h.env.as_slice())
        .unwrap_or_default();

    let mut merged: Vec<(String, String)> = Vec::new();
    for entry in cluster.env.iter().chain(group_env) {
        let Some((key, value)) = entry.split_once('=') else {
            tracing::debug!("Ignoring malformed env entry {:?}", entry);
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => merged.push((key.to_string(), value.to_string())),
        }
    }
    merged
}

/// Prefix `shell` with an `export` of the host's effective environment
pub fn wrap_shell(cluster: &Cluster, host: IpAddr, shell: &str) -> String {
    let env = host_env(cluster, host);
    if env.is_empty() {
        return shell.to_string();
    }
    let exports: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
        .collect();
    format!("export {} && {}", exports.join(" "), shell)
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('`', "\\`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Host;
    use crate::types::Role;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_env_leaves_shell_untouched() {
        let mut cluster = Cluster::new("c", "img");
        cluster.hosts.push(Host::new(vec![ip("10.0.0.1")], Role::Master));
        assert_eq!(wrap_shell(&cluster, ip("10.0.0.1"), "bash init.sh"), "bash init.sh");
    }

    #[test]
    fn test_group_env_overrides_cluster_env() {
        let mut cluster = Cluster::new("c", "img");
        cluster.env = vec!["PodCIDR=100.64.0.0/10".into(), "Mode=ipvs".into()];
        let mut host = Host::new(vec![ip("10.0.0.1")], Role::Master);
        host.env = vec!["Mode=iptables".into(), "broken".into()];
        cluster.hosts.push(host);

        assert_eq!(
            wrap_shell(&cluster, ip("10.0.0.1"), "bash init.sh"),
            "export PodCIDR=\"100.64.0.0/10\" Mode=\"iptables\" && bash init.sh"
        );
    }

    #[test]
    fn test_values_are_escaped() {
        let mut cluster = Cluster::new("c", "img");
        cluster.env = vec!["Greeting=say \"hi\"".into()];
        let wrapped = wrap_shell(&cluster, ip("10.0.0.9"), "true");
        assert_eq!(wrapped, "export Greeting=\"say \\\"hi\\\"\" && true");
    }
}
