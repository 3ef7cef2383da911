//! Day-2 helpers behind `kforge alpha`

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::error::ConfigError;
use kf_core::traits::RemoteExecutor;
use kf_core::{Cluster, KfError, Role};

use crate::fanout::FanOut;
use crate::runtime::kubernetes::commands;

/// Hosts of `cluster` carrying any of `roles`, every host when empty
pub fn hosts_by_roles(cluster: &Cluster, roles: &[Role]) -> Result<Vec<IpAddr>, KfError> {
    if roles.is_empty() {
        return Ok(cluster.all_ips());
    }
    let mut ips = Vec::new();
    for role in roles {
        ips.extend(cluster.ips_by_role(*role));
    }
    if ips.is_empty() {
        return Err(ConfigError::Invalid(format!("no host carries any of the roles {:?}", roles)).into());
    }
    Ok(kf_core::net::remove_duplicate(&ips))
}

/// Add subject alternative names to the API server certificate on every master
pub async fn update_cert_sans(
    executor: &Arc<dyn RemoteExecutor>,
    fanout: FanOut,
    cluster: &Cluster,
    alt_names: &[String],
) -> Result<(), KfError> {
    if alt_names.is_empty() {
        return Err(ConfigError::MissingField(
            "IP address or DNS domain for the certificate alt names".into(),
        )
        .into());
    }
    let command = Arc::new(commands::cert_update(alt_names));
    fanout
        .run(&cluster.master_ips(), |host| {
            let executor = Arc::clone(executor);
            let command = Arc::clone(&command);
            async move {
                executor.run(host, &command).await?;
                Ok::<(), KfError>(())
            }
        })
        .await
}

/// Run `command` on `hosts` and collect every host's output
pub async fn exec_command(
    executor: &Arc<dyn RemoteExecutor>,
    fanout: FanOut,
    hosts: &[IpAddr],
    command: &str,
) -> Vec<(IpAddr, Result<String, KfError>)> {
    let command = Arc::new(command.to_string());
    fanout
        .collect(hosts, |host| {
            let executor = Arc::clone(executor);
            let command = Arc::clone(&command);
            async move { executor.run(host, &command).await.map_err(KfError::from) }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::mock::MockExecutor;
    use kf_core::Host;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new("prod", "kubernetes:v1.22.8");
        cluster
            .hosts
            .push(Host::new(vec![ip("10.0.0.1"), ip("10.0.0.2")], Role::Master));
        cluster.hosts.push(Host::new(vec![ip("10.0.0.10")], Role::Node));
        cluster
    }

    #[tokio::test]
    async fn test_cert_update_runs_on_masters_only() {
        let mock = Arc::new(MockExecutor::new());
        let executor: Arc<dyn RemoteExecutor> = mock.clone();
        let names = vec!["39.105.169.253".to_string(), "kforge.example".to_string()];

        update_cert_sans(&executor, FanOut::new(), &cluster(), &names)
            .await
            .unwrap();

        assert!(mock.ran(
            ip("10.0.0.2"),
            "kf-util cert update --alt-names 39.105.169.253,kforge.example"
        ));
        assert!(!mock.touched_hosts().contains(&ip("10.0.0.10")));
        assert!(update_cert_sans(&executor, FanOut::new(), &cluster(), &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_exec_collects_each_host() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond("hostname", "m1\n")
            .fail_on(ip("10.0.0.10"), "hostname");
        let executor: Arc<dyn RemoteExecutor> = mock.clone();
        let hosts = hosts_by_roles(&cluster(), &[]).unwrap();

        let results = exec_command(&executor, FanOut::new(), &hosts, "hostname").await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1.as_ref().unwrap(), "m1\n");
        assert!(results[2].1.is_err());
    }

    #[test]
    fn test_role_filter() {
        let mut c = cluster();
        assert_eq!(hosts_by_roles(&c, &[Role::Node]).unwrap(), vec![ip("10.0.0.10")]);
        c.hosts.pop();
        assert!(hosts_by_roles(&c, &[Role::Node]).is_err());
    }
}
