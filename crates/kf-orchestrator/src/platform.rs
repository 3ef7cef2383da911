//! Host platform detection

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use kf_core::traits::{Platform, RemoteExecutor};
use kf_core::KfError;

use crate::fanout::FanOut;

const UNAME: &str = "uname -m";

/// Map `uname -m` output to an image platform
pub fn from_uname(machine: &str) -> Platform {
    let (arch, variant) = match machine.trim() {
        "x86_64" | "amd64" => ("amd64", None),
        "aarch64" | "arm64" => ("arm64", None),
        "armv7l" => ("arm", Some("v7")),
        other => (other, None),
    };
    Platform {
        os: "linux".to_string(),
        arch: arch.to_string(),
        variant: variant.map(str::to_string),
    }
}

/// Directory name of a platform inside a multi-platform image
pub fn dir_name(platform: &Platform) -> String {
    match &platform.variant {
        Some(variant) => format!("{}_{}_{}", platform.os, platform.arch, variant),
        None => format!("{}_{}", platform.os, platform.arch),
    }
}

/// Platform of one host
pub async fn detect(executor: &dyn RemoteExecutor, host: IpAddr) -> Result<Platform, KfError> {
    let machine = executor.run(host, UNAME).await?;
    Ok(from_uname(&machine))
}

/// Platforms of every host, detected concurrently
pub async fn cluster_platforms(
    executor: &Arc<dyn RemoteExecutor>,
    fanout: FanOut,
    hosts: &[IpAddr],
) -> Result<HashMap<IpAddr, Platform>, KfError> {
    let results = fanout
        .collect(hosts, |host| {
            let executor = Arc::clone(executor);
            async move { detect(executor.as_ref(), host).await }
        })
        .await;

    let mut platforms = HashMap::with_capacity(results.len());
    for (host, result) in results {
        platforms.insert(host, result.map_err(|e| KfError::host(host, e))?);
    }
    Ok(platforms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::mock::MockExecutor;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_uname_mapping() {
        assert_eq!(dir_name(&from_uname("x86_64\n")), "linux_amd64");
        assert_eq!(dir_name(&from_uname("aarch64")), "linux_arm64");
        assert_eq!(dir_name(&from_uname("armv7l")), "linux_arm_v7");
        assert_eq!(from_uname("riscv64").arch, "riscv64");
    }

    #[tokio::test]
    async fn test_cluster_platforms() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond(UNAME, "x86_64\n")
            .respond_on(ip("10.0.0.2"), UNAME, "aarch64\n");
        let executor: Arc<dyn RemoteExecutor> = mock;

        let platforms = cluster_platforms(&executor, FanOut::new(), &[ip("10.0.0.1"), ip("10.0.0.2")])
            .await
            .unwrap();
        assert_eq!(platforms[&ip("10.0.0.1")].arch, "amd64");
        assert_eq!(platforms[&ip("10.0.0.2")].arch, "arm64");
    }
}
