//! lvscare static pod
//!
//! Every worker runs lvscare as a static pod. It keeps the local IPVS
//! virtual server on the VIP in sync with the healthy API servers.

use serde_json::json;
use std::net::IpAddr;

use kf_core::KfError;

use super::commands::API_SERVER_PORT;

/// lvscare image inside the cluster registry
pub fn image(registry_repo: &str) -> String {
    format!("{}/fanux/lvscare:latest", registry_repo)
}

/// Render the static pod manifest balancing `vip` over `masters`
pub fn static_pod_yaml(vip: IpAddr, masters: &[IpAddr], image: &str) -> Result<String, KfError> {
    let mut args = vec![
        "care".to_string(),
        "--vs".to_string(),
        format!("{}:{}", vip, API_SERVER_PORT),
        "--health-path".to_string(),
        "/healthz".to_string(),
        "--health-schem".to_string(),
        "https".to_string(),
    ];
    for master in masters {
        args.push("--rs".to_string());
        args.push(format!("{}:{}", master, API_SERVER_PORT));
    }

    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "kube-lvscare",
            "namespace": "kube-system",
            "labels": { "component": "kube-lvscare", "tier": "control-plane" },
        },
        "spec": {
            "hostNetwork": true,
            "priorityClassName": "system-node-critical",
            "containers": [{
                "name": "kube-lvscare",
                "image": image,
                "imagePullPolicy": "IfNotPresent",
                "command": ["/usr/bin/lvscare"],
                "args": args,
                "securityContext": { "privileged": true },
                "volumeMounts": [{
                    "name": "lib-modules",
                    "mountPath": "/lib/modules",
                    "readOnly": true,
                }],
            }],
            "volumes": [{
                "name": "lib-modules",
                "hostPath": { "path": "/lib/modules" },
            }],
        },
    });

    serde_yaml::to_string(&pod)
        .map_err(|e| KfError::Internal(format!("failed to render lvscare manifest: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_lists_every_master() {
        let masters: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        let yaml = static_pod_yaml(
            "10.103.97.2".parse().unwrap(),
            &masters,
            &image("sea.hub:5000"),
        )
        .unwrap();

        let pod: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let container = &pod["spec"]["containers"][0];
        assert_eq!(container["image"].as_str(), Some("sea.hub:5000/fanux/lvscare:latest"));

        let args: Vec<&str> = container["args"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|a| a.as_str())
            .collect();
        assert_eq!(&args[..3], &["care", "--vs", "10.103.97.2:6443"]);
        assert!(args.ends_with(&["--rs", "10.0.0.1:6443", "--rs", "10.0.0.2:6443"]));
    }
}
