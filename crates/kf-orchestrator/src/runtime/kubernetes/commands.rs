//! Remote command templates
//!
//! `kf-util` is the helper binary shipped in every cluster image's rootfs.
//! It manages host routes, IPVS rules and API server certificates.

use std::net::IpAddr;

/// API server port
pub const API_SERVER_PORT: u16 = 6443;

/// Output of `kf-util route check` when no extra route is needed
pub const ROUTE_OK: &str = "ok";

pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
pub const LVSCARE_MANIFEST: &str = "/etc/kubernetes/manifests/kube-lvscare.yaml";

pub const HOSTNAME: &str = "hostname";
pub const TOKEN_CREATE: &str = "kubeadm token create --print-join-command";
pub const UPLOAD_CERTS: &str = "kubeadm init phase upload-certs --upload-certs";
pub const INSTALL_KUBECONFIG: &str = "rm -rf $HOME/.kube/config && mkdir -p $HOME/.kube \
     && cp /etc/kubernetes/admin.conf $HOME/.kube/config";
pub const REMOVE_KUBECONFIG: &str = "rm -rf /usr/bin/kube* && rm -rf ~/.kube/";
pub const STATIC_POD_MKDIR: &str = "mkdir -p /etc/kubernetes/manifests";
pub const RESTART_KUBELET: &str = "systemctl daemon-reload && systemctl restart kubelet";
pub const UPGRADE_NODE: &str = "kubeadm upgrade node";
pub const CGROUP_DRIVER: &str =
    "docker info 2>/dev/null | grep -i 'cgroup driver' | awk -F': ' '{print $2}'";

/// Container name of the in-cluster registry
pub const REGISTRY_CONTAINER: &str = "kforge-registry";

const HEREDOC_MARKER: &str = "KFORGE_EOF";

/// Relative path of the kubeadm config inside the rootfs
pub const KUBEADM_CONFIG: &str = "etc/kubeadm.yml";

/// `-v N` for kubeadm, empty at level 0
pub fn vlog(level: u8) -> String {
    if level == 0 {
        String::new()
    } else {
        format!(" -v {}", level)
    }
}

/// Write `content` to `path` through a quoted heredoc
pub fn write_file(path: &str, content: &str) -> String {
    let dir = match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    };
    format!(
        "mkdir -p {dir} && cat > {path} <<'{marker}'\n{content}\n{marker}",
        dir = dir,
        path = path,
        content = content.trim_end_matches('\n'),
        marker = HEREDOC_MARKER,
    )
}

pub fn kubeadm_config_path(rootfs: &str) -> String {
    format!("{}/{}", rootfs, KUBEADM_CONFIG)
}

pub fn kubeadm_init(rootfs: &str, vlog_level: u8) -> String {
    format!(
        "kubeadm init --config={} --upload-certs{}",
        kubeadm_config_path(rootfs),
        vlog(vlog_level)
    )
}

pub fn kubeadm_join(rootfs: &str, vlog_level: u8) -> String {
    format!(
        "kubeadm join --config={}{}",
        kubeadm_config_path(rootfs),
        vlog(vlog_level)
    )
}

pub fn upgrade_apply(version: &str) -> String {
    format!("kubeadm upgrade apply -y {}", version)
}

/// Map `domain` to `ip` in `/etc/hosts` unless already present
pub fn add_etc_hosts(ip: IpAddr, domain: &str) -> String {
    format!(
        "cat /etc/hosts | grep '{ip} {domain}' || echo '{ip} {domain}' >> /etc/hosts",
        ip = ip,
        domain = domain
    )
}

/// Drop every `/etc/hosts` line mentioning `domain`
pub fn remove_etc_hosts(domain: &str) -> String {
    format!("sed -i \"/{}/d\" /etc/hosts", domain)
}

pub fn remove_registry_certs(domain: &str) -> String {
    format!("rm -rf /etc/docker/certs.d/{}*", domain)
}

pub fn check_route(host: IpAddr) -> String {
    format!("kf-util route check --host {}", host)
}

pub fn add_route(vip: IpAddr, gateway: IpAddr) -> String {
    format!("kf-util route add --host {} --gateway {}", vip, gateway)
}

pub fn delete_route(vip: IpAddr, gateway: IpAddr) -> String {
    format!(
        "if command -v kf-util > /dev/null 2>&1; then kf-util route del --host {} --gateway {}; fi",
        vip, gateway
    )
}

/// One-shot IPVS rule balancing the VIP over every master
pub fn add_ipvs(vip: IpAddr, masters: &[IpAddr]) -> String {
    let real_servers: String = masters
        .iter()
        .map(|m| format!(" --rs {}:{}", m, API_SERVER_PORT))
        .collect();
    format!(
        "kf-util ipvs --vs {}:{}{} --health-path /healthz --health-schem https --run-once",
        vip, API_SERVER_PORT, real_servers
    )
}

pub fn cert_update(alt_names: &[String]) -> String {
    format!("kf-util cert update --alt-names {}", alt_names.join(","))
}

pub fn kubectl_delete_node(name: &str) -> String {
    format!("kubectl delete node {}", name.trim())
}

/// Wipe kubeadm state and binaries from a host
pub fn clean_host(vlog_level: u8) -> String {
    format!(
        "if which kubeadm > /dev/null 2>&1;then kubeadm reset -f{};fi && \
         (modprobe -r ipip || true) && \
         rm -rf /etc/kubernetes/ && \
         rm -rf /etc/systemd/system/kubelet.service.d && \
         rm -rf /etc/systemd/system/kubelet.service && \
         rm -rf /usr/bin/kubeadm && \
         rm -rf /usr/bin/kubelet-pre-start.sh && \
         rm -rf /usr/bin/kubelet && \
         rm -rf /usr/bin/crictl && \
         rm -rf /etc/cni && rm -rf /opt/cni && \
         rm -rf /var/lib/etcd && rm -rf /var/etcd",
        vlog(vlog_level)
    )
}

pub fn registry_login(repo: &str, user: &str, password: &str) -> String {
    format!("docker login {} -u {} -p {}", repo, user, password)
}

/// Start the registry container shipped in the rootfs
pub fn apply_registry(rootfs: &str, port: u16, domain: &str) -> String {
    format!(
        "cd {rootfs}/scripts && bash init-registry.sh {port} {rootfs}/registry {domain}",
        rootfs = rootfs,
        port = port,
        domain = domain
    )
}

pub fn delete_registry() -> String {
    format!(
        "if docker inspect {name} > /dev/null 2>&1;then docker rm -f {name};fi",
        name = REGISTRY_CONTAINER
    )
}

pub fn cd_and_exec(dir: &str, command: &str) -> String {
    format!("cd {} && {}", dir, command)
}
