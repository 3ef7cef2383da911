//! Registry certificate service
//!
//! Certificates are issued with `openssl` on the registry host itself, so
//! the key never leaves it. Only the certificate is fetched and pushed to
//! the docker trust store of the other hosts.

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use kf_core::config::{RegistryConfig, DEFAULT_REGISTRY_DOMAIN};
use kf_core::traits::{CertService, CertificateDescriptor, RemoteExecutor};
use kf_core::KfError;

use crate::fanout::FanOut;

const DOCKER_CERTS_DIR: &str = "/etc/docker/certs.d";

fn subject_alt_names(descriptor: &CertificateDescriptor) -> String {
    descriptor
        .dns_names
        .iter()
        .map(|name| format!("DNS:{}", name))
        .chain(descriptor.ips.iter().map(|ip| format!("IP:{}", ip)))
        .collect::<Vec<_>>()
        .join(",")
}

fn openssl_command(descriptor: &CertificateDescriptor, cert: &str, key: &str) -> String {
    let mut command = format!(
        "mkdir -p {dir} && openssl req -x509 -newkey rsa:4096 -nodes -sha256 -days {days} \
         -subj \"/CN={cn}\" -keyout {key} -out {cert}",
        dir = descriptor.output_dir,
        days = descriptor.days,
        cn = descriptor.common_name,
        key = key,
        cert = cert,
    );
    let sans = subject_alt_names(descriptor);
    if !sans.is_empty() {
        command.push_str(&format!(" -addext \"subjectAltName={}\"", sans));
    }
    command
}

/// [`CertService`] issuing the registry certificate on the registry host
pub struct RemoteCertService {
    executor: Arc<dyn RemoteExecutor>,
    registry: RegistryConfig,
    registry_ip: IpAddr,
    /// Directory the certificate is issued into on the registry host
    cert_dir: String,
    /// Local scratch directory
    tmp_dir: PathBuf,
    fanout: FanOut,
}

impl RemoteCertService {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        registry: RegistryConfig,
        registry_ip: IpAddr,
        rootfs: &str,
        tmp_dir: PathBuf,
    ) -> Self {
        Self {
            executor,
            registry,
            registry_ip,
            cert_dir: format!("{}/certs", rootfs),
            tmp_dir,
            fanout: FanOut::new(),
        }
    }

    pub fn with_fanout(mut self, fanout: FanOut) -> Self {
        self.fanout = fanout;
        self
    }

    fn cert_path(&self) -> String {
        format!("{}/{}.crt", self.cert_dir, self.registry.domain)
    }

    /// Trust store locations on every host, one per registry domain
    fn trust_paths(&self) -> Vec<String> {
        let mut domains = vec![self.registry.domain.as_str()];
        if self.registry.domain != DEFAULT_REGISTRY_DOMAIN {
            domains.push(DEFAULT_REGISTRY_DOMAIN);
        }
        domains
            .into_iter()
            .map(|domain| format!("{}/{}:{}/ca.crt", DOCKER_CERTS_DIR, domain, self.registry.port))
            .collect()
    }
}

#[async_trait]
impl CertService for RemoteCertService {
    async fn generate(
        &self,
        descriptor: &CertificateDescriptor,
    ) -> Result<(PathBuf, PathBuf), KfError> {
        let cert = format!("{}/{}.crt", descriptor.output_dir, descriptor.common_name);
        let key = format!("{}/{}.key", descriptor.output_dir, descriptor.common_name);
        tracing::info!("Issuing certificate for {} on {}", descriptor.common_name, self.registry_ip);
        self.executor
            .run(self.registry_ip, &openssl_command(descriptor, &cert, &key))
            .await
            .map_err(|e| KfError::host(self.registry_ip, e))?;
        Ok((PathBuf::from(cert), PathBuf::from(key)))
    }

    async fn send(&self, hosts: &[IpAddr]) -> Result<(), KfError> {
        if hosts.is_empty() {
            return Ok(());
        }
        let local = self.tmp_dir.join(format!("{}.crt", self.registry.domain));
        self.executor
            .fetch(self.registry_ip, &self.cert_path(), &local)
            .await
            .map_err(|e| KfError::host(self.registry_ip, e))?;

        let local = Arc::new(local);
        let targets = Arc::new(self.trust_paths());
        self.fanout
            .run(hosts, |host| {
                let executor = Arc::clone(&self.executor);
                let local = Arc::clone(&local);
                let targets = Arc::clone(&targets);
                async move {
                    for target in targets.iter() {
                        executor.copy(host, &local, target).await?;
                    }
                    Ok::<(), KfError>(())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::mock::{Call, MockExecutor};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn descriptor() -> CertificateDescriptor {
        CertificateDescriptor {
            common_name: "hub.corp".into(),
            dns_names: vec!["hub.corp".into(), "sea.hub".into()],
            ips: vec![ip("10.0.0.1")],
            days: 36500,
            output_dir: "/var/lib/kforge/data/prod/rootfs/certs".into(),
        }
    }

    fn service(mock: Arc<MockExecutor>, tmp: PathBuf) -> RemoteCertService {
        let registry = RegistryConfig {
            domain: "hub.corp".into(),
            ..Default::default()
        };
        RemoteCertService::new(mock, registry, ip("10.0.0.1"), "/var/lib/kforge/data/prod/rootfs", tmp)
    }

    #[tokio::test]
    async fn test_generate_runs_openssl_on_registry_host() {
        let mock = Arc::new(MockExecutor::new());
        let (cert, key) = service(mock.clone(), PathBuf::from("/tmp"))
            .generate(&descriptor())
            .await
            .unwrap();

        assert_eq!(cert, PathBuf::from("/var/lib/kforge/data/prod/rootfs/certs/hub.corp.crt"));
        assert_eq!(key, PathBuf::from("/var/lib/kforge/data/prod/rootfs/certs/hub.corp.key"));
        let command = &mock.commands_for(ip("10.0.0.1"))[0];
        assert!(command.contains("-days 36500"));
        assert!(command.contains("-subj \"/CN=hub.corp\""));
        assert!(command.ends_with("subjectAltName=DNS:hub.corp,DNS:sea.hub,IP:10.0.0.1\""));
    }

    #[tokio::test]
    async fn test_send_fetches_once_and_copies_every_alias() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockExecutor::new());
        service(mock.clone(), dir.path().to_path_buf())
            .send(&[ip("10.0.0.2"), ip("10.0.0.3")])
            .await
            .unwrap();

        let calls = mock.calls();
        let fetches = calls.iter().filter(|c| matches!(c, Call::Fetch { .. })).count();
        assert_eq!(fetches, 1);
        assert!(calls.contains(&Call::Copy {
            host: ip("10.0.0.3"),
            local: dir.path().join("hub.corp.crt"),
            remote: "/etc/docker/certs.d/sea.hub:5000/ca.crt".into(),
        }));
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Copy { .. })).count(), 4);
    }

    #[tokio::test]
    async fn test_send_to_nobody_touches_nothing() {
        let mock = Arc::new(MockExecutor::new());
        service(mock.clone(), PathBuf::from("/tmp")).send(&[]).await.unwrap();
        assert!(mock.calls().is_empty());
    }
}
