//! In-cluster image registry
//!
//! The registry runs as a container on the registry host (master-0 unless
//! configured otherwise). Every host resolves its domain through
//! `/etc/hosts` and trusts its self-signed certificate.

use kf_core::config::DEFAULT_REGISTRY_DOMAIN;
use kf_core::traits::CertificateDescriptor;
use kf_core::KfError;
use std::net::IpAddr;

use super::commands;
use super::{KubernetesRuntime, RuntimeContext};

const REGISTRY_CERT_DAYS: u32 = 36500;

impl RuntimeContext {
    /// Domains the registry answers to; the default domain is always kept
    pub fn registry_domains(&self) -> Vec<&str> {
        let mut domains = vec![self.registry.domain.as_str()];
        if self.registry.domain != DEFAULT_REGISTRY_DOMAIN {
            domains.push(DEFAULT_REGISTRY_DOMAIN);
        }
        domains
    }

    /// Point the registry domains at the registry host
    pub fn registry_hosts(&self) -> String {
        self.registry_domains()
            .into_iter()
            .map(|domain| commands::add_etc_hosts(self.registry_ip, domain))
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// [`Self::registry_hosts`], then log in when credentials are set
    pub fn registry_hosts_and_login(&self) -> String {
        let hosts = self.registry_hosts();
        match self.registry.credentials() {
            Some((user, password)) => format!(
                "{} && {}",
                hosts,
                commands::registry_login(&self.registry.repo(), user, password)
            ),
            None => hosts,
        }
    }

    /// Forget the registry: hosts entries and trusted certificates
    pub fn registry_cleanup(&self) -> Vec<String> {
        let domains = self.registry_domains();
        let mut cleanup: Vec<String> = domains
            .iter()
            .map(|domain| commands::remove_etc_hosts(domain))
            .collect();
        cleanup.extend(domains.iter().map(|domain| commands::remove_registry_certs(domain)));
        cleanup
    }

    fn registry_cert(&self) -> CertificateDescriptor {
        CertificateDescriptor {
            common_name: self.registry.domain.clone(),
            dns_names: self.registry_domains().into_iter().map(str::to_string).collect(),
            ips: vec![self.registry_ip],
            days: REGISTRY_CERT_DAYS,
            output_dir: format!("{}/certs", self.rootfs),
        }
    }
}

impl KubernetesRuntime {
    /// Issue the registry's self-signed certificate
    pub(super) async fn generate_registry_cert(&self) -> Result<(), KfError> {
        let descriptor = self.ctx.registry_cert();
        let (cert, key) = self.certs.generate(&descriptor).await?;
        tracing::debug!(
            "Registry certificate {} / {}",
            cert.display(),
            key.display()
        );
        Ok(())
    }

    /// Make `hosts` trust the registry certificate
    pub(super) async fn send_registry_cert(&self, hosts: &[IpAddr]) -> Result<(), KfError> {
        if hosts.is_empty() {
            return Ok(());
        }
        self.certs.send(hosts).await
    }

    /// Start the registry container on the registry host
    pub(super) async fn start_registry(&self) -> Result<(), KfError> {
        let ctx = &self.ctx;
        tracing::info!("Starting registry {} on {}", ctx.registry.repo(), ctx.registry_ip);
        let commands = vec![
            ctx.registry_hosts(),
            commands::apply_registry(&ctx.rootfs, ctx.registry.port, &ctx.registry.domain),
        ];
        self.executor.run_all(ctx.registry_ip, &commands).await?;
        Ok(())
    }

    /// Remove the registry container
    pub(super) async fn delete_registry(&self) -> Result<(), KfError> {
        self.exec(self.ctx.registry_ip, &commands::delete_registry())
            .await
            .map(|_| ())
    }
}
