//! `RemoteExecutor` over SSH

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use russh_keys::key::KeyPair;

use kf_core::error::RemoteError;
use kf_core::traits::RemoteExecutor;
use kf_core::{Cluster, SshConfig};

use crate::client::{load_key, SshError, SshSession};

/// Executes commands on cluster hosts over SSH
///
/// Every call opens its own session; `run_all` reuses one session for the
/// whole sequence. Nothing is retried.
#[derive(Default)]
pub struct SshExecutor {
    /// Effective credentials per managed host
    hosts: DashMap<IpAddr, SshConfig>,
    /// Loaded private keys by path
    keys: DashMap<PathBuf, Arc<KeyPair>>,
}

impl SshExecutor {
    /// Executor for every host of `cluster`
    pub fn new(cluster: &Cluster) -> Self {
        let executor = Self::default();
        for ip in cluster.all_ips() {
            executor.register(ip, cluster.ssh_for(ip));
        }
        executor
    }

    /// Manage `host` with the given credentials, replacing earlier ones
    pub fn register(&self, host: IpAddr, ssh: SshConfig) {
        self.hosts.insert(host, ssh);
    }

    /// Whether `host` is managed by this executor
    pub fn manages(&self, host: IpAddr) -> bool {
        self.hosts.contains_key(&host)
    }

    fn credentials(&self, host: IpAddr) -> Result<SshConfig, RemoteError> {
        self.hosts
            .get(&host)
            .map(|entry| entry.value().clone())
            .ok_or(RemoteError::UnknownHost(host))
    }

    fn key_for(&self, ssh: &SshConfig) -> Result<Option<Arc<KeyPair>>, SshError> {
        let Some(path) = &ssh.private_key else {
            return Ok(None);
        };
        if let Some(key) = self.keys.get(path) {
            return Ok(Some(Arc::clone(key.value())));
        }
        let key = load_key(path, ssh.private_key_passphrase.as_deref())?;
        self.keys.insert(path.clone(), Arc::clone(&key));
        Ok(Some(key))
    }

    async fn session(&self, host: IpAddr, command: &str) -> Result<SshSession, RemoteError> {
        let ssh = self.credentials(host)?;
        let connect = async {
            let key = self.key_for(&ssh)?;
            SshSession::connect(host, &ssh, key).await
        };
        connect.await.map_err(|e| failed(host, command, e))
    }

    /// Run one command on an open session, failing on a non-zero exit
    async fn exec(
        session: &SshSession,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>, RemoteError> {
        let host = session.host();
        tracing::debug!("[{}] {}", host, command);
        let output = session
            .exec(command, stdin)
            .await
            .map_err(|e| failed(host, command, e))?;
        if !output.success() {
            return Err(RemoteError::ExecutionFailed {
                host,
                command: command.to_string(),
                reason: output.failure_reason(),
            });
        }
        Ok(output.stdout)
    }

    async fn upload_file(
        session: &SshSession,
        local: &Path,
        remote: &str,
    ) -> Result<(), RemoteError> {
        let bytes = tokio::fs::read(local).await?;
        let executable = is_executable(local).await;
        let command = upload_command(remote, executable);
        Self::exec(session, &command, Some(&bytes)).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: IpAddr, command: &str) -> Result<String, RemoteError> {
        let session = self.session(host, command).await?;
        let result = Self::exec(&session, command, None).await;
        session.close().await;
        result.map(|stdout| String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn run_all(&self, host: IpAddr, commands: &[String]) -> Result<(), RemoteError> {
        let Some(first) = commands.first() else {
            return Ok(());
        };
        let session = self.session(host, first).await?;
        let mut result = Ok(());
        for command in commands {
            if let Err(e) = Self::exec(&session, command, None).await {
                result = Err(e);
                break;
            }
        }
        session.close().await;
        result
    }

    async fn copy(&self, host: IpAddr, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let session = self.session(host, remote).await?;
        let result = async {
            let files = collect_files(local).await?;
            tracing::debug!("Copying {} file(s) to {}:{}", files.len(), host, remote);
            for (path, relative) in files {
                let target = join_remote(remote, &relative);
                Self::upload_file(&session, &path, &target).await?;
            }
            Ok::<(), RemoteError>(())
        }
        .await;
        session.close().await;
        result
    }

    async fn fetch(&self, host: IpAddr, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let command = format!("cat {}", shell_quote(remote));
        let session = self.session(host, &command).await?;
        let result = Self::exec(&session, &command, None).await;
        session.close().await;
        let content = result?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, content).await?;
        Ok(())
    }
}

fn failed(host: IpAddr, command: &str, err: SshError) -> RemoteError {
    RemoteError::ExecutionFailed {
        host,
        command: command.to_string(),
        reason: err.to_string(),
    }
}

/// Quote `value` for a POSIX shell
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command that writes stdin to `remote`, creating its parent directory
fn upload_command(remote: &str, executable: bool) -> String {
    let parent = match remote.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    };
    let mut command = format!(
        "mkdir -p {} && cat > {}",
        shell_quote(parent),
        shell_quote(remote)
    );
    if executable {
        command.push_str(&format!(" && chmod +x {}", shell_quote(remote)));
    }
    command
}

fn join_remote(remote: &str, relative: &str) -> String {
    if relative.is_empty() {
        remote.to_string()
    } else {
        format!("{}/{}", remote.trim_end_matches('/'), relative)
    }
}

/// Files under `local` with their `/`-separated path relative to it
///
/// A plain file yields itself with an empty relative path.
async fn collect_files(local: &Path) -> std::io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    if !tokio::fs::metadata(local).await?.is_dir() {
        files.push((local.to_path_buf(), String::new()));
        return Ok(files);
    }

    let mut pending = vec![local.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(local)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path, relative));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::metadata(path)
        .await
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{Host, Role};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_host_is_rejected_before_connecting() {
        let mut cluster = Cluster::new("c", "img");
        cluster.hosts.push(Host::new(vec![ip("10.0.0.1")], Role::Master));
        let executor = SshExecutor::new(&cluster);

        let err = executor.run(ip("10.0.0.9"), "true").await.unwrap_err();
        assert!(matches!(err, RemoteError::UnknownHost(h) if h == ip("10.0.0.9")));
        assert!(executor.manages(ip("10.0.0.1")));
    }

    #[tokio::test]
    async fn test_run_all_with_no_commands_is_noop() {
        let executor = SshExecutor::default();
        executor.run_all(ip("10.0.0.9"), &[]).await.unwrap();
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_upload_command() {
        assert_eq!(
            upload_command("/var/lib/kforge/rootfs/init.sh", true),
            "mkdir -p '/var/lib/kforge/rootfs' && cat > '/var/lib/kforge/rootfs/init.sh' \
             && chmod +x '/var/lib/kforge/rootfs/init.sh'"
        );
        assert_eq!(upload_command("/ca.crt", false), "mkdir -p '/' && cat > '/ca.crt'");
    }

    #[tokio::test]
    async fn test_collect_files_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("Metadata"), "{}").unwrap();
        std::fs::write(dir.path().join("scripts/init.sh"), "true").unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        let relative: Vec<&str> = files.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(relative, vec!["Metadata", "scripts/init.sh"]);

        let single = collect_files(&dir.path().join("Metadata")).await.unwrap();
        assert_eq!(single[0].1, "");
        assert_eq!(join_remote("/etc/kforge/ca.crt", &single[0].1), "/etc/kforge/ca.crt");
        assert_eq!(join_remote("/opt/rootfs/", "scripts/init.sh"), "/opt/rootfs/scripts/init.sh");
    }
}
