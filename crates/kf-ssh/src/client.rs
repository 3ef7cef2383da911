//! SSH client session
//!
//! A thin wrapper over a russh client handle: connect and authenticate with
//! the host's effective credentials, then run commands on fresh exec channels.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use thiserror::Error;

use kf_core::SshConfig;

/// Failures while talking to one host
#[derive(Debug, Error)]
pub enum SshError {
    /// TCP connect or SSH handshake failed
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    /// Private key could not be loaded
    #[error("failed to load private key {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    /// Neither a password nor a key was configured
    #[error("no password or private key configured for {user}")]
    NoCredentials { user: String },

    /// The server refused our credentials
    #[error("authentication rejected for user {user}")]
    AuthRejected { user: String },

    /// Channel-level protocol error
    #[error("ssh channel error: {0}")]
    Channel(#[from] russh::Error),

    /// The channel closed without reporting an exit status
    #[error("command did not report an exit status")]
    NoExitStatus,
}

/// Result of one remote command
#[derive(Debug, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Short failure description for error reporting
    pub fn failure_reason(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("exit status {}", self.exit_status)
        } else {
            format!("exit status {}: {}", self.exit_status, stderr)
        }
    }
}

/// Load a private key for public key authentication
pub fn load_key(path: &Path, passphrase: Option<&str>) -> Result<Arc<KeyPair>, SshError> {
    russh_keys::load_secret_key(path, passphrase)
        .map(Arc::new)
        .map_err(|e| SshError::KeyLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// An authenticated session to one host
pub struct SshSession {
    handle: Handle<ClientHandler>,
    host: IpAddr,
}

impl SshSession {
    /// Connect to `host` and authenticate
    ///
    /// A configured key is tried first, then the password.
    pub async fn connect(
        host: IpAddr,
        ssh: &SshConfig,
        key: Option<Arc<KeyPair>>,
    ) -> Result<Self, SshError> {
        let addr = SocketAddr::new(host, ssh.port());
        let config = Arc::new(Config::default());

        tracing::debug!("Connecting to {}", addr);
        let mut handle = client::connect(config, addr, ClientHandler { host })
            .await
            .map_err(|e| SshError::Connect {
                addr,
                reason: e.to_string(),
            })?;

        let user = ssh.user().to_string();
        let mut authenticated = false;

        if let Some(key) = key {
            tracing::debug!("Authenticating to {} as '{}' with key", host, user);
            authenticated = handle.authenticate_publickey(&user, key).await?;
        }
        if !authenticated {
            if let Some(password) = &ssh.password {
                tracing::debug!("Authenticating to {} as '{}' with password", host, user);
                authenticated = handle.authenticate_password(&user, password).await?;
            } else if ssh.private_key.is_none() {
                return Err(SshError::NoCredentials { user });
            }
        }
        if !authenticated {
            return Err(SshError::AuthRejected { user });
        }

        Ok(Self { handle, host })
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Run `command` on a new channel, optionally feeding `stdin`
    pub async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        if let Some(input) = stdin {
            channel.data(input).await?;
            channel.eof().await?;
        }

        let mut output = ExecOutput::default();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        output.stderr.extend_from_slice(data);
                    }
                }
                // Data may still follow the exit status, keep draining
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        output.exit_status = exit_status.ok_or(SshError::NoExitStatus)?;
        Ok(output)
    }

    /// Close the session
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.host, e);
        }
    }
}

/// russh client handler
pub struct ClientHandler {
    host: IpAddr,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Cluster hosts are freshly provisioned machines, any host key is accepted
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Host key of {}: {}",
            self.host,
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}
