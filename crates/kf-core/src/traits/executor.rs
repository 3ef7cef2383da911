//! Remote execution trait

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;

use crate::error::RemoteError;

/// Runs commands and moves files on managed hosts
///
/// Implementations never retry. A connection failure and a non-zero exit
/// status both surface as [`RemoteError::ExecutionFailed`]. Hosts the
/// executor was not built for are rejected with [`RemoteError::UnknownHost`]
/// before anything is sent.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one command and return its stdout
    async fn run(&self, host: IpAddr, command: &str) -> Result<String, RemoteError>;

    /// Run commands in order over one connection, stopping at the first failure
    async fn run_all(&self, host: IpAddr, commands: &[String]) -> Result<(), RemoteError>;

    /// Copy a local file or directory to `remote` on the host
    async fn copy(&self, host: IpAddr, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Copy the remote file `remote` to `local`
    async fn fetch(&self, host: IpAddr, remote: &str, local: &Path) -> Result<(), RemoteError>;

    /// Connect, authenticate and run a no-op
    async fn ping(&self, host: IpAddr) -> Result<(), RemoteError> {
        self.run(host, "true").await.map(|_| ())
    }
}
