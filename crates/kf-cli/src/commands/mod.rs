//! CLI command implementations

mod alpha;
mod apply;
mod gen;
mod scale;

pub use alpha::{cert_command, exec_command, prune_command};
pub use apply::{apply_command, delete_cluster_command};
pub use gen::gen_command;
pub use scale::{delete_command, join_command, ScaleArgs};

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use kf_core::SshConfig;
use kf_orchestrator::runtime::ConfirmFn;

use crate::output;

/// SSH credentials given on the command line
#[derive(Args, Debug, Clone, Default)]
pub struct SshArgs {
    /// SSH user
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// SSH password
    #[arg(short = 'p', long = "passwd", env = "KFORGE_SSH_PASSWORD")]
    pub password: Option<String>,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// Private key used to log in
    #[arg(long = "pk")]
    pub private_key: Option<PathBuf>,

    /// Passphrase of the private key
    #[arg(long = "pk-passwd")]
    pub private_key_passphrase: Option<String>,
}

impl SshArgs {
    pub fn to_config(&self) -> SshConfig {
        SshConfig {
            user: self.user.clone(),
            password: self.password.clone(),
            port: self.port,
            private_key: self.private_key.clone(),
            private_key_passphrase: self.private_key_passphrase.clone(),
        }
    }
}

/// Terminal prompt asked before hosts are deleted
pub fn stdin_confirm() -> ConfirmFn {
    Arc::new(|prompt: &str| output::confirm(prompt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args_to_config() {
        let args = SshArgs {
            password: Some("secret".into()),
            port: Some(2222),
            ..Default::default()
        };
        let ssh = args.to_config();
        assert_eq!(ssh.user(), "root");
        assert_eq!(ssh.port(), 2222);
        assert_eq!(ssh.password.as_deref(), Some("secret"));
        assert!(SshArgs::default().to_config().is_empty());
    }
}
