//! kForge CLI
//!
//! Installs, scales and tears down Kubernetes clusters over SSH:
//! - `apply` brings hosts in line with a Clusterfile
//! - `join` / `delete` add or remove hosts of an applied cluster
//! - `gen` takes over a cluster installed by other means
//! - `alpha` holds day-2 helpers

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kforge::commands::{self, ScaleArgs, SshArgs};
use kforge::context::Context;

#[derive(Parser)]
#[command(name = "kforge")]
#[command(author, version, about = "Kubernetes cluster lifecycle over SSH")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "KFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding applied cluster state and image mounts
    #[arg(long, global = true, env = "KFORGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or update a cluster from a Clusterfile
    Apply {
        /// Clusterfile to apply
        #[arg(short = 'f', long = "clusterfile")]
        file: PathBuf,
        /// Delete hosts missing from the Clusterfile without asking
        #[arg(long)]
        force: bool,
    },

    /// Add masters or workers to an applied cluster
    Join {
        #[command(flatten)]
        hosts: ScaleArgs,
        #[command(flatten)]
        ssh: SshArgs,
    },

    /// Remove hosts from a cluster, or the whole cluster
    #[command(group(
        ArgGroup::new("target")
            .required(true)
            .multiple(true)
            .args(["masters", "nodes", "all"])
    ))]
    Delete {
        #[command(flatten)]
        hosts: ScaleArgs,
        /// Tear the whole cluster down
        #[arg(short, long, conflicts_with_all = ["masters", "nodes"])]
        all: bool,
        /// Skip the confirmation
        #[arg(long)]
        force: bool,
    },

    /// Bring an existing cluster under kforge management
    Gen {
        /// Name recorded for the cluster
        #[arg(long)]
        name: String,
        /// Cluster image matching the running cluster
        #[arg(long)]
        image: String,
        /// Any reachable master
        #[arg(long)]
        master: IpAddr,
        #[command(flatten)]
        ssh: SshArgs,
    },

    /// Experimental day-2 commands
    Alpha {
        #[command(subcommand)]
        action: AlphaAction,
    },
}

#[derive(Subcommand)]
enum AlphaAction {
    /// Add IPs or domains to the API server certificate
    Cert {
        /// Comma separated IPs and DNS names
        #[arg(long = "alt-names", value_delimiter = ',', required = true)]
        alt_names: Vec<String>,
        /// Cluster to update, defaults to the only applied cluster
        #[arg(short = 'c', long = "cluster-name")]
        cluster: Option<String>,
    },

    /// Run a shell command on cluster hosts
    Exec {
        /// Shell command
        command: String,
        /// Cluster to run on, defaults to the only applied cluster
        #[arg(short = 'c', long = "cluster-name")]
        cluster: Option<String>,
        /// Only hosts with one of these roles
        #[arg(short, long, value_delimiter = ',')]
        roles: Vec<String>,
    },

    /// Remove leftovers of deleted clusters
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let ctx = Context::load(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Apply { file, force } => {
            commands::apply_command(&ctx, &file, force).await?;
        }

        Commands::Join { hosts, ssh } => {
            commands::join_command(&ctx, &hosts, &ssh).await?;
        }

        Commands::Delete { hosts, all, force } => {
            if all {
                commands::delete_cluster_command(&ctx, hosts.cluster.as_deref(), force).await?;
            } else {
                commands::delete_command(&ctx, &hosts, force).await?;
            }
        }

        Commands::Gen {
            name,
            image,
            master,
            ssh,
        } => {
            commands::gen_command(&ctx, &name, &image, master, &ssh).await?;
        }

        Commands::Alpha { action } => match action {
            AlphaAction::Cert { alt_names, cluster } => {
                commands::cert_command(&ctx, cluster.as_deref(), &alt_names).await?;
            }
            AlphaAction::Exec {
                command,
                cluster,
                roles,
            } => {
                commands::exec_command(&ctx, cluster.as_deref(), &roles, &command).await?;
            }
            AlphaAction::Prune => {
                commands::prune_command(&ctx)?;
            }
        },
    }

    Ok(())
}
