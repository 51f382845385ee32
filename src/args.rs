use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{StoreBackend, Transport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default: bao-bootstrap.toml)
    #[arg(long, short, env = "BAO_BOOTSTRAP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize, unseal and join the fleet until quorum is reached
    Run(ClusterArgs),
    /// Probe every replica and print its state without changing anything
    Status(ClusterArgs),
    /// Delete the persisted bootstrap record
    ResetRecord(ResetArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct ClusterArgs {
    /// Kubernetes namespace of the stateful set
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Name of the stateful set running the replicas
    #[arg(long)]
    pub statefulset: Option<String>,

    /// Headless service used to address individual replicas
    #[arg(long)]
    pub headless_service: Option<String>,

    /// Fixed replica count (skips the control-plane lookup)
    #[arg(long)]
    pub replicas: Option<u32>,

    /// How commands reach a replica
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,

    /// Number of key shares generated at initialization
    #[arg(long)]
    pub key_shares: Option<u8>,

    /// Number of key shares required to unseal
    #[arg(long)]
    pub key_threshold: Option<u8>,

    /// Name of the bootstrap record
    #[arg(long)]
    pub record_name: Option<String>,

    /// Where the bootstrap record is stored
    #[arg(long, value_enum)]
    pub record_backend: Option<StoreBackend>,

    /// Directory for the file record backend
    #[arg(long)]
    pub record_dir: Option<PathBuf>,

    /// Seconds to wait for the whole fleet to respond
    #[arg(long)]
    pub fleet_wait_secs: Option<u64>,

    /// Seconds to wait for a single replica to respond
    #[arg(long)]
    pub pod_wait_secs: Option<u64>,

    /// Attempts for retried calls
    #[arg(long)]
    pub retry_attempts: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ResetArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Confirm deletion; the cluster cannot be unsealed without this record
    #[arg(long)]
    pub confirm: bool,
}
