use anyhow::{Context, Result};
use bao_bootstrap::args::{ClusterArgs, Command};
use bao_bootstrap::config::{Settings, StoreBackend, Transport};
use bao_bootstrap::kubectl::{Kubectl, KubectlExec, KubectlFleet};
use bao_bootstrap::openbao::HttpReplicaClient;
use bao_bootstrap::replica::exec::ExecReplicaClient;
use bao_bootstrap::replica::{ControlPlane, ReplicaClient};
use bao_bootstrap::store::{FileSecretStore, KubeSecretStore, SecretStore};
use bao_bootstrap::{Cli, Orchestrator};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Run,
    Status,
    ResetRecord,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("bao-bootstrap error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the command reached its goal.
fn run() -> Result<bool> {
    let cli = Cli::parse();
    let (action, cluster_args) = match cli.command {
        Command::Run(args) => (Action::Run, args),
        Command::Status(args) => (Action::Status, args),
        Command::ResetRecord(args) => {
            if !args.confirm {
                anyhow::bail!(
                    "reset-record deletes the only copy of the unseal keys; pass --confirm to proceed"
                );
            }
            (Action::ResetRecord, args.cluster)
        }
    };

    let settings = load_settings(cli.config, cli.debug, &cluster_args)?;
    init_tracing(settings.debug);

    let runtime =
        tokio::runtime::Runtime::new().context("Failed to initialize async runtime")?;
    runtime.block_on(execute(settings, action))
}

fn load_settings(
    config: Option<std::path::PathBuf>,
    debug: bool,
    args: &ClusterArgs,
) -> Result<Settings> {
    let mut settings = Settings::new(config).context("Failed to load configuration")?;
    settings.merge_with_args(args);
    settings.debug |= debug;
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(settings: Settings, action: Action) -> Result<bool> {
    let timing = settings.timing();
    let kubectl = Kubectl::new(
        &settings.cluster.kubectl,
        settings.cluster.kube_context.clone(),
        timing.command_timeout,
    );
    match settings.cluster.transport {
        Transport::Exec => {
            let channel = KubectlExec::new(
                kubectl.clone(),
                &settings.cluster.namespace,
                settings.cluster.container.clone(),
            );
            let client = ExecReplicaClient::new(
                channel,
                &settings.cluster.cli_binary,
                settings.cluster.cli_address.clone(),
                timing.command_timeout,
            );
            with_store(settings, client, kubectl, action).await
        }
        Transport::Http => {
            let client = HttpReplicaClient::new(timing.command_timeout)?;
            with_store(settings, client, kubectl, action).await
        }
    }
}

async fn with_store<R: ReplicaClient>(
    settings: Settings,
    client: R,
    kubectl: Kubectl,
    action: Action,
) -> Result<bool> {
    let fleet = KubectlFleet::new(
        kubectl.clone(),
        &settings.cluster.namespace,
        &settings.cluster.statefulset,
    );
    match settings.record.backend {
        StoreBackend::Kubernetes => {
            let store = KubeSecretStore::new(kubectl);
            dispatch(Orchestrator::new(settings, client, fleet, store), action).await
        }
        StoreBackend::File => {
            let store = FileSecretStore::new(&settings.record.file_dir);
            dispatch(Orchestrator::new(settings, client, fleet, store), action).await
        }
    }
}

async fn dispatch<R, P, S>(orchestrator: Orchestrator<R, P, S>, action: Action) -> Result<bool>
where
    R: ReplicaClient,
    P: ControlPlane,
    S: SecretStore,
{
    match action {
        Action::Run => {
            let report = orchestrator.run().await;
            cli::output::print_run_report(&report);
            Ok(report.is_success())
        }
        Action::Status => {
            let report = orchestrator.inspect().await;
            cli::output::print_status_report(&report);
            Ok(true)
        }
        Action::ResetRecord => {
            let deleted = orchestrator.reset_record().await?;
            cli::output::print_reset_result(&orchestrator.record(), deleted);
            Ok(true)
        }
    }
}
