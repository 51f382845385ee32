mod defaults;
mod validation;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::ValueEnum;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::args::ClusterArgs;
use crate::replica::ReplicaNaming;
use crate::retry::Backoff;
use crate::store::RecordRef;

pub use defaults::DEFAULT_CONFIG_PATH;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub init: InitSettings,
    pub record: RecordSettings,
    pub timeouts: TimeoutSettings,
    pub retry: RetrySettings,
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterSettings {
    pub namespace: String,
    pub statefulset: String,
    pub headless_service: String,
    pub api_scheme: String,
    pub api_port: u16,
    /// Static replica count; when unset the control plane is asked.
    #[serde(default)]
    pub replicas: Option<u32>,
    pub fallback_replicas: u32,
    pub transport: Transport,
    pub cli_binary: String,
    #[serde(default)]
    pub cli_address: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    pub kubectl: String,
    #[serde(default)]
    pub kube_context: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Run the server CLI inside each pod via `kubectl exec`
    Exec,
    /// Call each replica's HTTP API directly
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InitSettings {
    pub key_shares: u8,
    pub key_threshold: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordSettings {
    pub name: String,
    /// Defaults to `cluster.namespace`.
    #[serde(default)]
    pub namespace: Option<String>,
    pub backend: StoreBackend,
    pub file_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Kubernetes `Secret` object
    Kubernetes,
    /// JSON file on local disk
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutSettings {
    pub fleet_wait_secs: u64,
    pub pod_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub join_settle_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
}

/// Wait durations derived from [`TimeoutSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub fleet_wait: Duration,
    pub pod_wait: Duration,
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    pub join_settle: Duration,
}

impl Settings {
    /// Loads defaults, then the optional TOML file, then `BAO_BOOTSTRAP__*`
    /// environment variables.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        s = s.add_source(File::from(path).required(false));

        // e.g. BAO_BOOTSTRAP__CLUSTER__NAMESPACE, BAO_BOOTSTRAP__INIT__KEY_SHARES
        s = s.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &ClusterArgs) {
        if let Some(namespace) = &args.namespace {
            namespace.clone_into(&mut self.cluster.namespace);
        }
        if let Some(statefulset) = &args.statefulset {
            statefulset.clone_into(&mut self.cluster.statefulset);
        }
        if let Some(service) = &args.headless_service {
            service.clone_into(&mut self.cluster.headless_service);
        }
        if let Some(replicas) = args.replicas {
            self.cluster.replicas = Some(replicas);
        }
        if let Some(transport) = args.transport {
            self.cluster.transport = transport;
        }
        if let Some(shares) = args.key_shares {
            self.init.key_shares = shares;
        }
        if let Some(threshold) = args.key_threshold {
            self.init.key_threshold = threshold;
        }
        if let Some(name) = &args.record_name {
            name.clone_into(&mut self.record.name);
        }
        if let Some(backend) = args.record_backend {
            self.record.backend = backend;
        }
        if let Some(dir) = &args.record_dir {
            dir.clone_into(&mut self.record.file_dir);
        }
        if let Some(secs) = args.fleet_wait_secs {
            self.timeouts.fleet_wait_secs = secs;
        }
        if let Some(secs) = args.pod_wait_secs {
            self.timeouts.pod_wait_secs = secs;
        }
        if let Some(attempts) = args.retry_attempts {
            self.retry.max_attempts = attempts;
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        validation::validate_settings(self)
    }

    #[must_use]
    pub fn naming(&self) -> ReplicaNaming {
        ReplicaNaming {
            statefulset: self.cluster.statefulset.clone(),
            headless_service: self.cluster.headless_service.clone(),
            scheme: self.cluster.api_scheme.clone(),
            port: self.cluster.api_port,
        }
    }

    #[must_use]
    pub fn record_ref(&self) -> RecordRef {
        let namespace = self
            .record
            .namespace
            .as_deref()
            .unwrap_or(&self.cluster.namespace);
        RecordRef::new(&self.record.name, namespace)
    }

    #[must_use]
    pub fn timing(&self) -> Timing {
        Timing {
            fleet_wait: Duration::from_secs(self.timeouts.fleet_wait_secs),
            pod_wait: Duration::from_secs(self.timeouts.pod_wait_secs),
            poll_interval: Duration::from_secs(self.timeouts.poll_interval_secs),
            command_timeout: Duration::from_secs(self.timeouts.command_timeout_secs),
            join_settle: Duration::from_secs(self.timeouts.join_settle_secs),
        }
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.initial_delay_secs),
        )
    }
}
