use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::channel::{CommandChannel, CommandOutput};
use crate::replica::{ControlPlane, ReplicaRef};

/// Thin wrapper around the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    context: Option<String>,
    timeout: Duration,
}

impl Kubectl {
    #[must_use]
    pub fn new(binary: &str, context: Option<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            context,
            timeout,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs kubectl with `args`, optionally feeding `stdin`.
    ///
    /// # Errors
    /// Returns an error if kubectl cannot be spawned or exceeds `timeout`.
    pub async fn run(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let full_args = self.full_args(args);
        let mut command = Command::new(&self.binary);
        command
            .args(&full_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .context("kubectl stdin was not captured")?;
            pipe.write_all(input)
                .await
                .context("Failed to write kubectl stdin")?;
            drop(pipe);
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "{} {} timed out after {}",
                    self.binary,
                    args.first().map_or("", String::as_str),
                    humantime::format_duration(timeout)
                )
            })?
            .with_context(|| format!("Failed to wait for {}", self.binary))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };
        debug!(
            "kubectl {} exited with {:?} (stdout={}B, stderr={})",
            args.first().map_or("", String::as_str),
            result.exit_code,
            result.stdout.len(),
            result.stderr.trim()
        );
        Ok(result)
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(context) = &self.context {
            full.push("--context".to_string());
            full.push(context.clone());
        }
        full.extend(args.iter().cloned());
        full
    }
}

/// Command channel backed by `kubectl exec`.
#[derive(Debug, Clone)]
pub struct KubectlExec {
    kubectl: Kubectl,
    namespace: String,
    container: Option<String>,
}

impl KubectlExec {
    #[must_use]
    pub fn new(kubectl: Kubectl, namespace: &str, container: Option<String>) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            container,
        }
    }
}

impl CommandChannel for KubectlExec {
    async fn execute(
        &self,
        replica: &ReplicaRef,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let args = exec_args(&self.namespace, &replica.name, self.container.as_deref(), argv);
        self.kubectl.run(&args, None, timeout).await
    }
}

fn exec_args(namespace: &str, pod: &str, container: Option<&str>, argv: &[String]) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        pod.to_string(),
    ];
    if let Some(container) = container {
        args.push("-c".to_string());
        args.push(container.to_string());
    }
    args.push("--".to_string());
    args.extend(argv.iter().cloned());
    args
}

/// Reads `.spec.replicas` of the stateful set.
#[derive(Debug, Clone)]
pub struct KubectlFleet {
    kubectl: Kubectl,
    namespace: String,
    statefulset: String,
}

impl KubectlFleet {
    #[must_use]
    pub fn new(kubectl: Kubectl, namespace: &str, statefulset: &str) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            statefulset: statefulset.to_string(),
        }
    }
}

impl ControlPlane for KubectlFleet {
    async fn desired_replicas(&self) -> Result<u32> {
        let args = fleet_args(&self.namespace, &self.statefulset);
        let output = self
            .kubectl
            .run(&args, None, self.kubectl.timeout())
            .await?;
        if !output.success() {
            anyhow::bail!(
                "kubectl get statefulset {} failed: {}",
                self.statefulset,
                output.stderr.trim()
            );
        }
        parse_replica_count(&output.stdout)
    }
}

fn fleet_args(namespace: &str, statefulset: &str) -> Vec<String> {
    vec![
        "get".to_string(),
        "statefulset".to_string(),
        statefulset.to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "-o".to_string(),
        "jsonpath={.spec.replicas}".to_string(),
    ]
}

fn parse_replica_count(raw: &str) -> Result<u32> {
    let trimmed = raw.trim().trim_matches('\'');
    let count: u32 = trimmed
        .parse()
        .with_context(|| format!("Unexpected replica count: {trimmed:?}"))?;
    if count == 0 {
        anyhow::bail!("Stateful set is scaled to zero replicas");
    }
    Ok(count)
}
