use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::channel::{CommandChannel, CommandOutput};
use crate::error::{CallError, ShareRejected};
use crate::replica::{
    InitReply, ReplicaClient, ReplicaRef, is_already_initialized, is_already_member,
    is_share_rejected,
};
use crate::status::{StatusReport, extract_json, parse_json_status, parse_status};

/// Drives the service CLI inside each replica through a [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ExecReplicaClient<C> {
    channel: C,
    binary: String,
    address: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct InitDocument {
    #[serde(default, alias = "unseal_keys_b64")]
    keys_base64: Vec<String>,
    #[serde(default, alias = "unseal_keys_hex")]
    keys: Vec<String>,
    #[serde(default)]
    root_token: String,
}

impl<C: CommandChannel> ExecReplicaClient<C> {
    #[must_use]
    pub fn new(channel: C, binary: &str, address: Option<String>, timeout: Duration) -> Self {
        Self {
            channel,
            binary: binary.to_string(),
            address,
            timeout,
        }
    }

    fn argv(&self, subcommand: &[&str], flags: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(subcommand.len() + flags.len() + 2);
        argv.push(self.binary.clone());
        argv.extend(subcommand.iter().map(ToString::to_string));
        if let Some(address) = &self.address {
            argv.push(format!("-address={address}"));
        }
        argv.extend(flags.iter().cloned());
        argv
    }

    async fn run(&self, replica: &ReplicaRef, argv: &[String]) -> Result<CommandOutput> {
        let output = self
            .channel
            .execute(replica, argv, self.timeout)
            .await
            .with_context(|| format!("Command channel to {replica} failed"))?;
        debug!(
            "{replica}: {} {} exited with {:?}",
            self.binary,
            argv.get(1).map_or("", String::as_str),
            output.exit_code
        );
        Ok(output)
    }

    fn parse_reply(replica: &ReplicaRef, output: &CommandOutput) -> Result<StatusReport> {
        parse_status(&output.stdout, &output.stderr, output.exit_code)
            .filter(StatusReport::is_usable)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{replica} returned no recognizable status (exit {:?}): {}",
                    output.exit_code,
                    output.stderr.trim()
                )
            })
    }

    /// `operator unseal` exits 2 on every error; only a seal-status document
    /// on stdout marks the exit as a reply from a still sealed node.
    fn is_sealed_reply(output: &CommandOutput) -> bool {
        output.exit_code == Some(2) && parse_json_status(&output.stdout).is_some()
    }
}

impl<C: CommandChannel> ReplicaClient for ExecReplicaClient<C> {
    async fn status(&self, replica: &ReplicaRef) -> Result<StatusReport> {
        let argv = self.argv(&["status"], &["-format=json".to_string()]);
        let output = self.run(replica, &argv).await?;
        Self::parse_reply(replica, &output)
    }

    async fn initialize(
        &self,
        replica: &ReplicaRef,
        shares: u8,
        threshold: u8,
    ) -> Result<InitReply, CallError> {
        let argv = self.argv(
            &["operator", "init"],
            &[
                format!("-key-shares={shares}"),
                format!("-key-threshold={threshold}"),
                "-format=json".to_string(),
            ],
        );
        let output = self.run(replica, &argv).await?;
        if !output.success() {
            let combined = output.combined();
            if is_already_initialized(&combined) {
                return Err(CallError::AlreadyInitialized {
                    replica: replica.name.clone(),
                });
            }
            return Err(anyhow::anyhow!(
                "{replica}: operator init exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )
            .into());
        }
        parse_init_reply(&output.stdout).map_err(CallError::Reply)
    }

    async fn unseal(&self, replica: &ReplicaRef, share: &str) -> Result<StatusReport> {
        let argv = self.argv(
            &["operator", "unseal"],
            &["-format=json".to_string(), share.to_string()],
        );
        let output = self.run(replica, &argv).await?;
        if !output.success() && !Self::is_sealed_reply(&output) {
            if is_share_rejected(&output.combined()) {
                return Err(ShareRejected {
                    replica: replica.name.clone(),
                    reason: output.stderr.trim().to_string(),
                }
                .into());
            }
            anyhow::bail!(
                "{replica}: operator unseal exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        Self::parse_reply(replica, &output)
    }

    async fn reset_unseal(&self, replica: &ReplicaRef) -> Result<()> {
        let argv = self.argv(
            &["operator", "unseal"],
            &["-reset".to_string(), "-format=json".to_string()],
        );
        let output = self.run(replica, &argv).await?;
        if !output.success() && !Self::is_sealed_reply(&output) {
            anyhow::bail!(
                "{replica}: operator unseal -reset exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(())
    }

    async fn raft_join(&self, replica: &ReplicaRef, leader_address: &str) -> Result<(), CallError> {
        let argv = self.argv(&["operator", "raft", "join"], &[leader_address.to_string()]);
        let output = self.run(replica, &argv).await?;
        if output.success() {
            return Ok(());
        }
        if is_already_member(&output.combined()) {
            return Err(CallError::AlreadyMember {
                replica: replica.name.clone(),
            });
        }
        Err(anyhow::anyhow!(
            "{replica}: raft join exited with {:?}: {}",
            output.exit_code,
            output.stderr.trim()
        )
        .into())
    }
}

fn parse_init_reply(stdout: &str) -> Result<InitReply> {
    let value = extract_json(stdout).context("operator init printed no JSON document")?;
    let doc: InitDocument =
        serde_json::from_value(value).context("Failed to parse operator init reply")?;
    let keys = if doc.keys_base64.is_empty() {
        doc.keys
    } else {
        doc.keys_base64
    };
    Ok(InitReply {
        root_token: doc.root_token,
        keys,
    })
}
