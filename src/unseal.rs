use std::fmt;

use tracing::{debug, info, warn};

use crate::error::ShareRejected;
use crate::material::BootstrapMaterial;
use crate::replica::{ReplicaClient, ReplicaRef};
use crate::retry::{Backoff, with_retry, with_retry_unless};
use crate::status::{StatusReport, TriState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsealOutcome {
    AlreadyUnsealed,
    Unsealed { applied: usize },
    /// Shares were delivered but the replica stayed sealed.
    StillSealed { applied: usize },
    Unreachable { reason: String },
}

impl UnsealOutcome {
    #[must_use]
    pub fn is_unsealed(&self) -> bool {
        matches!(self, Self::AlreadyUnsealed | Self::Unsealed { .. })
    }

    /// Number of shares accepted by the replica during this call.
    #[must_use]
    pub fn applied(&self) -> usize {
        match self {
            Self::Unsealed { applied } | Self::StillSealed { applied } => *applied,
            Self::AlreadyUnsealed | Self::Unreachable { .. } => 0,
        }
    }
}

impl fmt::Display for UnsealOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUnsealed => f.write_str("already unsealed"),
            Self::Unsealed { applied } => write!(f, "unsealed ({applied} shares)"),
            Self::StillSealed { applied } => write!(f, "sealed after {applied} shares"),
            Self::Unreachable { .. } => f.write_str("unreachable"),
        }
    }
}

/// Applies key shares to sealed replicas.
#[derive(Debug)]
pub struct UnsealCoordinator<'a, R> {
    client: &'a R,
    backoff: Backoff,
}

impl<'a, R: ReplicaClient> UnsealCoordinator<'a, R> {
    #[must_use]
    pub fn new(client: &'a R, backoff: Backoff) -> Self {
        Self { client, backoff }
    }

    /// Unseals `replica` with the first `threshold` shares of `material`.
    /// Failure is reported in the outcome; the caller decides whether it is
    /// fatal.
    pub async fn unseal_replica(
        &self,
        replica: &ReplicaRef,
        material: &BootstrapMaterial,
    ) -> UnsealOutcome {
        let report = match self.status(replica).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Cannot read seal state of {replica}: {err:#}");
                return UnsealOutcome::Unreachable {
                    reason: format!("{err:#}"),
                };
            }
        };
        if report.sealed == TriState::False {
            debug!("{replica} is already unsealed");
            return UnsealOutcome::AlreadyUnsealed;
        }

        if report.progress.is_some_and(|progress| progress > 0) {
            info!("Resetting stale unseal progress on {replica}");
            if let Err(err) = with_retry(self.backoff, "unseal reset", || {
                self.client.reset_unseal(replica)
            })
            .await
            {
                warn!("Could not reset unseal progress on {replica}: {err:#}");
            }
        }

        let subset = material.unseal_subset();
        let mut applied = 0;
        let mut last = report;
        for (index, share) in subset.iter().enumerate() {
            let label = format!("unseal share {} on {replica}", index + 1);
            let reply = with_retry_unless(
                self.backoff,
                &label,
                || self.client.unseal(replica, share),
                ShareRejected::is_cause_of,
            )
            .await;
            match reply {
                Ok(reply) => {
                    applied += 1;
                    last = reply;
                    debug!("{replica}: applied {applied}/{} share(s)", subset.len());
                    if reply.sealed == TriState::False {
                        break;
                    }
                }
                Err(err) => warn!("Skipping share {} for {replica}: {err:#}", index + 1),
            }
        }

        let sealed = match self.status(replica).await {
            Ok(report) => report.sealed,
            Err(err) => {
                warn!("Cannot re-read seal state of {replica}: {err:#}");
                last.sealed
            }
        };
        if sealed == TriState::False {
            info!("{replica} unsealed with {applied} share(s)");
            UnsealOutcome::Unsealed { applied }
        } else {
            warn!(
                "{replica} is still sealed after {applied} of {} required share(s)",
                material.key_threshold
            );
            UnsealOutcome::StillSealed { applied }
        }
    }

    async fn status(&self, replica: &ReplicaRef) -> anyhow::Result<StatusReport> {
        let label = format!("seal status of {replica}");
        with_retry(self.backoff, &label, || async move {
            let report = self.client.status(replica).await?;
            if !report.is_usable() {
                anyhow::bail!("{replica} returned no seal state");
            }
            Ok(report)
        })
        .await
    }
}
