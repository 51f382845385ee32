use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::CallError;
use crate::probe::StateProber;
use crate::replica::{ReplicaClient, ReplicaRef};
use crate::retry::{Backoff, with_retry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The replica is the leader itself.
    Leader,
    AlreadyMember,
    Joined,
    Failed { reason: String },
}

impl JoinOutcome {
    #[must_use]
    pub fn is_member(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for JoinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader => f.write_str("leader"),
            Self::AlreadyMember => f.write_str("already member"),
            Self::Joined => f.write_str("joined"),
            Self::Failed { .. } => f.write_str("join failed"),
        }
    }
}

/// Joins followers to the leader's raft group.
#[derive(Debug)]
pub struct MembershipManager<'a, R> {
    client: &'a R,
    backoff: Backoff,
    settle: Duration,
}

impl<'a, R: ReplicaClient> MembershipManager<'a, R> {
    #[must_use]
    pub fn new(client: &'a R, backoff: Backoff, settle: Duration) -> Self {
        Self {
            client,
            backoff,
            settle,
        }
    }

    pub async fn ensure_joined(
        &self,
        prober: &StateProber<'_, R>,
        follower: &ReplicaRef,
        leader: &ReplicaRef,
    ) -> JoinOutcome {
        if follower == leader {
            return JoinOutcome::Leader;
        }
        if prober.probe_replica(follower).await.is_raft_member {
            info!("{follower} is already a raft member");
            return JoinOutcome::AlreadyMember;
        }

        info!("Joining {follower} to {}", leader.address);
        let label = format!("raft join of {follower}");
        let joined = with_retry(self.backoff, &label, || async move {
            match self.client.raft_join(follower, &leader.address).await {
                Ok(()) => Ok(true),
                // Status lags behind membership; the join call is authoritative.
                Err(CallError::AlreadyMember { .. }) => Ok(false),
                Err(CallError::AlreadyInitialized { replica }) => {
                    anyhow::bail!("{replica} is initialized outside the raft group")
                }
                Err(CallError::Reply(err) | CallError::Other(err)) => Err(err),
            }
        })
        .await;

        match joined {
            Ok(true) => {
                tokio::time::sleep(self.settle).await;
                JoinOutcome::Joined
            }
            Ok(false) => {
                info!("{follower} reported it is already a raft member");
                JoinOutcome::AlreadyMember
            }
            Err(err) => {
                warn!("Failed to join {follower}: {err:#}");
                JoinOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }
}
