//! The bootstrap state machine.
//!
//! Every phase re-reads the current state of the fleet before acting, so an
//! invocation against a partially or fully bootstrapped cluster converges
//! instead of repeating work. Replicas are handled one at a time in
//! ascending ordinal order.

use std::fmt;

use tracing::{info, warn};

use crate::config::{Settings, Timing};
use crate::error::BootstrapError;
use crate::init::Initializer;
use crate::material::BootstrapMaterial;
use crate::probe::StateProber;
use crate::raft::{JoinOutcome, MembershipManager};
use crate::replica::{ControlPlane, ReplicaClient, ReplicaRef, Topology};
use crate::report::{BootstrapReport, mask_value};
use crate::retry::{Backoff, with_retry};
use crate::store::{RecordRef, SecretStore};
use crate::unseal::{UnsealCoordinator, UnsealOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    AwaitingFleet,
    CheckInit,
    Initializing,
    UnsealLeader,
    JoinAndUnsealFollowers,
    VerifyQuorum,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::AwaitingFleet => "awaiting-fleet",
            Self::CheckInit => "check-init",
            Self::Initializing => "initializing",
            Self::UnsealLeader => "unseal-leader",
            Self::JoinAndUnsealFollowers => "join-and-unseal-followers",
            Self::VerifyQuorum => "verify-quorum",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum State {
    Start,
    AwaitingFleet(Topology),
    CheckInit(Topology),
    Initializing(Topology),
    UnsealLeader(Topology, BootstrapMaterial),
    JoinAndUnsealFollowers(Topology, BootstrapMaterial),
    VerifyQuorum(Topology),
    Done,
    Failed(BootstrapError),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            Self::Start => Phase::Start,
            Self::AwaitingFleet(_) => Phase::AwaitingFleet,
            Self::CheckInit(_) => Phase::CheckInit,
            Self::Initializing(_) => Phase::Initializing,
            Self::UnsealLeader(..) => Phase::UnsealLeader,
            Self::JoinAndUnsealFollowers(..) => Phase::JoinAndUnsealFollowers,
            Self::VerifyQuorum(_) => Phase::VerifyQuorum,
            Self::Done => Phase::Done,
            Self::Failed(_) => Phase::Failed,
        }
    }
}

/// Drives a fleet from any state to unsealed and quorum-complete.
#[derive(Debug)]
pub struct Orchestrator<R, P, S> {
    settings: Settings,
    client: R,
    control_plane: P,
    store: S,
}

impl<R, P, S> Orchestrator<R, P, S>
where
    R: ReplicaClient,
    P: ControlPlane,
    S: SecretStore,
{
    #[must_use]
    pub fn new(settings: Settings, client: R, control_plane: P, store: S) -> Self {
        Self {
            settings,
            client,
            control_plane,
            store,
        }
    }

    #[must_use]
    pub fn record(&self) -> RecordRef {
        self.settings.record_ref()
    }

    fn backoff(&self) -> Backoff {
        self.settings.backoff()
    }

    fn timing(&self) -> Timing {
        self.settings.timing()
    }

    fn prober(&self) -> StateProber<'_, R> {
        StateProber::new(&self.client, self.backoff(), self.timing().poll_interval)
    }

    fn initializer(&self) -> Initializer<'_, R, S> {
        Initializer::new(
            &self.client,
            &self.store,
            self.settings.record_ref(),
            self.backoff(),
        )
    }

    fn unsealer(&self) -> UnsealCoordinator<'_, R> {
        UnsealCoordinator::new(&self.client, self.backoff())
    }

    fn membership(&self) -> MembershipManager<'_, R> {
        MembershipManager::new(&self.client, self.backoff(), self.timing().join_settle)
    }

    /// Expected topology: the configured count if set, otherwise the
    /// control plane's.
    pub async fn topology(&self) -> Topology {
        let expected = match self.settings.cluster.replicas {
            Some(count) => count,
            None => {
                self.prober()
                    .fleet_size(&self.control_plane, self.settings.cluster.fallback_replicas)
                    .await
            }
        };
        Topology::new(&self.settings.naming(), expected)
    }

    /// Runs the state machine to `Done` or `Failed`. Failure keeps whatever
    /// was already applied so a later run can resume.
    pub async fn run(&self) -> BootstrapReport {
        let mut report = BootstrapReport::new(self.settings.record_ref(), self.store.kind());
        if let Err(err) = self.settings.validate() {
            report.fail(Phase::Start, BootstrapError::Precondition(format!("{err:#}")));
            return report;
        }

        let mut state = State::Start;
        loop {
            let phase = state.phase();
            let next = self.step(state, &mut report).await;
            match next {
                State::Done => {
                    info!("Bootstrap complete: {}/{} raft members", report.members, report.expected);
                    report.phase = Phase::Done;
                    return report;
                }
                State::Failed(err) => {
                    warn!("Bootstrap failed during {phase}: {err:#}");
                    report.fail(phase, err);
                    return report;
                }
                next => {
                    info!("Phase {phase} -> {}", next.phase());
                    report.phase = next.phase();
                    state = next;
                }
            }
        }
    }

    async fn step(&self, state: State, report: &mut BootstrapReport) -> State {
        let timing = self.timing();
        match state {
            State::Start => {
                let topology = self.topology().await;
                report.expected = topology.expected;
                report.required = topology.quorum();
                for replica in topology.replicas() {
                    report.row_mut(replica);
                }
                State::AwaitingFleet(topology)
            }
            State::AwaitingFleet(topology) => {
                match self
                    .prober()
                    .wait_for_fleet(&topology, timing.fleet_wait)
                    .await
                {
                    Ok(()) => State::CheckInit(topology),
                    Err(err) => State::Failed(err),
                }
            }
            State::CheckInit(topology) => {
                let leader = match self
                    .prober()
                    .wait_responsive(&topology.leader, timing.fleet_wait)
                    .await
                {
                    Ok(status) => status,
                    Err(err) => return State::Failed(err),
                };
                if !leader.initialized {
                    return State::Initializing(topology);
                }
                info!("{} is already initialized; reading bootstrap record", topology.leader);
                match self.initializer().lookup_existing().await {
                    Ok(existing) => {
                        report.token_hint = Some(mask_value(&existing.material.root_token));
                        State::UnsealLeader(topology, existing.material)
                    }
                    Err(err) => State::Failed(err),
                }
            }
            State::Initializing(topology) => {
                let shares = self.settings.init.key_shares;
                let threshold = self.settings.init.key_threshold;
                match self
                    .initializer()
                    .initialize_fresh(&topology.leader, shares, threshold)
                    .await
                {
                    Ok(initialized) => {
                        report.initialized_now = initialized.fresh;
                        report.record = initialized.record;
                        report.token_hint = Some(mask_value(&initialized.material.root_token));
                        State::UnsealLeader(topology, initialized.material)
                    }
                    Err(err) => State::Failed(err),
                }
            }
            State::UnsealLeader(topology, material) => {
                let leader = &topology.leader;
                let outcome = self.unsealer().unseal_replica(leader, &material).await;
                let row = report.row_mut(leader);
                row.join = Some(JoinOutcome::Leader);
                row.unseal = Some(outcome.clone());
                match outcome {
                    UnsealOutcome::AlreadyUnsealed | UnsealOutcome::Unsealed { .. } => {
                        State::JoinAndUnsealFollowers(topology, material)
                    }
                    UnsealOutcome::StillSealed { applied } => {
                        State::Failed(BootstrapError::LeaderSealed {
                            replica: leader.to_string(),
                            applied,
                            threshold: material.key_threshold,
                        })
                    }
                    UnsealOutcome::Unreachable { reason } => State::Failed(
                        BootstrapError::Transient(anyhow::anyhow!("leader {leader} unreachable: {reason}")),
                    ),
                }
            }
            State::JoinAndUnsealFollowers(topology, material) => {
                for follower in &topology.followers {
                    if let Some(failure) = self
                        .bring_up_follower(follower, &topology, &material, report)
                        .await
                    {
                        warn!("{follower}: {failure}");
                        report.row_mut(follower).failure = Some(failure);
                    }
                }
                State::VerifyQuorum(topology)
            }
            State::VerifyQuorum(topology) => {
                let mut members = 0;
                for (replica, status) in self.prober().sweep(&topology).await {
                    if status.is_raft_member {
                        members += 1;
                    }
                    report.row_mut(&replica).status = status;
                }
                report.members = members;
                let required = topology.quorum();
                if members >= required {
                    State::Done
                } else {
                    State::Failed(BootstrapError::QuorumNotMet {
                        members,
                        expected: topology.expected,
                        required,
                    })
                }
            }
            terminal @ (State::Done | State::Failed(_)) => terminal,
        }
    }

    /// Joins then unseals one follower; an unjoined follower is never
    /// unsealed. Returns the failure to record, if any.
    async fn bring_up_follower(
        &self,
        follower: &ReplicaRef,
        topology: &Topology,
        material: &BootstrapMaterial,
        report: &mut BootstrapReport,
    ) -> Option<String> {
        let prober = self.prober();
        if let Err(err) = prober
            .wait_responsive(follower, self.timing().pod_wait)
            .await
        {
            return Some(err.to_string());
        }

        let join = self
            .membership()
            .ensure_joined(&prober, follower, &topology.leader)
            .await;
        report.row_mut(follower).join = Some(join.clone());
        if let JoinOutcome::Failed { reason } = join {
            return Some(format!("raft join failed: {reason}"));
        }

        let unseal = self.unsealer().unseal_replica(follower, material).await;
        report.row_mut(follower).unseal = Some(unseal.clone());
        match unseal {
            UnsealOutcome::AlreadyUnsealed | UnsealOutcome::Unsealed { .. } => None,
            UnsealOutcome::StillSealed { applied } => Some(format!(
                "still sealed after {applied} of {} shares",
                material.key_threshold
            )),
            UnsealOutcome::Unreachable { reason } => Some(format!("unseal failed: {reason}")),
        }
    }

    /// Probes every replica without changing anything.
    pub async fn inspect(&self) -> BootstrapReport {
        let mut report = BootstrapReport::new(self.settings.record_ref(), self.store.kind());
        let topology = self.topology().await;
        report.expected = topology.expected;
        report.required = topology.quorum();
        for (replica, status) in self.prober().sweep(&topology).await {
            if status.is_raft_member {
                report.members += 1;
            }
            report.row_mut(&replica).status = status;
        }
        report
    }

    /// Deletes the bootstrap record; returns whether one existed.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Store`] if the backend cannot be modified.
    pub async fn reset_record(&self) -> Result<bool, BootstrapError> {
        let record = self.settings.record_ref();
        let deleted = with_retry(self.backoff(), "bootstrap record delete", || {
            self.store.delete(&record)
        })
        .await
        .map_err(BootstrapError::Store)?;
        if deleted {
            warn!("Deleted bootstrap record {record}; the next run on an uninitialized cluster generates new material");
        } else {
            info!("Bootstrap record {record} does not exist");
        }
        Ok(deleted)
    }
}
