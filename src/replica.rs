pub mod exec;

use std::fmt;

use anyhow::Result;

use crate::error::CallError;
use crate::status::{HaMode, StatusReport, TriState};

const ALREADY_INITIALIZED_MARKERS: [&str; 2] = ["already initialized", "already been initialized"];
const ALREADY_MEMBER_MARKERS: [&str; 4] = [
    "already a member",
    "already part of",
    "already joined",
    "node is already",
];
const SHARE_REJECTED_MARKERS: [&str; 3] = [
    "invalid key",
    "must be a valid hex or base64",
    "message authentication failed",
];

/// One replica of the fleet, addressed by ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaRef {
    pub ordinal: u32,
    pub name: String,
    pub address: String,
}

impl fmt::Display for ReplicaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Naming convention of a stateful set behind a headless service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaNaming {
    pub statefulset: String,
    pub headless_service: String,
    pub scheme: String,
    pub port: u16,
}

impl ReplicaNaming {
    #[must_use]
    pub fn replica(&self, ordinal: u32) -> ReplicaRef {
        let name = format!("{}-{ordinal}", self.statefulset);
        let address = format!(
            "{}://{name}.{}:{}",
            self.scheme, self.headless_service, self.port
        );
        ReplicaRef {
            ordinal,
            name,
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub expected: u32,
    pub leader: ReplicaRef,
    pub followers: Vec<ReplicaRef>,
}

impl Topology {
    /// Builds the topology for `expected` replicas; ordinal 0 leads.
    #[must_use]
    pub fn new(naming: &ReplicaNaming, expected: u32) -> Self {
        let expected = expected.max(1);
        Self {
            expected,
            leader: naming.replica(0),
            followers: (1..expected).map(|ordinal| naming.replica(ordinal)).collect(),
        }
    }

    /// All replicas in ascending ordinal order.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaRef> {
        std::iter::once(&self.leader).chain(self.followers.iter())
    }

    #[must_use]
    pub fn quorum(&self) -> u32 {
        quorum_for(self.expected)
    }
}

#[must_use]
pub fn quorum_for(expected: u32) -> u32 {
    expected / 2 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplicaStatus {
    pub initialized: bool,
    pub sealed: bool,
    pub is_raft_member: bool,
    pub is_leader: bool,
    pub responsive: bool,
}

impl ReplicaStatus {
    #[must_use]
    pub fn unresponsive() -> Self {
        Self {
            sealed: true,
            ..Self::default()
        }
    }

    /// A raft-storage node reports itself initialized only once it was
    /// initialized or joined to a cluster, so that flag doubles as membership.
    #[must_use]
    pub fn from_report(report: &StatusReport) -> Self {
        if !report.is_usable() {
            return Self::unresponsive();
        }
        let initialized = report.initialized.is_true();
        let sealed = report.sealed != TriState::False;
        Self {
            initialized,
            sealed,
            is_raft_member: initialized,
            is_leader: !sealed && report.ha_mode == HaMode::Active,
            responsive: true,
        }
    }
}

/// Parsed reply of a successful initialization call.
#[derive(Clone, PartialEq, Eq)]
pub struct InitReply {
    pub root_token: String,
    pub keys: Vec<String>,
}

impl fmt::Debug for InitReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitReply")
            .field("root_token", &"<redacted>")
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// The four logical commands every replica understands.
#[allow(async_fn_in_trait)]
pub trait ReplicaClient {
    /// Queries initialization, seal and HA state.
    ///
    /// # Errors
    /// Returns an error when the replica could not be reached or its reply
    /// carried no recognizable status.
    async fn status(&self, replica: &ReplicaRef) -> Result<StatusReport>;

    /// Initializes the cluster through `replica`.
    ///
    /// # Errors
    /// Returns [`CallError::AlreadyInitialized`] when the service refuses a
    /// second initialization, and [`CallError::Reply`] when it accepted the
    /// call but its reply cannot be parsed.
    async fn initialize(
        &self,
        replica: &ReplicaRef,
        shares: u8,
        threshold: u8,
    ) -> Result<InitReply, CallError>;

    /// Submits one key share and returns the updated seal state.
    ///
    /// # Errors
    /// Returns an error when the share could not be delivered; a share the
    /// replica refused carries [`ShareRejected`](crate::error::ShareRejected).
    async fn unseal(&self, replica: &ReplicaRef, share: &str) -> Result<StatusReport>;

    /// Discards partial unseal progress.
    ///
    /// # Errors
    /// Returns an error when the reset could not be delivered.
    async fn reset_unseal(&self, replica: &ReplicaRef) -> Result<()>;

    /// Joins `replica` to the raft group led by `leader_address`.
    ///
    /// # Errors
    /// Returns [`CallError::AlreadyMember`] when the replica already belongs
    /// to the group.
    async fn raft_join(&self, replica: &ReplicaRef, leader_address: &str) -> Result<(), CallError>;
}

/// Reads the desired replica count from the control plane.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    /// # Errors
    /// Returns an error when the control plane cannot be queried.
    async fn desired_replicas(&self) -> Result<u32>;
}

/// A control plane stand-in for a fixed, configured fleet size.
#[derive(Debug, Clone, Copy)]
pub struct StaticFleet(pub u32);

impl ControlPlane for StaticFleet {
    async fn desired_replicas(&self) -> Result<u32> {
        Ok(self.0)
    }
}

pub(crate) fn is_already_initialized(message: &str) -> bool {
    contains_any(message, &ALREADY_INITIALIZED_MARKERS)
}

pub(crate) fn is_already_member(message: &str) -> bool {
    contains_any(message, &ALREADY_MEMBER_MARKERS)
}

pub(crate) fn is_share_rejected(message: &str) -> bool {
    contains_any(message, &SHARE_REJECTED_MARKERS)
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_ascii_lowercase();
    markers.iter().any(|marker| lower.contains(marker))
}
