#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use bao_bootstrap::config::Settings;
use bao_bootstrap::error::{CallError, ShareRejected, StoreError};
use bao_bootstrap::material::BootstrapMaterial;
use bao_bootstrap::replica::{ControlPlane, InitReply, ReplicaClient, ReplicaRef};
use bao_bootstrap::status::{HaMode, StatusReport, TriState};
use bao_bootstrap::store::{RecordRef, SecretStore};
use time::OffsetDateTime;

/// A call made against the simulated fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status(String),
    Initialize(String),
    Unseal(String),
    ResetUnseal(String),
    Join(String, String),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    pub fn replica(&self) -> &str {
        match self {
            Self::Status(name)
            | Self::Initialize(name)
            | Self::Unseal(name)
            | Self::ResetUnseal(name)
            | Self::Join(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    running: bool,
    member: bool,
    sealed: bool,
    progress: Vec<String>,
}

#[derive(Debug, Default)]
struct FleetState {
    nodes: Vec<Node>,
    desired: Option<u32>,
    initialized: bool,
    root_token: String,
    keys: Vec<String>,
    threshold: usize,
    init_count: u32,
    calls: Vec<Call>,
    /// Init replies are refused as if another invocation won the race.
    init_race_lost: bool,
    /// Init replies carry no root token.
    init_blank_token: bool,
    /// Init succeeds on the server but its reply cannot be parsed.
    init_reply_garbled: bool,
    /// Status reports these replicas as non-members even when they joined.
    stale_membership: HashSet<u32>,
    /// Joins of these replicas always fail.
    broken_joins: HashSet<u32>,
    /// Remaining transient failures per replica for unseal calls.
    flaky_unseals: HashMap<u32, u32>,
}

/// An in-process model of a Shamir-sealed, raft-backed fleet.
///
/// Replica `n` is named `openbao-n`. The first initialization generates
/// shares `share-<init>-<i>`; any `threshold` distinct shares unseal an
/// initialized member.
#[derive(Debug, Clone, Default)]
pub struct SimFleet {
    state: Arc<Mutex<FleetState>>,
}

impl SimFleet {
    /// `replicas` running, uninitialized, sealed replicas.
    pub fn new(replicas: u32) -> Self {
        let nodes = (0..replicas)
            .map(|_| Node {
                running: true,
                sealed: true,
                ..Node::default()
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(FleetState {
                nodes,
                desired: Some(replicas),
                ..FleetState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap()
    }

    /// Initializes the cluster out of band and returns its material.
    pub fn initialize_out_of_band(&self, shares: u8, threshold: u8) -> BootstrapMaterial {
        let reply = self.lock().initialize(0, shares, threshold).unwrap();
        material_from(reply, shares, threshold)
    }

    /// Unseals and joins every replica listed, bypassing the call log.
    pub fn bring_up(&self, ordinals: &[u32]) {
        let mut state = self.lock();
        for ordinal in ordinals {
            let node = &mut state.nodes[*ordinal as usize];
            node.member = true;
            node.sealed = false;
        }
    }

    pub fn set_running(&self, ordinal: u32, running: bool) {
        self.lock().nodes[ordinal as usize].running = running;
    }

    pub fn set_sealed(&self, ordinal: u32) {
        let mut state = self.lock();
        let node = &mut state.nodes[ordinal as usize];
        node.sealed = true;
        node.progress.clear();
    }

    pub fn set_progress(&self, ordinal: u32, shares: &[&str]) {
        self.lock().nodes[ordinal as usize].progress =
            shares.iter().map(ToString::to_string).collect();
    }

    pub fn set_desired(&self, desired: Option<u32>) {
        self.lock().desired = desired;
    }

    pub fn lose_init_race(&self) {
        self.lock().init_race_lost = true;
    }

    pub fn blank_init_token(&self) {
        self.lock().init_blank_token = true;
    }

    pub fn garble_init_reply(&self) {
        self.lock().init_reply_garbled = true;
    }

    pub fn hide_membership(&self, ordinal: u32) {
        self.lock().stale_membership.insert(ordinal);
    }

    pub fn break_join(&self, ordinal: u32) {
        self.lock().broken_joins.insert(ordinal);
    }

    pub fn flaky_unseal(&self, ordinal: u32, failures: u32) {
        self.lock().flaky_unseals.insert(ordinal, failures);
    }

    pub fn is_sealed(&self, ordinal: u32) -> bool {
        self.lock().nodes[ordinal as usize].sealed
    }

    pub fn is_member(&self, ordinal: u32) -> bool {
        self.lock().nodes[ordinal as usize].member
    }

    pub fn init_count(&self) -> u32 {
        self.lock().init_count
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn shares(&self) -> Vec<String> {
        self.lock().keys.clone()
    }
}

impl FleetState {
    fn node(&self, replica: &ReplicaRef) -> Result<&Node> {
        self.nodes
            .get(replica.ordinal as usize)
            .filter(|node| node.running)
            .ok_or_else(|| anyhow::anyhow!("pods \"{}\" not found", replica.name))
    }

    fn report(&self, ordinal: u32) -> StatusReport {
        let node = &self.nodes[ordinal as usize];
        let member = node.member && !self.stale_membership.contains(&ordinal);
        let ha_mode = match (node.sealed, ordinal) {
            (true, _) => HaMode::Unknown,
            (false, 0) => HaMode::Active,
            (false, _) => HaMode::Standby,
        };
        StatusReport {
            initialized: TriState::from_bool(member),
            sealed: TriState::from_bool(node.sealed),
            ha_mode,
            threshold: member.then(|| u32::try_from(self.threshold).unwrap()),
            shares: member.then(|| u32::try_from(self.keys.len()).unwrap()),
            progress: Some(u32::try_from(node.progress.len()).unwrap()),
        }
    }

    fn initialize(&mut self, ordinal: u32, shares: u8, threshold: u8) -> Result<InitReply, CallError> {
        if self.initialized || self.init_race_lost {
            self.initialized = true;
            return Err(CallError::AlreadyInitialized {
                replica: format!("openbao-{ordinal}"),
            });
        }
        self.init_count += 1;
        self.initialized = true;
        self.root_token = format!("s.root-token-{}", self.init_count);
        self.keys = (0..shares)
            .map(|index| format!("share-{}-{index}", self.init_count))
            .collect();
        self.threshold = usize::from(threshold);
        let node = &mut self.nodes[ordinal as usize];
        node.member = true;
        node.sealed = true;
        if self.init_reply_garbled {
            return Err(CallError::Reply(anyhow::anyhow!(
                "operator init printed no JSON document"
            )));
        }
        let root_token = if self.init_blank_token {
            String::new()
        } else {
            self.root_token.clone()
        };
        Ok(InitReply {
            root_token,
            keys: self.keys.clone(),
        })
    }
}

impl ReplicaClient for SimFleet {
    async fn status(&self, replica: &ReplicaRef) -> Result<StatusReport> {
        let mut state = self.lock();
        state.calls.push(Call::Status(replica.name.clone()));
        state.node(replica)?;
        Ok(state.report(replica.ordinal))
    }

    async fn initialize(
        &self,
        replica: &ReplicaRef,
        shares: u8,
        threshold: u8,
    ) -> Result<InitReply, CallError> {
        let mut state = self.lock();
        state.calls.push(Call::Initialize(replica.name.clone()));
        state.node(replica)?;
        state.initialize(replica.ordinal, shares, threshold)
    }

    async fn unseal(&self, replica: &ReplicaRef, share: &str) -> Result<StatusReport> {
        let mut state = self.lock();
        state.calls.push(Call::Unseal(replica.name.clone()));
        state.node(replica)?;
        if let Some(remaining) = state.flaky_unseals.get_mut(&replica.ordinal)
            && *remaining > 0
        {
            *remaining -= 1;
            anyhow::bail!("connection reset by peer");
        }
        let threshold = state.threshold;
        let valid = state.keys.iter().any(|key| key == share);
        let node = &mut state.nodes[replica.ordinal as usize];
        if node.sealed {
            if !node.member {
                anyhow::bail!("server is not yet initialized");
            }
            if !valid {
                node.progress.clear();
                return Err(ShareRejected {
                    replica: replica.name.clone(),
                    reason: "invalid key".to_string(),
                }
                .into());
            }
            if !node.progress.iter().any(|applied| applied == share) {
                node.progress.push(share.to_string());
            }
            if node.progress.len() >= threshold {
                node.sealed = false;
                node.progress.clear();
            }
        }
        Ok(state.report(replica.ordinal))
    }

    async fn reset_unseal(&self, replica: &ReplicaRef) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::ResetUnseal(replica.name.clone()));
        state.node(replica)?;
        state.nodes[replica.ordinal as usize].progress.clear();
        Ok(())
    }

    async fn raft_join(&self, replica: &ReplicaRef, leader_address: &str) -> Result<(), CallError> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::Join(replica.name.clone(), leader_address.to_string()));
        state.node(replica)?;
        if state.broken_joins.contains(&replica.ordinal) {
            return Err(anyhow::anyhow!("failed to join raft cluster: connection refused").into());
        }
        if state.nodes[replica.ordinal as usize].member {
            return Err(CallError::AlreadyMember {
                replica: replica.name.clone(),
            });
        }
        let leader = &state.nodes[0];
        if !leader.member || leader.sealed {
            return Err(anyhow::anyhow!("leader is not ready").into());
        }
        state.nodes[replica.ordinal as usize].member = true;
        Ok(())
    }
}

impl ControlPlane for SimFleet {
    async fn desired_replicas(&self) -> Result<u32> {
        self.lock()
            .desired
            .ok_or_else(|| anyhow::anyhow!("statefulsets.apps \"openbao\" is forbidden"))
    }
}

/// Secret store kept in memory and shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>>,
    creates: Arc<Mutex<u32>>,
}

impl MemoryStore {
    pub fn insert(&self, record: &RecordRef, fields: BTreeMap<String, String>) {
        self.records.lock().unwrap().insert(record.to_string(), fields);
    }

    pub fn fields(&self, record: &RecordRef) -> Option<BTreeMap<String, String>> {
        self.records.lock().unwrap().get(&record.to_string()).cloned()
    }

    pub fn record_names(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    pub fn creates(&self) -> u32 {
        *self.creates.lock().unwrap()
    }
}

impl SecretStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create(
        &self,
        record: &RecordRef,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        *self.creates.lock().unwrap() += 1;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.to_string()) {
            return Err(StoreError::AlreadyExists {
                record: record.to_string(),
            });
        }
        records.insert(record.to_string(), fields.clone());
        Ok(())
    }

    async fn get(&self, record: &RecordRef) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.fields(record))
    }

    async fn delete(&self, record: &RecordRef) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .remove(&record.to_string())
            .is_some())
    }
}

pub fn material_from(reply: InitReply, shares: u8, threshold: u8) -> BootstrapMaterial {
    BootstrapMaterial::new(
        reply.root_token,
        reply.keys,
        shares,
        threshold,
        OffsetDateTime::now_utc(),
    )
    .unwrap()
}

/// Default settings with every wait and delay set to zero.
pub fn settings() -> Settings {
    let mut settings = Settings::new(Some("tests/does-not-exist.toml".into())).unwrap();
    settings.cluster.namespace = "vault".to_string();
    settings.timeouts.fleet_wait_secs = 0;
    settings.timeouts.pod_wait_secs = 0;
    settings.timeouts.poll_interval_secs = 0;
    settings.timeouts.join_settle_secs = 0;
    settings.retry.max_attempts = 3;
    settings.retry.initial_delay_secs = 0;
    settings
}

pub fn record() -> RecordRef {
    settings().record_ref()
}
