use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::error::{BootstrapError, CallError, StoreError};
use crate::material::BootstrapMaterial;
use crate::probe::StateProber;
use crate::replica::{ReplicaClient, ReplicaRef, Topology};
use crate::retry::{Backoff, with_retry};
use crate::store::{RecordRef, SecretStore};

/// Bootstrap material together with where it came from.
#[derive(Debug, Clone)]
pub struct Initialized {
    pub material: BootstrapMaterial,
    /// `true` only when this invocation performed the initialization call.
    pub fresh: bool,
    /// Record holding the material; a sibling of the configured record when
    /// that one was unexpectedly taken.
    pub record: RecordRef,
}

#[derive(Debug)]
struct RecordMissing;

impl fmt::Display for RecordMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bootstrap record not found")
    }
}

impl std::error::Error for RecordMissing {}

/// Performs the one-time initialization and keeps its output durable.
#[derive(Debug)]
pub struct Initializer<'a, R, S> {
    client: &'a R,
    store: &'a S,
    record: RecordRef,
    backoff: Backoff,
}

impl<'a, R: ReplicaClient, S: SecretStore> Initializer<'a, R, S> {
    #[must_use]
    pub fn new(client: &'a R, store: &'a S, record: RecordRef, backoff: Backoff) -> Self {
        Self {
            client,
            store,
            record,
            backoff,
        }
    }

    /// Returns the cluster's bootstrap material, initializing the cluster
    /// through its leader only if it never was.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Timeout`] if the leader never responds,
    /// [`BootstrapError::Inconsistency`] if the cluster is initialized but
    /// its record is gone, and [`BootstrapError::InitResponse`] if the
    /// initialization reply is unusable.
    pub async fn initialize_once(
        &self,
        prober: &StateProber<'_, R>,
        topology: &Topology,
        leader_wait: Duration,
        shares: u8,
        threshold: u8,
    ) -> Result<Initialized, BootstrapError> {
        let status = prober.wait_responsive(&topology.leader, leader_wait).await?;
        if status.initialized {
            info!("{} is already initialized", topology.leader);
            return self.lookup_existing().await;
        }
        self.initialize_fresh(&topology.leader, shares, threshold)
            .await
    }

    /// Loads the material of an already initialized cluster.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Inconsistency`] if no record exists and
    /// [`BootstrapError::Store`] if it cannot be read or decoded.
    pub async fn lookup_existing(&self) -> Result<Initialized, BootstrapError> {
        let fields = with_retry(self.backoff, "bootstrap record read", || {
            self.store.get(&self.record)
        })
        .await
        .map_err(BootstrapError::Store)?;
        let Some(fields) = fields else {
            return Err(BootstrapError::Inconsistency {
                record: self.record.to_string(),
            });
        };
        self.decode(&fields)
    }

    /// Issues the single initialization call. A concurrent invocation that
    /// won the race makes the service refuse it; the material is then read
    /// from the record that invocation writes.
    ///
    /// # Errors
    /// See [`Initializer::initialize_once`].
    pub async fn initialize_fresh(
        &self,
        leader: &ReplicaRef,
        shares: u8,
        threshold: u8,
    ) -> Result<Initialized, BootstrapError> {
        info!("Initializing cluster through {leader} ({shares} shares, threshold {threshold})");
        let reply = match self.client.initialize(leader, shares, threshold).await {
            Ok(reply) => reply,
            Err(CallError::AlreadyInitialized { .. }) => {
                warn!("{leader} was initialized concurrently; waiting for its bootstrap record");
                return self.await_record().await;
            }
            Err(CallError::AlreadyMember { replica }) => {
                return Err(BootstrapError::InitResponse {
                    replica: leader.to_string(),
                    reason: format!("{replica} answered with a raft membership conflict"),
                });
            }
            Err(CallError::Reply(err)) => {
                error!(
                    "{leader} accepted the initialization call but its reply is unusable; \
                     the cluster may now be initialized without stored material"
                );
                return Err(BootstrapError::InitResponse {
                    replica: leader.to_string(),
                    reason: format!("{err:#}"),
                });
            }
            Err(CallError::Other(err)) => {
                return Err(BootstrapError::Transient(
                    err.context(format!("Initialization call to {leader} failed")),
                ));
            }
        };

        let invalid = |reason: String| BootstrapError::InitResponse {
            replica: leader.to_string(),
            reason,
        };
        if reply.root_token.trim().is_empty() {
            return Err(invalid("root token is empty".to_string()));
        }
        if reply.keys.len() != usize::from(shares) {
            return Err(invalid(format!(
                "expected {shares} key shares, got {}",
                reply.keys.len()
            )));
        }
        if reply.keys.iter().any(|key| key.trim().is_empty()) {
            return Err(invalid("reply contains an empty key share".to_string()));
        }
        let material = BootstrapMaterial::new(
            reply.root_token,
            reply.keys,
            shares,
            threshold,
            OffsetDateTime::now_utc(),
        )
        .map_err(|err| invalid(format!("{err:#}")))?;

        let record = self.persist(&material).await.inspect_err(|_| {
            error!("Cluster was initialized but its bootstrap material could not be stored");
        })?;
        info!("Stored bootstrap material in {} record {record}", self.store.kind());
        Ok(Initialized {
            material,
            fresh: true,
            record,
        })
    }

    async fn await_record(&self) -> Result<Initialized, BootstrapError> {
        let fetched = with_retry(self.backoff, "bootstrap record read", || async move {
            self.store
                .get(&self.record)
                .await?
                .ok_or_else(|| anyhow::Error::new(RecordMissing))
        })
        .await;
        match fetched {
            Ok(fields) => self.decode(&fields),
            Err(err) if err.downcast_ref::<RecordMissing>().is_some() => {
                Err(BootstrapError::Inconsistency {
                    record: self.record.to_string(),
                })
            }
            Err(err) => Err(BootstrapError::Store(err)),
        }
    }

    fn decode(&self, fields: &BTreeMap<String, String>) -> Result<Initialized, BootstrapError> {
        let material = BootstrapMaterial::from_fields(fields)
            .with_context(|| format!("Bootstrap record {} is unreadable", self.record))
            .map_err(BootstrapError::Store)?;
        Ok(Initialized {
            material,
            fresh: false,
            record: self.record.clone(),
        })
    }

    async fn persist(&self, material: &BootstrapMaterial) -> Result<RecordRef, BootstrapError> {
        let fields = material.to_fields().map_err(BootstrapError::Store)?;
        if self.create(&self.record, &fields).await? {
            return Ok(self.record.clone());
        }

        let sibling = self
            .record
            .sibling(&material.created_at.unix_timestamp().to_string());
        warn!(
            "Record {} already exists although the cluster was not initialized; \
             storing the new material in {sibling}",
            self.record
        );
        if self.create(&sibling, &fields).await? {
            return Ok(sibling);
        }
        Err(BootstrapError::Store(anyhow::anyhow!(
            "records {} and {sibling} both exist",
            self.record
        )))
    }

    /// Returns `false` when the record already exists.
    async fn create(
        &self,
        record: &RecordRef,
        fields: &BTreeMap<String, String>,
    ) -> Result<bool, BootstrapError> {
        with_retry(self.backoff, "bootstrap record write", || async move {
            match self.store.create(record, fields).await {
                Ok(()) => Ok(true),
                Err(StoreError::AlreadyExists { .. }) => Ok(false),
                Err(StoreError::Backend(err)) => Err(err),
            }
        })
        .await
        .map_err(BootstrapError::Store)
    }
}
