use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::replica::{ControlPlane, ReplicaClient, ReplicaRef, ReplicaStatus, Topology};
use crate::retry::{Backoff, with_retry};

/// Observes replicas and the fleet without changing anything.
#[derive(Debug)]
pub struct StateProber<'a, R> {
    client: &'a R,
    backoff: Backoff,
    poll_interval: Duration,
}

impl<'a, R: ReplicaClient> StateProber<'a, R> {
    #[must_use]
    pub fn new(client: &'a R, backoff: Backoff, poll_interval: Duration) -> Self {
        Self {
            client,
            backoff,
            poll_interval,
        }
    }

    /// Probes one replica. Channel failures and unreadable replies mean
    /// "not yet responsive", never a hard error.
    pub async fn probe_replica(&self, replica: &ReplicaRef) -> ReplicaStatus {
        match self.client.status(replica).await {
            Ok(report) => {
                let status = ReplicaStatus::from_report(&report);
                debug!("{replica}: {status:?}");
                status
            }
            Err(err) => {
                debug!("{replica} is not responsive yet: {err:#}");
                ReplicaStatus::unresponsive()
            }
        }
    }

    /// Desired replica count from the control plane, or `fallback` when it
    /// cannot be read.
    pub async fn fleet_size<P: ControlPlane>(&self, control_plane: &P, fallback: u32) -> u32 {
        match with_retry(self.backoff, "replica count lookup", || {
            control_plane.desired_replicas()
        })
        .await
        {
            Ok(count) => {
                info!("Control plane reports {count} desired replica(s)");
                count
            }
            Err(err) => {
                warn!(
                    "Could not read the desired replica count, assuming {fallback}; \
                     quorum arithmetic may be wrong: {err:#}"
                );
                fallback
            }
        }
    }

    /// Polls `replica` until it responds or `timeout` elapses.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Timeout`] if the replica never responds.
    pub async fn wait_responsive(
        &self,
        replica: &ReplicaRef,
        timeout: Duration,
    ) -> Result<ReplicaStatus, BootstrapError> {
        let started = Instant::now();
        loop {
            let status = self.probe_replica(replica).await;
            if status.responsive {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                return Err(BootstrapError::Timeout {
                    what: format!("{replica} to respond"),
                    waited: timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Number of replicas of `topology` currently responding.
    pub async fn count_responsive(&self, topology: &Topology) -> u32 {
        let mut responsive = 0;
        for replica in topology.replicas() {
            if self.probe_replica(replica).await.responsive {
                responsive += 1;
            }
        }
        responsive
    }

    /// Polls until every expected replica responds.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Timeout`] if the fleet is still incomplete
    /// after `timeout`.
    pub async fn wait_for_fleet(
        &self,
        topology: &Topology,
        timeout: Duration,
    ) -> Result<(), BootstrapError> {
        let started = Instant::now();
        loop {
            let responsive = self.count_responsive(topology).await;
            if responsive >= topology.expected {
                info!("All {responsive} replica(s) are responding");
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(BootstrapError::Timeout {
                    what: format!(
                        "{} replica(s) to respond ({responsive} responding)",
                        topology.expected
                    ),
                    waited: timeout,
                });
            }
            info!(
                "{responsive}/{} replica(s) responding, waiting",
                topology.expected
            );
            sleep(self.poll_interval).await;
        }
    }

    /// Probes every replica in ascending ordinal order.
    pub async fn sweep(&self, topology: &Topology) -> Vec<(ReplicaRef, ReplicaStatus)> {
        let mut statuses = Vec::with_capacity(topology.replicas().count());
        for replica in topology.replicas() {
            statuses.push((replica.clone(), self.probe_replica(replica).await));
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::Result;

    use super::*;
    use crate::error::CallError;
    use crate::replica::{InitReply, ReplicaNaming, StaticFleet};
    use crate::status::{StatusReport, TriState};

    /// Replicas answer with the queued replies, then with the last one.
    #[derive(Default)]
    struct QueuedStatus {
        replies: Mutex<HashMap<String, Vec<Option<StatusReport>>>>,
    }

    impl QueuedStatus {
        fn push(&self, name: &str, reply: Option<StatusReport>) {
            self.replies
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default()
                .push(reply);
        }
    }

    impl ReplicaClient for QueuedStatus {
        async fn status(&self, replica: &ReplicaRef) -> Result<StatusReport> {
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.entry(replica.name.clone()).or_default();
            let reply = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue.first().cloned().flatten()
            };
            reply.ok_or_else(|| anyhow::anyhow!("pod {} not running", replica.name))
        }

        async fn initialize(&self, _: &ReplicaRef, _: u8, _: u8) -> Result<InitReply, CallError> {
            unreachable!("prober never initializes")
        }

        async fn unseal(&self, _: &ReplicaRef, _: &str) -> Result<StatusReport> {
            unreachable!("prober never unseals")
        }

        async fn reset_unseal(&self, _: &ReplicaRef) -> Result<()> {
            unreachable!("prober never resets")
        }

        async fn raft_join(&self, _: &ReplicaRef, _: &str) -> Result<(), CallError> {
            unreachable!("prober never joins")
        }
    }

    struct BrokenControlPlane;

    impl ControlPlane for BrokenControlPlane {
        async fn desired_replicas(&self) -> Result<u32> {
            anyhow::bail!("forbidden")
        }
    }

    fn sealed() -> Option<StatusReport> {
        Some(StatusReport {
            initialized: TriState::False,
            sealed: TriState::True,
            ..StatusReport::default()
        })
    }

    fn naming() -> ReplicaNaming {
        ReplicaNaming {
            statefulset: "openbao".to_string(),
            headless_service: "openbao-internal".to_string(),
            scheme: "http".to_string(),
            port: 8200,
        }
    }

    fn prober(client: &QueuedStatus) -> StateProber<'_, QueuedStatus> {
        StateProber::new(client, Backoff::new(2, Duration::ZERO), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_channel_failure_is_unresponsive() {
        let client = QueuedStatus::default();
        let status = prober(&client).probe_replica(&naming().replica(0)).await;
        assert!(!status.responsive);
        assert!(status.sealed);
    }

    #[tokio::test]
    async fn test_wait_responsive_polls_until_reply() {
        let client = QueuedStatus::default();
        client.push("openbao-0", None);
        client.push("openbao-0", None);
        client.push("openbao-0", sealed());

        let status = prober(&client)
            .wait_responsive(&naming().replica(0), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(status.responsive);
        assert!(!status.initialized);
    }

    #[tokio::test]
    async fn test_wait_responsive_times_out() {
        let client = QueuedStatus::default();
        let err = prober(&client)
            .wait_responsive(&naming().replica(1), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Timeout { .. }));
        assert!(err.to_string().contains("openbao-1 to respond"));
    }

    #[tokio::test]
    async fn test_wait_for_fleet_requires_every_replica() {
        let client = QueuedStatus::default();
        client.push("openbao-0", sealed());
        client.push("openbao-1", sealed());
        let topology = Topology::new(&naming(), 3);

        assert_eq!(prober(&client).count_responsive(&topology).await, 2);
        let err = prober(&client)
            .wait_for_fleet(&topology, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 responding"));

        client.push("openbao-2", sealed());
        prober(&client)
            .wait_for_fleet(&topology, Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fleet_size_reads_control_plane() {
        let client = QueuedStatus::default();
        assert_eq!(prober(&client).fleet_size(&StaticFleet(5), 3).await, 5);
    }

    #[tokio::test]
    async fn test_fleet_size_falls_back() {
        let client = QueuedStatus::default();
        assert_eq!(prober(&client).fleet_size(&BrokenControlPlane, 3).await, 3);
    }
}
