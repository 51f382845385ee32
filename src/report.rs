use crate::error::BootstrapError;
use crate::orchestrator::Phase;
use crate::raft::JoinOutcome;
use crate::replica::{ReplicaRef, ReplicaStatus};
use crate::store::RecordRef;
use crate::unseal::UnsealOutcome;

/// Final state of one replica after a run.
#[derive(Debug, Clone)]
pub struct ReplicaRow {
    pub replica: ReplicaRef,
    pub status: ReplicaStatus,
    pub join: Option<JoinOutcome>,
    pub unseal: Option<UnsealOutcome>,
    pub failure: Option<String>,
}

impl ReplicaRow {
    #[must_use]
    pub fn new(replica: ReplicaRef) -> Self {
        Self {
            replica,
            status: ReplicaStatus::unresponsive(),
            join: None,
            unseal: None,
            failure: None,
        }
    }
}

#[derive(Debug)]
pub struct BootstrapReport {
    pub phase: Phase,
    /// Phase that was running when the run failed.
    pub failed_in: Option<Phase>,
    pub error: Option<BootstrapError>,
    pub initialized_now: bool,
    pub record: RecordRef,
    pub store_kind: &'static str,
    /// Masked root token; the raw value never leaves the material.
    pub token_hint: Option<String>,
    pub replicas: Vec<ReplicaRow>,
    pub members: u32,
    pub required: u32,
    pub expected: u32,
}

impl BootstrapReport {
    #[must_use]
    pub fn new(record: RecordRef, store_kind: &'static str) -> Self {
        Self {
            phase: Phase::Start,
            failed_in: None,
            error: None,
            initialized_now: false,
            record,
            store_kind,
            token_hint: None,
            replicas: Vec::new(),
            members: 0,
            required: 0,
            expected: 0,
        }
    }

    /// `true` when the run finished and no replica failed along the way.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phase == Phase::Done && self.replicas.iter().all(|row| row.failure.is_none())
    }

    pub fn fail(&mut self, phase: Phase, error: BootstrapError) {
        self.phase = Phase::Failed;
        self.failed_in = Some(phase);
        self.error = Some(error);
    }

    /// Row of `replica`, created on first use.
    pub fn row_mut(&mut self, replica: &ReplicaRef) -> &mut ReplicaRow {
        let index = match self
            .replicas
            .iter()
            .position(|row| row.replica.ordinal == replica.ordinal)
        {
            Some(index) => index,
            None => {
                self.replicas.push(ReplicaRow::new(replica.clone()));
                self.replicas.sort_by_key(|row| row.replica.ordinal);
                self.replicas
                    .iter()
                    .position(|row| row.replica.ordinal == replica.ordinal)
                    .unwrap_or(self.replicas.len() - 1)
            }
        };
        &mut self.replicas[index]
    }

    /// Replica failures recorded without stopping the run.
    pub fn failures(&self) -> impl Iterator<Item = (&ReplicaRef, &str)> {
        self.replicas
            .iter()
            .filter_map(|row| Some((&row.replica, row.failure.as_deref()?)))
    }
}

/// Shows the last four characters of a secret.
#[must_use]
pub fn mask_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &trimmed[trimmed.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(ordinal: u32) -> ReplicaRef {
        ReplicaRef {
            ordinal,
            name: format!("openbao-{ordinal}"),
            address: format!("http://openbao-{ordinal}.openbao-internal:8200"),
        }
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("abc"), "****");
        assert_eq!(mask_value("s.abcdef1234"), "****1234");
    }

    #[test]
    fn test_rows_stay_in_ordinal_order() {
        let mut report = BootstrapReport::new(RecordRef::new("r", "ns"), "file");
        report.row_mut(&replica(2)).failure = Some("sealed".to_string());
        report.row_mut(&replica(0));
        report.row_mut(&replica(1));
        report.row_mut(&replica(2));

        let ordinals: Vec<_> = report.replicas.iter().map(|row| row.replica.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_success_requires_done_without_failures() {
        let mut report = BootstrapReport::new(RecordRef::new("r", "ns"), "file");
        report.phase = Phase::Done;
        report.row_mut(&replica(0));
        assert!(report.is_success());

        report.row_mut(&replica(1)).failure = Some("join failed".to_string());
        assert!(!report.is_success());
    }

    #[test]
    fn test_fail_records_phase() {
        let mut report = BootstrapReport::new(RecordRef::new("r", "ns"), "file");
        report.fail(
            Phase::VerifyQuorum,
            BootstrapError::QuorumNotMet {
                members: 1,
                expected: 3,
                required: 2,
            },
        );
        assert_eq!(report.phase, Phase::Failed);
        assert_eq!(report.failed_in, Some(Phase::VerifyQuorum));
        assert!(!report.is_success());
    }
}
