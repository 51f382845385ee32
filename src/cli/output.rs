use std::fmt::Write;

use bao_bootstrap::report::{BootstrapReport, ReplicaRow};
use bao_bootstrap::store::RecordRef;

pub(crate) fn print_run_report(report: &BootstrapReport) {
    print!("{}", render_run_report(report));
}

pub(crate) fn print_status_report(report: &BootstrapReport) {
    print!("{}", render_replica_table(report));
    println!("{}", quorum_line(report));
}

pub(crate) fn print_reset_result(record: &RecordRef, deleted: bool) {
    if deleted {
        println!("deleted bootstrap record {record}");
    } else {
        println!("bootstrap record {record} did not exist");
    }
}

fn render_run_report(report: &BootstrapReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "phase: {}", report.phase);
    if let Some(phase) = report.failed_in {
        let _ = writeln!(out, "failed in: {phase}");
    }
    if let Some(err) = &report.error {
        let _ = writeln!(out, "error: {err:#}");
    }
    let _ = writeln!(
        out,
        "initialized by this run: {}",
        if report.initialized_now { "yes" } else { "no" }
    );
    let _ = writeln!(out, "record: {} ({})", report.record, report.store_kind);
    if let Some(hint) = &report.token_hint {
        let _ = writeln!(out, "root token: {hint}");
    }
    out.push_str(&render_replica_table(report));
    let _ = writeln!(out, "{}", quorum_line(report));
    for (replica, failure) in report.failures() {
        let _ = writeln!(out, "failure: {replica}: {failure}");
    }
    out
}

fn render_replica_table(report: &BootstrapReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<10} {:<8} {:<8} {:<6} {:<7} {:<16} {}",
        "REPLICA", "RESPONSIVE", "INIT", "SEALED", "RAFT", "LEADER", "JOIN", "UNSEAL"
    );
    for row in &report.replicas {
        let _ = writeln!(out, "{}", replica_line(row));
    }
    out
}

fn replica_line(row: &ReplicaRow) -> String {
    let status = &row.status;
    format!(
        "{:<20} {:<10} {:<8} {:<8} {:<6} {:<7} {:<16} {}",
        row.replica.name,
        yes_no(status.responsive),
        yes_no(status.initialized),
        yes_no(status.sealed),
        yes_no(status.is_raft_member),
        yes_no(status.is_leader),
        row.join.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
        row.unseal.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
    )
}

fn quorum_line(report: &BootstrapReport) -> String {
    format!(
        "raft members: {}/{} (quorum {})",
        report.members, report.expected, report.required
    )
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use bao_bootstrap::Phase;
    use bao_bootstrap::error::BootstrapError;
    use bao_bootstrap::raft::JoinOutcome;
    use bao_bootstrap::replica::{ReplicaRef, ReplicaStatus};
    use bao_bootstrap::report::mask_value;
    use bao_bootstrap::unseal::UnsealOutcome;

    use super::*;

    fn replica(ordinal: u32) -> ReplicaRef {
        ReplicaRef {
            ordinal,
            name: format!("openbao-{ordinal}"),
            address: format!("http://openbao-{ordinal}.openbao-internal:8200"),
        }
    }

    fn report() -> BootstrapReport {
        let mut report = BootstrapReport::new(RecordRef::new("openbao-bootstrap", "vault"), "kubernetes");
        report.token_hint = Some(mask_value("s.rootABCD"));
        report.expected = 3;
        report.required = 2;
        report.members = 1;
        let row = report.row_mut(&replica(0));
        row.status = ReplicaStatus {
            initialized: true,
            sealed: false,
            is_raft_member: true,
            is_leader: true,
            responsive: true,
        };
        row.join = Some(JoinOutcome::Leader);
        row.unseal = Some(UnsealOutcome::Unsealed { applied: 3 });
        report.row_mut(&replica(1)).failure = Some("raft join failed".to_string());
        report
    }

    #[test]
    fn test_run_report_lists_replicas_and_failures() {
        let mut report = report();
        report.fail(
            Phase::VerifyQuorum,
            BootstrapError::QuorumNotMet {
                members: 1,
                expected: 3,
                required: 2,
            },
        );

        let rendered = render_run_report(&report);

        assert!(rendered.contains("phase: failed"));
        assert!(rendered.contains("failed in: verify-quorum"));
        assert!(rendered.contains("record: vault/openbao-bootstrap (kubernetes)"));
        assert!(rendered.contains("root token: ****ABCD"));
        assert!(rendered.contains("raft members: 1/3 (quorum 2)"));
        assert!(rendered.contains("failure: openbao-1: raft join failed"));
        assert!(rendered.contains("unsealed (3 shares)"));
    }

    #[test]
    fn test_run_report_never_prints_raw_token() {
        let rendered = render_run_report(&report());
        assert!(!rendered.contains("s.root"));
    }

    #[test]
    fn test_replica_line_marks_missing_outcomes() {
        let row = ReplicaRow::new(replica(2));
        let line = replica_line(&row);
        assert!(line.starts_with("openbao-2"));
        assert!(line.trim_end().ends_with('-'));
    }
}
