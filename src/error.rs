use std::time::Duration;

use thiserror::Error;

/// Terminal failures of a bootstrap run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration is unusable; raised before any external call.
    #[error("invalid configuration: {0}")]
    Precondition(String),

    #[error("timed out after {} waiting for {what}", human(.waited))]
    Timeout { what: String, waited: Duration },

    /// The cluster is initialized but its bootstrap material cannot be found.
    #[error(
        "cluster is initialized but bootstrap record {record} does not exist; \
         refusing to generate new key material"
    )]
    Inconsistency { record: String },

    #[error("initialization reply from {replica} is unusable: {reason}")]
    InitResponse { replica: String, reason: String },

    #[error("leader {replica} is still sealed after applying {applied} of {threshold} key shares")]
    LeaderSealed {
        replica: String,
        applied: usize,
        threshold: u8,
    },

    #[error("quorum not met: {members} of {expected} replicas are raft members, {required} required")]
    QuorumNotMet {
        members: u32,
        expected: u32,
        required: u32,
    },

    #[error("bootstrap record store failed: {0:#}")]
    Store(anyhow::Error),

    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Replies from a replica that signal an existing state instead of a failure.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{replica} is already initialized")]
    AlreadyInitialized { replica: String },

    #[error("{replica} is already a raft member")]
    AlreadyMember { replica: String },

    /// The call went through but its reply cannot be used.
    #[error("unusable reply: {0:#}")]
    Reply(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A key share refused by the replica; resubmitting it cannot succeed.
#[derive(Debug, Error)]
#[error("{replica} rejected the key share: {reason}")]
pub struct ShareRejected {
    pub replica: String,
    pub reason: String,
}

impl ShareRejected {
    /// Finds a rejection anywhere in the context chain of `err`.
    #[must_use]
    pub fn is_cause_of(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<Self>())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {record} already exists")]
    AlreadyExists { record: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
