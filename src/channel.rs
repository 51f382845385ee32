use std::time::Duration;

use anyhow::Result;

use crate::replica::ReplicaRef;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams, for matching error markers.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout.trim(), self.stderr.trim())
    }
}

/// Executes a command inside a named replica.
#[allow(async_fn_in_trait)]
pub trait CommandChannel {
    /// Runs `argv` in `replica`, bounded by `timeout`.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not
    /// as an error.
    ///
    /// # Errors
    /// Returns an error when the command could not be started or timed out.
    async fn execute(
        &self,
        replica: &ReplicaRef,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput>;
}
