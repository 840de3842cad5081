//! Provisioning materializes a local backend by running an external pull
//! command (by default `docker exec ollama ollama pull <identifier>`).
//!
//! The [`Supervisor`] owns the child process for the lifetime of one call:
//! - Output from stdout and stderr is split into lines (on `\n` or `\r`, so
//!   progress bars arrive as separate updates), forwarded to a
//!   [`ProgressSink`] as it arrives, and kept in a [`ProvisionLog`].
//! - Completion is decided by the exit status alone. Output is never scraped
//!   to guess whether the pull finished.
//! - A deadline bounds the call. When it expires, or the caller cancels, the
//!   child is asked to stop (`SIGTERM`), given a grace window, and then
//!   killed. The child is always reaped before the call returns.
//!
//! Provisioning never touches the registry.

mod background;
mod job;
mod output;

pub(crate) use background::{JobStatus, ProvisionHandle};

use core::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use job::ProvisioningJob;

pub(crate) const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);
pub(crate) const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Everything the pull command printed, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProvisionLog {
    lines: Vec<String>,
}

impl ProvisionLog {
    pub(crate) fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    #[cfg(test)]
    pub(crate) fn lines(&self) -> &[String] {
        &self.lines
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The last `n` lines.
    pub(crate) fn tail(&self, n: usize) -> &[String] {
        &self.lines[self.lines.len().saturating_sub(n)..]
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for ProvisionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
        }

        Ok(())
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by a signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub(crate) enum Error {
    /// The pull command could not be started at all
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("provisioning \"{identifier}\" failed with {}", describe_exit(.exit_code))]
    SubprocessFailure {
        identifier: String,
        exit_code: Option<i32>,
        log: ProvisionLog,
    },
    #[error("provisioning \"{identifier}\" did not finish within {}s and was terminated", .deadline.as_secs())]
    Timeout {
        identifier: String,
        deadline: Duration,
        log: ProvisionLog,
    },
    #[error("provisioning \"{identifier}\" was cancelled")]
    Cancelled {
        identifier: String,
        log: ProvisionLog,
    },
    /// Waiting on the child failed
    #[error("lost track of the pull command: {0}")]
    Wait(#[source] io::Error),
    /// A background provisioning task panicked or was aborted
    #[error("provisioning task aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// The output collected before the failure, if the command ran at all.
    pub(crate) fn log(&self) -> Option<&ProvisionLog> {
        match self {
            Error::SubprocessFailure { log, .. }
            | Error::Timeout { log, .. }
            | Error::Cancelled { log, .. } => Some(log),
            Error::Launch { .. } | Error::Wait(_) | Error::Aborted(_) => None,
        }
    }
}

/// A successful provisioning run.
#[derive(Debug, Clone)]
pub(crate) struct Provisioned {
    pub identifier: String,
    pub log: ProvisionLog,
    pub elapsed: Duration,
}

/// Receives provisioning output line by line as it is produced.
pub(crate) trait ProgressSink: Send + Sync {
    fn line(&self, identifier: &str, line: &str);
}

/// The external command that pulls a backend. The identifier is appended as
/// the final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PullCommand {
    program: String,
    args: Vec<String>,
}

impl PullCommand {
    pub(crate) fn new(program: &str, args: &[String]) -> PullCommand {
        PullCommand {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    fn build(&self, identifier: &str) -> Command {
        let mut command = Command::new(&self.program);

        command.args(&self.args).arg(identifier);

        command
    }

    pub(crate) fn display(&self, identifier: &str) -> String {
        let mut parts = vec![self.program.as_str()];

        parts.extend(self.args.iter().map(|a| a.as_str()));
        parts.push(identifier);

        parts.join(" ")
    }
}

#[derive(Clone)]
pub(crate) struct Supervisor {
    command: PullCommand,
    grace: Duration,
    sink: Arc<dyn ProgressSink>,
}

impl Supervisor {
    /// `grace` is how long a child gets to exit after being asked to stop
    /// before it is killed.
    pub(crate) fn new(command: PullCommand, grace: Duration, sink: Arc<dyn ProgressSink>) -> Supervisor {
        Supervisor {
            command,
            grace,
            sink,
        }
    }

    pub(crate) fn command(&self) -> &PullCommand {
        &self.command
    }

    /// Runs the pull command for `identifier` to completion, or until
    /// `deadline` elapses or `cancel` fires.
    pub(crate) async fn provision(
        &self,
        identifier: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Provisioned, Error> {
        let job = ProvisioningJob::launch(&self.command, identifier, deadline)?;

        job.run(self.sink.as_ref(), self.grace, cancel).await
    }

    /// Starts provisioning as a detached task. The returned handle can be
    /// polled, cancelled, or awaited; dropping it leaves the task running.
    pub(crate) fn spawn(&self, identifier: &str, deadline: Duration) -> ProvisionHandle {
        ProvisionHandle::spawn(self.clone(), identifier, deadline)
    }
}
