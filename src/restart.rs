//! Restarts the routing proxy so it rereads the registry file.
//!
//! A failed restart never undoes the registry change that preceded it. The
//! failure carries the command to run by hand instead.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

pub(crate) const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to restart \"{service}\": {detail}")]
pub(crate) struct RestartFailure {
    pub service: String,
    pub detail: String,
    /// The command an operator can run to apply the change manually.
    pub remedy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Restarted {
    pub service: String,
    pub stdout: String,
    pub stderr: String,
}

/// The command that restarts a service. The service name is appended as the
/// final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RestartCommand {
    program: String,
    args: Vec<String>,
}

impl RestartCommand {
    pub(crate) fn new(program: &str, args: &[String]) -> RestartCommand {
        RestartCommand {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    pub(crate) fn display(&self, service: &str) -> String {
        let mut parts = vec![self.program.as_str()];

        parts.extend(self.args.iter().map(|a| a.as_str()));
        parts.push(service);

        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RestartCoordinator {
    command: RestartCommand,
    timeout: Duration,
}

fn trimmed(output: &[u8]) -> String {
    String::from_utf8_lossy(output).trim().to_string()
}

impl RestartCoordinator {
    pub(crate) fn new(command: RestartCommand, timeout: Duration) -> RestartCoordinator {
        RestartCoordinator { command, timeout }
    }

    /// The manual command for restarting `service`.
    pub(crate) fn remedy(&self, service: &str) -> String {
        self.command.display(service)
    }

    pub(crate) async fn restart(&self, service: &str) -> Result<Restarted, RestartFailure> {
        let failure = |detail: String| RestartFailure {
            service: service.to_string(),
            detail,
            remedy: self.remedy(service),
        };

        tracing::info!(service, command = %self.command.display(service), "restarting service");

        let mut command = Command::new(&self.command.program);

        command
            .args(&self.command.args)
            .arg(service)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(failure(format!(
                    "could not run `{}`: {}",
                    self.command.program, err
                )))
            }
            Err(_) => {
                return Err(failure(format!(
                    "no response within {}s, the restart command was killed",
                    self.timeout.as_secs()
                )))
            }
        };

        let stdout = trimmed(&output.stdout);
        let stderr = trimmed(&output.stderr);

        if !output.status.success() {
            let detail = if stderr.is_empty() {
                format!("`{}` exited with {}", self.remedy(service), output.status)
            } else {
                format!(
                    "`{}` exited with {}: {}",
                    self.remedy(service),
                    output.status,
                    stderr
                )
            };

            tracing::warn!(service, status = %output.status, "service restart failed");

            return Err(failure(detail));
        }

        tracing::info!(service, "service restarted");

        Ok(Restarted {
            service: service.to_string(),
            stdout,
            stderr,
        })
    }
}
