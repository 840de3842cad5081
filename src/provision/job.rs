use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::output::forward_lines;
use super::{Error, ProgressSink, ProvisionLog, Provisioned, PullCommand};

/// How long to keep collecting output once the child is gone. A descendant
/// that inherited the pipes can keep them open indefinitely.
const DRAIN_WINDOW: Duration = Duration::from_secs(2);

enum Finish {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// One running pull command. Dropping a job kills its child.
pub(super) struct ProvisioningJob {
    identifier: String,
    started_at: Instant,
    deadline: Instant,
    child: Child,
    lines: UnboundedReceiver<String>,
    log: ProvisionLog,
}

impl ProvisioningJob {
    pub(super) fn launch(
        command: &PullCommand,
        identifier: &str,
        limit: Duration,
    ) -> Result<ProvisioningJob, Error> {
        let mut cmd = command.build(identifier);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The child leads a process group of its own so that stopping it also
        // reaches whatever it started.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|source| Error::Launch {
                command: command.display(identifier),
                source,
            })?;

        let (tx, lines) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        let started_at = Instant::now();

        tracing::info!(
            identifier,
            pid = child.id(),
            command = %command.display(identifier),
            "provisioning started"
        );

        Ok(ProvisioningJob {
            identifier: identifier.to_string(),
            started_at,
            deadline: started_at + limit,
            child,
            lines,
            log: ProvisionLog::default(),
        })
    }

    pub(super) async fn run(
        mut self,
        sink: &dyn ProgressSink,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<Provisioned, Error> {
        let expiry = tokio::time::sleep_until(self.deadline);
        tokio::pin!(expiry);

        let mut streaming = true;

        // Cancellation and the deadline come first so a chatty child cannot
        // starve them.
        let finish = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Finish::Cancelled,
                _ = &mut expiry => break Finish::TimedOut,
                status = self.child.wait() => break Finish::Exited(status.map_err(Error::Wait)?),
                line = self.lines.recv(), if streaming => match line {
                    Some(line) => {
                        sink.line(&self.identifier, &line);
                        self.log.push(line);
                    }
                    None => streaming = false,
                },
            }
        };

        let limit = self.deadline - self.started_at;

        match finish {
            Finish::Exited(status) => {
                self.drain(sink).await;

                let elapsed = self.started_at.elapsed();

                if status.success() {
                    tracing::info!(identifier = %self.identifier, ?elapsed, "provisioning finished");

                    Ok(Provisioned {
                        identifier: self.identifier,
                        log: self.log,
                        elapsed,
                    })
                } else {
                    tracing::warn!(identifier = %self.identifier, %status, "provisioning failed");

                    Err(Error::SubprocessFailure {
                        identifier: self.identifier,
                        exit_code: status.code(),
                        log: self.log,
                    })
                }
            }
            Finish::TimedOut => {
                tracing::warn!(identifier = %self.identifier, ?limit, "provisioning deadline expired");

                self.terminate(grace).await?;
                self.drain(sink).await;

                Err(Error::Timeout {
                    identifier: self.identifier,
                    deadline: limit,
                    log: self.log,
                })
            }
            Finish::Cancelled => {
                tracing::warn!(identifier = %self.identifier, "provisioning cancelled");

                self.terminate(grace).await?;
                self.drain(sink).await;

                Err(Error::Cancelled {
                    identifier: self.identifier,
                    log: self.log,
                })
            }
        }
    }

    /// Asks the child's process group to stop, waits up to `grace` for the
    /// child, then kills the group and the child. Returns once the child has
    /// been reaped.
    async fn terminate(&mut self, grace: Duration) -> Result<(), Error> {
        let pid = match self.child.id() {
            Some(pid) => pid,
            // Already reaped.
            None => return Ok(()),
        };

        let mut reaped = false;

        if signal_group(pid, "TERM").await {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(pid, %status, "pull command stopped");
                    reaped = true;
                }
                Ok(Err(err)) => return Err(Error::Wait(err)),
                Err(_) => {
                    tracing::debug!(pid, ?grace, "pull command ignored stop request, killing");
                }
            }
        }

        // Descendants may have ignored the stop request or outlived the child.
        signal_group(pid, "KILL").await;

        if reaped {
            return Ok(());
        }

        self.child.kill().await.map_err(Error::Wait)
    }

    async fn drain(&mut self, sink: &dyn ProgressSink) {
        let collected = tokio::time::timeout(DRAIN_WINDOW, async {
            while let Some(line) = self.lines.recv().await {
                sink.line(&self.identifier, &line);
                self.log.push(line);
            }
        })
        .await;

        if collected.is_err() {
            tracing::debug!(
                identifier = %self.identifier,
                "pull output still open after exit, giving up on the rest"
            );
        }
    }
}

/// Sends `SIG<signal>` to every process in the group led by `pgid`. Returns
/// whether the signal was delivered.
#[cfg(unix)]
async fn signal_group(pgid: u32, signal: &str) -> bool {
    let sent = tokio::process::Command::new("kill")
        .arg(format!("-{}", signal))
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match sent {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::debug!(pgid, signal, %status, "kill failed");
            false
        }
        Err(err) => {
            tracing::debug!(pgid, signal, "could not run kill: {}", err);
            false
        }
    }
}

#[cfg(not(unix))]
async fn signal_group(_pgid: u32, _signal: &str) -> bool {
    false
}
