use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cli::{cancel_on_interrupt, orchestrator_or_die};
use crate::config::Config;
use crate::orchestrator::{Error, Orchestrator, Verification, EXIT_SUCCESS};
use crate::provision::{JobStatus, ProvisionHandle, ProvisionLog, Provisioned};
use crate::{error, note, warn, ProvisionArgs};

/// How much of the pull output to repeat when provisioning fails.
const FAILURE_TAIL: usize = 10;

const STATUS_POLL: Duration = Duration::from_millis(100);

/// Reports a finished pull and whether the engine now lists the model.
pub(crate) fn report_provisioned(provisioned: &Provisioned, verification: &Verification) {
    let identifier = provisioned.identifier.as_str();

    eprintln!(
        "provisioned \"{}\" in {:.1}s",
        identifier,
        provisioned.elapsed.as_secs_f64()
    );

    match verification {
        Verification::Found(name) => {
            tracing::info!(identifier, installed = %name, "pulled model is installed");
        }
        Verification::Missing => {
            warn!(
                "\"{}\" was pulled but the local engine does not list it",
                identifier
            );

            print_tail(&provisioned.log);
        }
        Verification::Unknown(err) => {
            warn!("could not check that \"{}\" is installed: {}", identifier, err);
        }
    }
}

fn print_tail(log: &ProvisionLog) {
    if log.is_empty() {
        return;
    }

    eprintln!("last output:");

    for line in log.tail(FAILURE_TAIL) {
        eprintln!("  | {}", line);
    }
}

/// Reports a failed operation and returns its exit code.
pub(crate) fn report_failure(orchestrator: &Orchestrator, identifier: &str, err: &Error) -> i32 {
    error!("{}", err);

    if let Error::Provision(err) = err {
        if let Some(log) = err.log() {
            print_tail(log);
        }

        note!(
            "the pull command was `{}`",
            orchestrator.provision_command(identifier)
        );
    }

    err.exit_code()
}

/// Waits for a background pull, passing Ctrl-C on as a cancellation.
async fn wait_for(handle: ProvisionHandle, cancel: &CancellationToken) -> Result<Provisioned, Error> {
    let mut poll = tokio::time::interval(STATUS_POLL);
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if !cancelled => {
                handle.cancel();
                cancelled = true;
            }
            _ = poll.tick() => {
                if handle.status() != JobStatus::Running {
                    break;
                }
            }
        }
    }

    tracing::debug!(identifier = handle.identifier(), status = ?handle.status(), "pull finished");

    Ok(handle.wait().await?)
}

pub(crate) async fn provision_cmd(config: &Config, args: &ProvisionArgs) -> i32 {
    let mut orchestrator = orchestrator_or_die(config);

    if let Some(secs) = args.timeout {
        orchestrator = orchestrator.with_provision_timeout(Duration::from_secs(secs));
    }

    let cancel = cancel_on_interrupt();

    let handle = orchestrator.spawn_provision(&args.identifier);

    match wait_for(handle, &cancel).await {
        Ok(provisioned) => {
            let verification = orchestrator.verify_installed(&args.identifier).await;

            report_provisioned(&provisioned, &verification);

            EXIT_SUCCESS
        }
        Err(err) => report_failure(&orchestrator, &args.identifier, &err),
    }
}
