use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Error, Provisioned, Supervisor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// A provisioning run executing in its own task.
pub(crate) struct ProvisionHandle {
    identifier: String,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
    task: JoinHandle<Result<Provisioned, Error>>,
}

impl ProvisionHandle {
    pub(super) fn spawn(supervisor: Supervisor, identifier: &str, deadline: Duration) -> ProvisionHandle {
        let cancel = CancellationToken::new();
        let (tx, status) = watch::channel(JobStatus::Running);

        let task = {
            let cancel = cancel.clone();
            let identifier = identifier.to_string();

            tokio::spawn(async move {
                let result = supervisor.provision(&identifier, deadline, &cancel).await;

                let finished = match &result {
                    Ok(_) => JobStatus::Succeeded,
                    Err(err) => JobStatus::Failed(err.to_string()),
                };

                let _ = tx.send(finished);

                result
            })
        };

        ProvisionHandle {
            identifier: identifier.to_string(),
            cancel,
            status,
            task,
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Requests termination. The child is stopped the same way as on a
    /// deadline; [`ProvisionHandle::wait`] then yields [`Error::Cancelled`].
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn wait(self) -> Result<Provisioned, Error> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(Error::Aborted(err.to_string())),
        }
    }
}
