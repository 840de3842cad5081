use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use super::Error;

pub(crate) const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive ownership of a registry file across processes.
///
/// The lock is an advisory OS lock on a sibling `<registry>.lock` file, so it
/// dies with its owner. The file itself is left in place after release; it
/// only records the pid of the last owner.
#[derive(Debug)]
pub(crate) struct RegistryLock {
    path: PathBuf,
    file: File,
}

pub(crate) fn lock_path(registry: &Path) -> PathBuf {
    let mut name = registry
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();

    name.push(".lock");

    registry.with_file_name(name)
}

impl RegistryLock {
    /// Waits up to `timeout` for the lock guarding `registry`.
    pub(crate) async fn acquire(registry: &Path, timeout: Duration) -> Result<RegistryLock, Error> {
        let path = lock_path(registry);
        let deadline = Instant::now() + timeout;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| Error::LockFailed(path.clone(), err))?;

        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(path));
                    }

                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(TryLockError::Error(err)) => return Err(Error::LockFailed(path, err)),
            }
        }

        let mut lock = RegistryLock { path, file };

        // The pid is informational; a failure to write it still leaves a valid lock.
        let _ = lock.record_owner();

        tracing::trace!(lock = %lock.path.display(), "acquired registry lock");

        Ok(lock)
    }

    fn record_owner(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;

        writeln!(self.file, "{}", std::process::id())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // Closing the file would release the lock as well; unlocking first
        // lets a failure be seen.
        if let Err(err) = self.file.unlock() {
            tracing::warn!(lock = %self.path.display(), "failed to release registry lock: {}", err);
        }
    }
}
