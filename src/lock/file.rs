use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
    time::Duration,
};

use async_trait::async_trait;
use fs2::FileExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{error::LockError, log_debug};

use super::{LockGuard, LockService};

const ENABLE_LOGS: bool = true;

/// Upper bound of the random delay added to each poll so that instances
/// started together do not retry in lockstep.
const POLL_JITTER_MS: u64 = 100;

/// OS advisory lock on a file. The kernel drops the lock when the owning
/// process exits, however it exits.
#[derive(Debug, Clone)]
pub struct FileLockService {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileLockService {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
        }
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                LockError::Unavailable(format!(
                    "cannot create lock directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| {
                LockError::Unavailable(format!(
                    "cannot open lock file {}: {err}",
                    self.path.display()
                ))
            })
    }

    fn next_delay(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=POLL_JITTER_MS);
        self.poll_interval + Duration::from_millis(jitter)
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[async_trait]
impl LockService for FileLockService {
    async fn acquire(&self) -> Result<LockGuard, LockError> {
        let mut file = self.open()?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if is_contended(&err) => {
                    log_debug!("lock {} busy, retrying", self.path.display());
                    tokio::time::sleep(self.next_delay()).await;
                }
                Err(err) => {
                    return Err(LockError::Unavailable(format!(
                        "advisory locks unsupported for {}: {err}",
                        self.path.display()
                    )))
                }
            }
        }

        // Informational only; the lock itself is what matters.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        // Never revoked: the OS only releases on close or process exit.
        Ok(LockGuard::new(file, CancellationToken::new()))
    }
}
