pub mod file;
pub mod memory;

use std::any::Any;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LockError;

pub use file::FileLockService;
pub use memory::MemoryLockService;

/// Mutual exclusion across instances. At most one `LockGuard` is alive at a
/// time; it is released when dropped or when its holder terminates.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Waits until the lock is granted.
    async fn acquire(&self) -> Result<LockGuard, LockError>;
}

/// Proof of holding the lock. Dropping it releases the lock.
pub struct LockGuard {
    revoked: CancellationToken,
    _held: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new(held: impl Any + Send + Sync, revoked: CancellationToken) -> Self {
        Self {
            revoked,
            _held: Box::new(held),
        }
    }

    /// Resolves once the service has taken the lock away from this holder.
    pub async fn revoked(&self) {
        self.revoked.cancelled().await
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_cancelled()
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Stand-in for runtimes without any lock primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLock;

#[async_trait]
impl LockService for UnavailableLock {
    async fn acquire(&self) -> Result<LockGuard, LockError> {
        Err(LockError::Unavailable(
            "no lock service in this environment".into(),
        ))
    }
}
