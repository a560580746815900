use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::LockError;

use super::{LockGuard, LockService};

struct Holder {
    generation: u64,
    revoke: CancellationToken,
}

#[derive(Default)]
struct HolderSlot {
    next_generation: u64,
    current: Option<Holder>,
}

struct MemoryLockInner {
    permits: Arc<Semaphore>,
    holder: Mutex<HolderSlot>,
}

/// Single-process lock for instances sharing one runtime (tests, embedded use).
#[derive(Clone)]
pub struct MemoryLockService {
    inner: Arc<MemoryLockInner>,
}

impl Default for MemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryLockInner {
                permits: Arc::new(Semaphore::new(1)),
                holder: Mutex::new(HolderSlot::default()),
            }),
        }
    }

    /// Revokes the current holder's lease. The holder is expected to notice via
    /// `LockGuard::revoked` and drop its guard. Returns whether anyone held it.
    pub fn revoke_holder(&self) -> bool {
        let slot = self.inner.holder.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.current.as_ref() {
            Some(holder) => {
                holder.revoke.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.permits.available_permits() == 0
    }
}

/// Clears the holder slot on release so a stale token is never revoked.
struct MemoryLease {
    _permit: OwnedSemaphorePermit,
    generation: u64,
    inner: Arc<MemoryLockInner>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        let mut slot = self.inner.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .current
            .as_ref()
            .is_some_and(|holder| holder.generation == self.generation)
        {
            slot.current = None;
        }
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self) -> Result<LockGuard, LockError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LockError::Unavailable("memory lock closed".into()))?;

        let revoke = CancellationToken::new();
        let generation = {
            let mut slot = self.inner.holder.lock().unwrap_or_else(PoisonError::into_inner);
            slot.next_generation += 1;
            let generation = slot.next_generation;
            slot.current = Some(Holder {
                generation,
                revoke: revoke.clone(),
            });
            generation
        };

        let lease = MemoryLease {
            _permit: permit,
            generation,
            inner: self.inner.clone(),
        };
        Ok(LockGuard::new(lease, revoke))
    }
}
