use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::LockError,
    lock::{LockGuard, LockService},
    log_debug, log_error, log_info, log_warn,
};

const ENABLE_LOGS: bool = true;

/// Pause before competing for the lock again after yielding or a lock error.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Held by the one instance allowed to drive the playback resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipToken {
    pub acquired_at: DateTime<Utc>,
    /// Granted without a lock because none was available; another instance
    /// may be leading too.
    pub degraded: bool,
}

/// Reacts to leadership changes. `on_deposed` must release everything
/// `on_elected` took before it returns: the lock is only handed on afterwards.
#[async_trait]
pub trait LeadershipObserver: Send + Sync {
    async fn on_elected(&self, token: &LeadershipToken);
    async fn on_deposed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Shutdown,
    Revoked,
    Yielded,
}

/// Competes for the shared lock for as long as the instance lives.
pub struct LeaderElection {
    lock: Arc<dyn LockService>,
    observer: Arc<dyn LeadershipObserver>,
    token_tx: watch::Sender<Option<LeadershipToken>>,
    yield_signal: Arc<Notify>,
    retry_delay: Duration,
}

impl LeaderElection {
    pub fn new(lock: Arc<dyn LockService>, observer: Arc<dyn LeadershipObserver>) -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            lock,
            observer,
            token_tx,
            yield_signal: Arc::new(Notify::new()),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Current token, `None` while following.
    pub fn watch(&self) -> watch::Receiver<Option<LeadershipToken>> {
        self.token_tx.subscribe()
    }

    /// Notifying it makes the current leader step down. No effect while
    /// following.
    pub fn yield_handle(&self) -> Arc<Notify> {
        self.yield_signal.clone()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.lock.acquire() => result,
            };

            let release = match acquired {
                Ok(guard) => {
                    let release = self.lead(false, Some(&guard), &cancel).await;
                    drop(guard);
                    release
                }
                Err(LockError::Unavailable(reason)) => {
                    log_warn!("[election] lock unavailable ({reason}); leading in degraded mode");
                    self.lead(true, None, &cancel).await
                }
                Err(err) => {
                    log_error!("[election] lock acquisition failed: {err}");
                    Release::Yielded
                }
            };

            match release {
                Release::Shutdown => break,
                Release::Revoked => log_info!("[election] lock revoked; competing again"),
                Release::Yielded => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
        log_debug!("[election] stopped");
    }

    /// Leads until shutdown, revocation or a yield. The token is withdrawn and
    /// the observer has torn down before this returns.
    async fn lead(
        &self,
        degraded: bool,
        guard: Option<&LockGuard>,
        cancel: &CancellationToken,
    ) -> Release {
        let token = LeadershipToken {
            acquired_at: Utc::now(),
            degraded,
        };
        log_info!("[election] elected leader (degraded: {degraded})");

        // Registered before the token is published, so a yield that arrives
        // while the observer is still starting up is not lost.
        let yielded = self.yield_signal.notified();
        tokio::pin!(yielded);
        yielded.as_mut().enable();

        self.token_tx.send_replace(Some(token.clone()));
        self.observer.on_elected(&token).await;

        let release = tokio::select! {
            biased;
            _ = cancel.cancelled() => Release::Shutdown,
            _ = revoked(guard) => Release::Revoked,
            _ = &mut yielded => Release::Yielded,
        };

        self.token_tx.send_replace(None);
        self.observer.on_deposed().await;
        log_info!("[election] stepped down ({release:?})");
        release
    }
}

async fn revoked(guard: Option<&LockGuard>) {
    match guard {
        Some(guard) => guard.revoked().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{MemoryLockService, UnavailableLock};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl LeadershipObserver for Journal {
        async fn on_elected(&self, _token: &LeadershipToken) {
            self.events.lock().unwrap().push("elected");
        }

        async fn on_deposed(&self) {
            self.events.lock().unwrap().push("deposed");
        }
    }

    /// Observer whose start-up blocks until released.
    #[derive(Default)]
    struct SlowStart {
        release: Notify,
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl LeadershipObserver for SlowStart {
        async fn on_elected(&self, _token: &LeadershipToken) {
            self.events.lock().unwrap().push("elected");
            self.release.notified().await;
        }

        async fn on_deposed(&self) {
            self.events.lock().unwrap().push("deposed");
        }
    }

    async fn wait_until(
        rx: &mut watch::Receiver<Option<LeadershipToken>>,
        leading: bool,
    ) -> Option<LeadershipToken> {
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|token| token.is_some() == leading),
        )
        .await
        .unwrap()
        .unwrap()
        .clone()
    }

    #[tokio::test]
    async fn unavailable_lock_leads_in_degraded_mode() {
        let journal = Arc::new(Journal::default());
        let election = LeaderElection::new(Arc::new(UnavailableLock), journal.clone());
        let mut rx = election.watch();
        let cancel = CancellationToken::new();
        let handle = election.spawn(cancel.clone());

        let token = wait_until(&mut rx, true).await.unwrap();
        assert!(token.degraded);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*journal.events.lock().unwrap(), vec!["elected", "deposed"]);
    }

    #[tokio::test]
    async fn revoked_leader_steps_down_before_the_next_holder_leads() {
        let lock = MemoryLockService::new();
        let first = Arc::new(Journal::default());
        let second = Arc::new(Journal::default());
        let cancel = CancellationToken::new();

        let a = LeaderElection::new(Arc::new(lock.clone()), first.clone());
        let mut a_rx = a.watch();
        let a_handle = a.spawn(cancel.clone());
        let token = wait_until(&mut a_rx, true).await.unwrap();
        assert!(!token.degraded);

        let b = LeaderElection::new(Arc::new(lock.clone()), second.clone());
        let mut b_rx = b.watch();
        let b_handle = b.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b_rx.borrow().is_none());

        assert!(lock.revoke_holder());
        wait_until(&mut b_rx, true).await;
        assert_eq!(*first.events.lock().unwrap(), vec!["elected", "deposed"]);

        cancel.cancel();
        a_handle.await.unwrap();
        b_handle.await.unwrap();
    }

    #[tokio::test]
    async fn yield_during_start_up_is_honoured() {
        let observer = Arc::new(SlowStart::default());
        let election = LeaderElection::new(Arc::new(MemoryLockService::new()), observer.clone())
            .with_retry_delay(Duration::from_secs(30));
        let mut rx = election.watch();
        let yield_signal = election.yield_handle();
        let cancel = CancellationToken::new();
        let handle = election.spawn(cancel.clone());

        wait_until(&mut rx, true).await;
        // `on_elected` has not returned yet.
        yield_signal.notify_waiters();
        observer.release.notify_one();

        wait_until(&mut rx, false).await;
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["elected", "deposed"]
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn yielding_hands_leadership_to_a_waiting_instance() {
        let lock = MemoryLockService::new();
        let cancel = CancellationToken::new();

        let a = LeaderElection::new(Arc::new(lock.clone()), Arc::new(Journal::default()))
            .with_retry_delay(Duration::from_millis(50));
        let mut a_rx = a.watch();
        let a_yield = a.yield_handle();
        let a_handle = a.spawn(cancel.clone());
        wait_until(&mut a_rx, true).await;

        let b = LeaderElection::new(Arc::new(lock.clone()), Arc::new(Journal::default()));
        let mut b_rx = b.watch();
        let b_handle = b.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        a_yield.notify_waiters();
        wait_until(&mut b_rx, true).await;
        assert!(a_rx.borrow().is_none());

        cancel.cancel();
        a_handle.await.unwrap();
        b_handle.await.unwrap();
    }
}
