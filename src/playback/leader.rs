use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::{
    leader::{LeadershipObserver, LeadershipToken},
    log_info,
    models::PlaybackState,
    notify::Notifier,
    sync::SharedState,
};

use super::{PlaybackDriver, PlayerFactory, Reconciler, SharedCatalog};

const ENABLE_LOGS: bool = true;

/// Owns the playback resource while this instance leads.
///
/// The driver slot is never held across an await, and never together with
/// the instance state lock.
pub struct LeaderPlayback {
    factory: Arc<dyn PlayerFactory>,
    catalog: SharedCatalog,
    state: SharedState,
    notifier: Notifier,
    driver: Mutex<Option<PlaybackDriver>>,
}

impl LeaderPlayback {
    pub fn new(
        factory: Arc<dyn PlayerFactory>,
        catalog: SharedCatalog,
        state: SharedState,
        notifier: Notifier,
    ) -> Self {
        Self {
            factory,
            catalog,
            state,
            notifier,
            driver: Mutex::new(None),
        }
    }

    /// Hands a desired state to the reconciler. Ignored while following.
    pub fn submit(&self, desired: PlaybackState) {
        if let Some(driver) = self.slot().as_ref() {
            driver.submit(desired);
        }
    }

    pub fn is_driving(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<PlaybackDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LeadershipObserver for LeaderPlayback {
    async fn on_elected(&self, token: &LeadershipToken) {
        let initial = self.state.lock().await.playback.clone();
        let reconciler = Reconciler::new(
            self.factory.create(),
            self.catalog.clone(),
            self.notifier.clone(),
        );
        let previous = self
            .slot()
            .replace(PlaybackDriver::spawn(reconciler, initial));
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        if token.degraded {
            self.notifier
                .warn("No lock service available; this instance plays audio regardless");
        }
        log_info!("[leader] playback resource acquired");

        // A notification handled between the read above and installing the
        // driver would otherwise be lost.
        let latest = self.state.lock().await.playback.clone();
        self.submit(latest);
    }

    async fn on_deposed(&self) {
        let driver = self.slot().take();
        if let Some(driver) = driver {
            driver.shutdown().await;
            log_info!("[leader] playback resource released");
        }
    }
}
