use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    log_debug, log_warn,
    models::{PlaybackState, TimerSession, TimerStatus},
    notify::Notifier,
    playback::{LeaderPlayback, PlaybackController},
    store::{
        Repository, StoreChange, CUSTOM_PLAYLISTS_KEY, PLAYBACK_STATE_KEY, TIMER_HISTORY_KEY,
        TIMER_SESSION_KEY,
    },
    timer::TimerController,
};

const ENABLE_LOGS: bool = true;

/// In-memory copy of the shared state. Ticks, local edits and notification
/// handling all take the same lock, which makes them one mutation queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub timer: TimerSession,
    pub playback: PlaybackState,
}

pub type SharedState = Arc<Mutex<LocalState>>;

/// Applies store notifications to this instance.
#[derive(Clone)]
pub struct Synchronizer {
    state: SharedState,
    repo: Repository,
    timer: TimerController,
    playback: PlaybackController,
    leader: Arc<LeaderPlayback>,
    notifier: Notifier,
}

impl Synchronizer {
    pub fn new(
        state: SharedState,
        repo: Repository,
        timer: TimerController,
        playback: PlaybackController,
        leader: Arc<LeaderPlayback>,
        notifier: Notifier,
    ) -> Self {
        Self {
            state,
            repo,
            timer,
            playback,
            leader,
            notifier,
        }
    }

    pub fn spawn(
        self,
        mut changes: broadcast::Receiver<StoreChange>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => self.handle(&change).await,
                        Err(RecvError::Lagged(missed)) => {
                            log_warn!("[sync] missed {missed} notifications; rehydrating everything");
                            self.rehydrate_all().await;
                        }
                        Err(RecvError::Closed) => {
                            log_warn!("[sync] store notifications closed");
                            break;
                        }
                    },
                }
            }
        })
    }

    pub async fn handle(&self, change: &StoreChange) {
        log_debug!("[sync] {} changed (rev {})", change.key, change.revision);
        match change.key.as_str() {
            TIMER_SESSION_KEY => self.rehydrate_timer().await,
            PLAYBACK_STATE_KEY => self.rehydrate_playback().await,
            CUSTOM_PLAYLISTS_KEY => self.refresh_catalog().await,
            TIMER_HISTORY_KEY => {}
            other => log_debug!("[sync] ignoring change to {other}"),
        }
    }

    pub async fn rehydrate_all(&self) {
        self.refresh_catalog().await;
        self.rehydrate_timer().await;
        self.rehydrate_playback().await;
    }

    /// Replaces the local timer with the stored one. A stored Running timer at
    /// zero is a completion owed; completing it is a no-op when another
    /// instance already consumed the session id.
    async fn rehydrate_timer(&self) {
        let mut local = self.state.lock().await;
        match self.repo.load_timer().await {
            Ok(Some(stored)) => {
                local.timer = stored;
                if local.timer.status == TimerStatus::Running && local.timer.time_remaining_seconds == 0 {
                    self.timer.complete_locked(&mut local, Utc::now()).await;
                }
            }
            Ok(None) => {}
            Err(err) => self
                .notifier
                .warn(format!("Could not read timer state: {err}")),
        }
    }

    async fn rehydrate_playback(&self) {
        let desired = {
            let mut local = self.state.lock().await;
            match self.repo.load_playback().await {
                Ok(Some(stored)) => local.playback = stored,
                Ok(None) => {}
                Err(err) => {
                    self.notifier
                        .warn(format!("Could not read playback state: {err}"));
                    return;
                }
            }
            local.playback.clone()
        };
        self.leader.submit(desired);
    }

    async fn refresh_catalog(&self) {
        if let Err(err) = self.playback.refresh_catalog().await {
            self.notifier
                .warn(format!("Could not read custom tracks: {err}"));
            return;
        }
        let desired = self.state.lock().await.playback.clone();
        self.leader.submit(desired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notify::LogSoundSink,
        playback::{HeadlessPlayerFactory, TrackCatalog},
        settings::{Settings, StaticSettings},
        store::{MemoryStore, StateStore},
    };
    use std::time::Duration;

    struct Node {
        state: SharedState,
        timer: TimerController,
        sync: Synchronizer,
    }

    fn node(store: &MemoryStore) -> Node {
        let state: SharedState = Arc::new(Mutex::new(LocalState::default()));
        let repo = Repository::new(Arc::new(store.clone()));
        let notifier = Notifier::new();
        let catalog = TrackCatalog::default().shared();
        let timer = TimerController::new(
            state.clone(),
            repo.clone(),
            Arc::new(StaticSettings::new(Settings::default())),
            Arc::new(LogSoundSink),
            notifier.clone(),
            Duration::from_secs(1),
        );
        let playback =
            PlaybackController::new(state.clone(), repo.clone(), catalog.clone(), notifier.clone());
        let leader = Arc::new(LeaderPlayback::new(
            Arc::new(HeadlessPlayerFactory::default()),
            catalog,
            state.clone(),
            notifier.clone(),
        ));
        let sync = Synchronizer::new(state.clone(), repo, timer.clone(), playback, leader, notifier);
        Node { state, timer, sync }
    }

    #[tokio::test]
    async fn timer_notification_rehydrates_the_other_instance() {
        let store = MemoryStore::new();
        let a = node(&store);
        let b = node(&store);

        let started = a.timer.start().await.unwrap();
        b.sync
            .handle(&StoreChange {
                key: TIMER_SESSION_KEY.into(),
                revision: 1,
            })
            .await;

        assert_eq!(b.state.lock().await.timer, started);
    }

    #[tokio::test]
    async fn expired_timer_in_the_store_completes_exactly_once() {
        let store = MemoryStore::new();
        let a = node(&store);
        let b = node(&store);
        a.timer.start().await.unwrap();
        {
            let mut local = a.state.lock().await;
            local.timer.time_remaining_seconds = 0;
            Repository::new(Arc::new(store.clone()))
                .save_timer(&local.timer)
                .await
                .unwrap();
        }

        let change = StoreChange {
            key: TIMER_SESSION_KEY.into(),
            revision: 2,
        };
        // Both instances see the expired timer before either completion lands.
        tokio::join!(a.sync.handle(&change), b.sync.handle(&change));
        a.sync.handle(&change).await;
        b.sync.handle(&change).await;

        let history = a.timer.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(b.state.lock().await.timer.status, TimerStatus::Idle);
    }

    #[tokio::test]
    async fn spawned_synchronizer_follows_store_changes() {
        let store = MemoryStore::new();
        let a = node(&store);
        let b = node(&store);
        let cancel = CancellationToken::new();
        let handle = b.sync.clone().spawn(store.subscribe(), cancel.clone());

        a.timer.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(b.state.lock().await.timer.status, TimerStatus::Running);

        cancel.cancel();
        handle.await.unwrap();
    }
}
