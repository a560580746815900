use std::sync::Arc;

use log::{info, warn};
use tokio::{
    sync::{broadcast, watch, Mutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::InstanceConfig,
    leader::{LeaderElection, LeadershipToken},
    lock::LockService,
    models::{PlaybackState, TimerSession, MAX_VOLUME},
    notify::{Notice, Notifier, SoundSink},
    playback::{LeaderPlayback, PlaybackController, PlayerFactory, TrackCatalog},
    settings::{Settings, SettingsProvider},
    store::{Repository, StateStore},
    sync::{LocalState, SharedState, Synchronizer},
    timer::{DriftOutcome, TimerController},
};

/// Collaborators one instance is built from. Instances of the same deployment
/// share `store` and `lock`; everything else is per instance.
pub struct InstanceDeps {
    pub store: Arc<dyn StateStore>,
    pub lock: Arc<dyn LockService>,
    pub settings: Arc<dyn SettingsProvider>,
    pub sounds: Arc<dyn SoundSink>,
    pub players: Arc<dyn PlayerFactory>,
}

/// One running copy of the client.
pub struct Instance {
    id: String,
    state: SharedState,
    timer: TimerController,
    playback: PlaybackController,
    leader: Arc<LeaderPlayback>,
    leadership: watch::Receiver<Option<LeadershipToken>>,
    yield_signal: Arc<Notify>,
    notifier: Notifier,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Instance {
    /// Restores shared state, recovers drift and starts the tick, sync and
    /// election loops. Store trouble at startup degrades to defaults with a
    /// notice rather than failing.
    pub async fn launch(deps: InstanceDeps, config: &InstanceConfig) -> Self {
        let id = Uuid::new_v4().to_string();
        let repo = Repository::new(deps.store);
        // Subscribe before reading so no write between the two is missed.
        let changes = repo.subscribe();
        let notifier = Notifier::new();
        let settings = deps.settings.snapshot();

        let catalog = TrackCatalog::default().shared();
        let state: SharedState = Arc::new(Mutex::new(LocalState {
            timer: restore_timer(&repo, &settings, &notifier).await,
            playback: restore_playback(&repo, &settings, &notifier).await,
        }));

        let playback = PlaybackController::new(
            state.clone(),
            repo.clone(),
            catalog.clone(),
            notifier.clone(),
        );
        if let Err(err) = playback.refresh_catalog().await {
            notifier.warn(format!("Could not read custom tracks: {err}"));
        }

        let timer = TimerController::new(
            state.clone(),
            repo.clone(),
            deps.settings.clone(),
            deps.sounds,
            notifier.clone(),
            config.tick_interval,
        );
        match timer.recover_drift().await {
            DriftOutcome::Unchanged => {}
            outcome => info!("Startup drift recovery: {outcome:?}"),
        }

        let leader = Arc::new(LeaderPlayback::new(
            deps.players,
            catalog,
            state.clone(),
            notifier.clone(),
        ));
        let election = LeaderElection::new(deps.lock, leader.clone())
            .with_retry_delay(config.lock_poll_interval);
        let leadership = election.watch();
        let yield_signal = election.yield_handle();

        let cancel = CancellationToken::new();
        let synchronizer = Synchronizer::new(
            state.clone(),
            repo,
            timer.clone(),
            playback.clone(),
            leader.clone(),
            notifier.clone(),
        );
        let tasks = vec![
            synchronizer.spawn(changes, cancel.child_token()),
            election.spawn(cancel.child_token()),
        ];
        timer.spawn_ticker(cancel.child_token()).await;

        info!("Instance {id} launched");
        Self {
            id,
            state,
            timer,
            playback,
            leader,
            leadership,
            yield_signal,
            notifier,
            cancel,
            tasks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub async fn local_state(&self) -> LocalState {
        self.state.lock().await.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.borrow().is_some()
    }

    /// Whether the playback resource is currently owned by this instance.
    pub fn is_driving_playback(&self) -> bool {
        self.leader.is_driving()
    }

    pub fn leadership(&self) -> watch::Receiver<Option<LeadershipToken>> {
        self.leadership.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// Steps down if leading; the instance competes for the lock again shortly after.
    pub fn yield_leadership(&self) {
        self.yield_signal.notify_waiters();
    }

    /// Call after the host wakes from suspension.
    pub async fn reactivate(&self) -> DriftOutcome {
        self.timer.recover_drift().await
    }

    /// Stops all loops. Leadership, if held, is given up after the playback
    /// resource is torn down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.timer.cancel_ticker().await;
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!("instance task ended abnormally: {err}");
            }
        }
        info!("Instance {} stopped", self.id);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn restore_timer(repo: &Repository, settings: &Settings, notifier: &Notifier) -> TimerSession {
    match repo.load_timer().await {
        Ok(Some(session)) => session,
        Ok(None) => TimerSession::idle(settings.timer.durations()),
        Err(err) => {
            notifier.warn(format!("Could not restore timer, starting fresh: {err}"));
            TimerSession::idle(settings.timer.durations())
        }
    }
}

async fn restore_playback(
    repo: &Repository,
    settings: &Settings,
    notifier: &Notifier,
) -> PlaybackState {
    let defaults = PlaybackState {
        desired_playing: false,
        volume: settings.playback.default_volume.min(MAX_VOLUME),
        selected_track_ref: settings.playback.default_track.clone(),
    };
    match repo.load_playback().await {
        Ok(Some(state)) => state,
        Ok(None) => defaults,
        Err(err) => {
            notifier.warn(format!("Could not restore playback, using defaults: {err}"));
            defaults
        }
    }
}
