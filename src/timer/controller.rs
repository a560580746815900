use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::{StoreError, TimerError},
    models::{CompletedSession, SessionType, TimerSession},
    notify::{Notifier, SoundSink},
    settings::SettingsProvider,
    store::{Repository, TimerWrite},
    sync::{LocalState, SharedState},
};

use super::{
    recovery::{is_suspend_gap, recover_drift, DriftOutcome},
    state::{TickOutcome, TimerSignal},
};

/// Drives the shared timer for one instance. Every mutation happens under the
/// instance's state lock and is written through to the store before the lock
/// is released, so ticks and incoming notifications never interleave.
#[derive(Clone)]
pub struct TimerController {
    state: SharedState,
    repo: Repository,
    settings: Arc<dyn SettingsProvider>,
    sounds: Arc<dyn SoundSink>,
    notifier: Notifier,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    /// Set while the local timer holds a change the store rejected.
    unsaved: Arc<AtomicBool>,
}

impl TimerController {
    pub fn new(
        state: SharedState,
        repo: Repository,
        settings: Arc<dyn SettingsProvider>,
        sounds: Arc<dyn SoundSink>,
        notifier: Notifier,
        tick_interval: Duration,
    ) -> Self {
        Self {
            state,
            repo,
            settings,
            sounds,
            notifier,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval,
            unsaved: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn snapshot(&self) -> TimerSession {
        self.state.lock().await.timer.clone()
    }

    pub async fn start(&self) -> Result<TimerSession, TimerError> {
        let mut local = self.state.lock().await;
        local.timer.apply_durations(self.durations());
        let signal = local
            .timer
            .start(Uuid::new_v4().to_string(), Utc::now())?;
        self.persist(&local.timer).await;
        self.emit(signal);
        Ok(local.timer.clone())
    }

    pub async fn pause(&self) -> Result<TimerSession, TimerError> {
        let mut local = self.state.lock().await;
        local.timer.pause()?;
        self.persist(&local.timer).await;
        Ok(local.timer.clone())
    }

    pub async fn resume(&self) -> Result<TimerSession, TimerError> {
        let mut local = self.state.lock().await;
        local.timer.resume(Utc::now())?;
        self.persist(&local.timer).await;
        Ok(local.timer.clone())
    }

    pub async fn skip(&self) -> TimerSession {
        let mut local = self.state.lock().await;
        local.timer.apply_durations(self.durations());
        local.timer.skip();
        self.persist(&local.timer).await;
        local.timer.clone()
    }

    pub async fn reset(&self) -> TimerSession {
        let mut local = self.state.lock().await;
        local.timer.apply_durations(self.durations());
        local.timer.reset();
        self.persist(&local.timer).await;
        local.timer.clone()
    }

    pub async fn select_session_type(
        &self,
        session_type: SessionType,
    ) -> Result<TimerSession, TimerError> {
        let mut local = self.state.lock().await;
        local.timer.apply_durations(self.durations());
        local.timer.select_session_type(session_type)?;
        self.persist(&local.timer).await;
        Ok(local.timer.clone())
    }

    /// Stores only the goal id; whether the goal exists is not checked here.
    pub async fn select_goal(&self, goal_ref: Option<String>) -> TimerSession {
        let mut local = self.state.lock().await;
        local.timer.select_goal(goal_ref);
        self.persist(&local.timer).await;
        local.timer.clone()
    }

    /// Picks up changed durations while Idle.
    pub async fn refresh_durations(&self) -> TimerSession {
        let mut local = self.state.lock().await;
        let before = local.timer.clone();
        local.timer.apply_durations(self.durations());
        if local.timer != before {
            self.persist(&local.timer).await;
        }
        local.timer.clone()
    }

    pub async fn tick(&self) -> TickOutcome {
        let mut local = self.state.lock().await;
        self.tick_locked(&mut local, Utc::now()).await
    }

    pub async fn complete_current(&self) -> Option<CompletedSession> {
        let mut local = self.state.lock().await;
        self.complete_locked(&mut local, Utc::now()).await
    }

    pub async fn recover_drift(&self) -> DriftOutcome {
        let mut local = self.state.lock().await;
        self.recover_locked(&mut local, Utc::now()).await
    }

    pub async fn history(&self) -> Result<Vec<CompletedSession>, StoreError> {
        self.repo.history().await
    }

    pub(crate) async fn tick_locked(&self, local: &mut LocalState, now: DateTime<Utc>) -> TickOutcome {
        if is_suspend_gap(&local.timer, now) {
            debug!("tick gap looks like a suspension; recovering drift");
            let baseline = local.timer.clone();
            return match self.recover_locked(local, now).await {
                DriftOutcome::Expired { .. } => TickOutcome::Expired,
                DriftOutcome::Adjusted { .. } => TickOutcome::Counted,
                DriftOutcome::Unchanged if local.timer != baseline => TickOutcome::Superseded,
                DriftOutcome::Unchanged => TickOutcome::NotRunning,
            };
        }

        let baseline = local.timer.clone();
        let outcome = local.timer.tick(now);
        if local.timer != baseline && !self.persist_derived(local, &baseline).await {
            return TickOutcome::Superseded;
        }
        if outcome == TickOutcome::Expired {
            self.complete_locked(local, now).await;
        }
        outcome
    }

    pub(crate) async fn recover_locked(
        &self,
        local: &mut LocalState,
        now: DateTime<Utc>,
    ) -> DriftOutcome {
        let baseline = local.timer.clone();
        let repaired = local.timer.normalize();

        let outcome = recover_drift(&mut local.timer, now);
        if (repaired || outcome != DriftOutcome::Unchanged)
            && local.timer != baseline
            && !self.persist_derived(local, &baseline).await
        {
            return DriftOutcome::Unchanged;
        }

        match outcome {
            DriftOutcome::Unchanged => {}
            DriftOutcome::Adjusted {
                elapsed_seconds,
                remaining,
            } => {
                if elapsed_seconds > 0 {
                    info!("Recovered {elapsed_seconds}s of drift; {remaining}s remaining");
                }
            }
            DriftOutcome::Expired { elapsed_seconds } => {
                info!("Session expired {elapsed_seconds}s into drift; completing it");
                self.complete_locked(local, now).await;
            }
        }
        outcome
    }

    /// Completes the current session if it still holds the id observed here.
    ///
    /// A failed history write is surfaced as a notice; the local transition
    /// stands either way.
    pub(crate) async fn complete_locked(
        &self,
        local: &mut LocalState,
        now: DateTime<Utc>,
    ) -> Option<CompletedSession> {
        let session_id = local.timer.current_session_id.clone()?;
        let settings = self.settings.snapshot();
        local.timer.apply_durations(settings.timer.durations());

        let completion = local.timer.complete_session(
            &session_id,
            now,
            settings.timer.auto_start(),
            || Uuid::new_v4().to_string(),
        )?;

        // Only the instance whose append lands first plays the cues; another
        // instance completing the same session stays quiet.
        let first_recorder = match self.repo.append_history(&completion.record).await {
            Ok(appended) => {
                if !appended {
                    debug!("session {session_id} already recorded by another instance");
                }
                appended
            }
            Err(err) => {
                self.notifier
                    .error(format!("Could not save completed session: {err}"));
                true
            }
        };

        self.persist(&local.timer).await;

        if first_recorder {
            for signal in completion.signals {
                self.emit(signal);
            }
        }
        Some(completion.record)
    }

    pub async fn spawn_ticker(&self, cancel: CancellationToken) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.tick().await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    pub async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    fn durations(&self) -> crate::models::TimerDurations {
        self.settings.snapshot().timer.durations()
    }

    async fn persist(&self, timer: &TimerSession) {
        match self.repo.save_timer(timer).await {
            Ok(()) => self.unsaved.store(false, Ordering::SeqCst),
            Err(err) => {
                self.unsaved.store(true, Ordering::SeqCst);
                self.notifier
                    .warn(format!("Timer change kept locally, not saved: {err}"));
            }
        }
    }

    /// Writes a timer derived from `baseline` by a tick or a drift fix. If
    /// another instance wrote since `baseline` was read, its timer is adopted
    /// and `false` returned. A local copy that never reached the store is
    /// written unconditionally, since it is the authoritative one.
    async fn persist_derived(&self, local: &mut LocalState, baseline: &TimerSession) -> bool {
        if self.unsaved.load(Ordering::SeqCst) {
            self.persist(&local.timer).await;
            return true;
        }
        match self.repo.replace_timer(baseline, &local.timer).await {
            Ok(TimerWrite::Written) => true,
            Ok(TimerWrite::Superseded(stored)) => {
                debug!("timer changed by another instance; adopting it");
                local.timer = stored;
                false
            }
            Err(err) => {
                self.unsaved.store(true, Ordering::SeqCst);
                self.notifier
                    .warn(format!("Timer change kept locally, not saved: {err}"));
                true
            }
        }
    }

    fn emit(&self, signal: TimerSignal) {
        match signal {
            TimerSignal::SessionStarted(kind) => self.sounds.session_started(kind),
            TimerSignal::SessionCompleted(kind) => self.sounds.session_completed(kind),
        }
    }
}
