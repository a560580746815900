use tokio::sync::watch;

use crate::{
    error::PlaybackError,
    log_debug, log_info,
    models::{ActualPlaybackState, PlaybackState, MAX_VOLUME},
    notify::Notifier,
};

use super::{PlaybackResource, SharedCatalog};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOp {
    Load(String),
    Play,
    Pause,
    SetVolume(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(Vec<PlaybackOp>),
    /// The resource is not ready; the desired state is queued until it is.
    Deferred,
    /// The pass stopped at the failing op. `applied` lists what succeeded.
    Failed {
        applied: Vec<PlaybackOp>,
        error: PlaybackError,
    },
}

/// Minimal ops taking `actual` to `desired`: load, then play or pause, then
/// volume. A load leaves the resource paused, so play is planned after it.
/// An empty track ref never unloads; play is skipped while nothing is loaded.
pub fn plan(desired: &PlaybackState, actual: &ActualPlaybackState) -> Vec<PlaybackOp> {
    let mut ops = Vec::new();
    let mut playing = actual.playing;
    let mut loaded = actual.track_ref.is_some();

    if let Some(track) = desired.track_ref() {
        if actual.track_ref.as_deref() != Some(track) {
            ops.push(PlaybackOp::Load(track.to_string()));
            playing = false;
            loaded = true;
        }
    }

    if desired.desired_playing && !playing && loaded {
        ops.push(PlaybackOp::Play);
    } else if !desired.desired_playing && playing {
        ops.push(PlaybackOp::Pause);
    }

    // Another writer may have stored an out-of-range volume.
    let volume = desired.volume.min(MAX_VOLUME);
    if actual.volume != Some(volume) {
        ops.push(PlaybackOp::SetVolume(volume));
    }

    ops
}

/// Leader-side bridge between desired and actual playback.
pub struct Reconciler {
    resource: Box<dyn PlaybackResource>,
    readiness: watch::Receiver<bool>,
    actual: ActualPlaybackState,
    pending: Option<PlaybackState>,
    catalog: SharedCatalog,
    notifier: Notifier,
}

impl Reconciler {
    pub fn new(
        resource: Box<dyn PlaybackResource>,
        catalog: SharedCatalog,
        notifier: Notifier,
    ) -> Self {
        let readiness = resource.readiness();
        Self {
            resource,
            readiness,
            actual: ActualPlaybackState::default(),
            pending: None,
            catalog,
            notifier,
        }
    }

    pub fn actual(&self) -> &ActualPlaybackState {
        &self.actual
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.readiness.clone()
    }

    pub async fn initialize(&mut self) -> Result<(), PlaybackError> {
        self.resource.initialize().await
    }

    /// Applies whatever `desired` still needs. Issues nothing when the last
    /// pass already converged on the same state.
    pub async fn reconcile(&mut self, desired: &PlaybackState) -> ReconcileOutcome {
        if !*self.readiness.borrow() {
            log_debug!("[reconciler] resource not ready; queueing desired state");
            self.pending = Some(desired.clone());
            return ReconcileOutcome::Deferred;
        }
        self.pending = None;

        let ops = plan(desired, &self.actual);
        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            match self.apply(&op).await {
                Ok(()) => applied.push(op),
                Err(PlaybackError::NotReady) => {
                    log_debug!("[reconciler] resource became unready mid-pass");
                    self.pending = Some(desired.clone());
                    return ReconcileOutcome::Deferred;
                }
                Err(error) => {
                    self.notifier.warn(format!("Playback problem: {error}"));
                    return ReconcileOutcome::Failed { applied, error };
                }
            }
        }

        if !applied.is_empty() {
            log_info!("[reconciler] applied {:?}", applied);
        }
        ReconcileOutcome::Applied(applied)
    }

    /// Retries the queued state once the resource reports ready.
    pub async fn on_ready(&mut self) -> Option<ReconcileOutcome> {
        let pending = self.pending.take()?;
        Some(self.reconcile(&pending).await)
    }

    /// Releases the resource. Whatever it was doing is forgotten.
    pub async fn teardown(&mut self) {
        self.resource.teardown().await;
        self.actual = ActualPlaybackState::default();
        self.pending = None;
    }

    async fn apply(&mut self, op: &PlaybackOp) -> Result<(), PlaybackError> {
        match op {
            PlaybackOp::Load(track_ref) => {
                let track = self
                    .catalog
                    .read()
                    .map_err(|_| PlaybackError::Engine("track catalog poisoned".into()))?
                    .get(track_ref)
                    .cloned()
                    .ok_or_else(|| PlaybackError::UnknownTrack(track_ref.clone()))?;
                self.resource.load(&track).await?;
                self.actual.track_ref = Some(track.id);
                self.actual.playing = false;
            }
            PlaybackOp::Play => {
                self.resource.play().await?;
                self.actual.playing = true;
            }
            PlaybackOp::Pause => {
                self.resource.pause().await?;
                self.actual.playing = false;
            }
            PlaybackOp::SetVolume(volume) => {
                self.resource.set_volume(*volume).await?;
                self.actual.volume = Some(*volume);
            }
        }
        Ok(())
    }
}
