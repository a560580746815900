use log::error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{log_debug, log_warn, models::PlaybackState};

use super::reconciler::Reconciler;

const ENABLE_LOGS: bool = true;

/// Owns the leader's reconciler on its own task. Desired states are fed in
/// through a watch channel, so a burst of updates collapses into the latest.
pub struct PlaybackDriver {
    desired: watch::Sender<PlaybackState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PlaybackDriver {
    pub fn spawn(reconciler: Reconciler, initial: PlaybackState) -> Self {
        let (desired, desired_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(reconciler, desired_rx, cancel.clone()));
        Self {
            desired,
            cancel,
            handle,
        }
    }

    /// Queues a reconciliation pass against `desired`, even when unchanged,
    /// so a failed pass can be retried and catalog changes picked up.
    pub fn submit(&self, desired: PlaybackState) {
        self.desired.send_replace(desired);
    }

    /// Cancels any in-flight pass and waits until the resource is torn down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!("playback driver task failed: {err}");
        }
    }
}

async fn drive(
    mut reconciler: Reconciler,
    mut desired: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
) {
    let mut readiness = reconciler.readiness();
    let mut readiness_open = true;

    let initialized = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = reconciler.initialize() => Some(result),
    };
    match initialized {
        None => {
            reconciler.teardown().await;
            return;
        }
        Some(Err(err)) => log_warn!("[driver] playback resource failed to initialize: {err}"),
        Some(Ok(())) => log_debug!("[driver] playback resource initialized"),
    }

    let first = desired.borrow_and_update().clone();
    if run_pass(&mut reconciler, &first, &cancel).await {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = desired.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = desired.borrow_and_update().clone();
                    if !run_pass(&mut reconciler, &next, &cancel).await {
                        break;
                    }
                }
                changed = readiness.changed(), if readiness_open => {
                    if changed.is_err() {
                        log_warn!("[driver] readiness signal closed");
                        readiness_open = false;
                        continue;
                    }
                    let ready = *readiness.borrow_and_update();
                    if ready && !retry_pending(&mut reconciler, &cancel).await {
                        break;
                    }
                }
            }
        }
    }

    reconciler.teardown().await;
    log_debug!("[driver] playback resource torn down");
}

/// Returns `false` if cancelled mid-pass.
async fn run_pass(
    reconciler: &mut Reconciler,
    desired: &PlaybackState,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = reconciler.reconcile(desired) => true,
    }
}

async fn retry_pending(reconciler: &mut Reconciler, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = reconciler.on_ready() => true,
    }
}
