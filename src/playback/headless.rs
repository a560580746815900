use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use log::info;
use tokio::sync::watch;

use crate::{error::PlaybackError, models::Track};

use super::{PlaybackResource, PlayerFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Initialize,
    Load(String),
    Play,
    Pause,
    SetVolume(u8),
    Teardown,
}

struct ControlInner {
    journal: Mutex<Vec<JournalEntry>>,
    ready: watch::Sender<bool>,
    ready_on_initialize: AtomicBool,
    fail_loads: AtomicBool,
    hold_loads: watch::Sender<bool>,
    loading: AtomicBool,
    active: AtomicBool,
}

/// Shared handle onto the players one factory creates: journal of issued
/// operations, readiness switch, failure injection and a gate that keeps
/// loads in flight.
#[derive(Clone)]
pub struct HeadlessControl {
    inner: Arc<ControlInner>,
}

impl Default for HeadlessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessControl {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                journal: Mutex::new(Vec::new()),
                ready,
                ready_on_initialize: AtomicBool::new(true),
                fail_loads: AtomicBool::new(false),
                hold_loads: watch::channel(false).0,
                loading: AtomicBool::new(false),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a player from this factory is initialized and not torn down.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn set_ready_on_initialize(&self, ready: bool) {
        self.inner.ready_on_initialize.store(ready, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.ready.send_replace(ready);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.inner.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// While held, `load` blocks after its checks and before taking effect.
    pub fn hold_loads(&self, hold: bool) {
        self.inner.hold_loads.send_replace(hold);
    }

    /// Whether a load is currently blocked on the gate.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    fn record(&self, entry: JournalEntry) {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }
}

/// A resource with no audio device behind it: it logs and journals every
/// command. Used when the crate is built without the `audio` feature.
pub struct HeadlessPlayer {
    control: HeadlessControl,
}

impl HeadlessPlayer {
    pub fn new(control: HeadlessControl) -> Self {
        Self { control }
    }

    fn ensure_ready(&self) -> Result<(), PlaybackError> {
        if self.control.is_ready() {
            Ok(())
        } else {
            Err(PlaybackError::NotReady)
        }
    }
}

#[async_trait]
impl PlaybackResource for HeadlessPlayer {
    async fn initialize(&mut self) -> Result<(), PlaybackError> {
        self.control.record(JournalEntry::Initialize);
        self.control.inner.active.store(true, Ordering::SeqCst);
        if self.control.inner.ready_on_initialize.load(Ordering::SeqCst) {
            self.control.set_ready(true);
        }
        Ok(())
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.control.inner.ready.subscribe()
    }

    async fn load(&mut self, track: &Track) -> Result<(), PlaybackError> {
        self.ensure_ready()?;
        if self.control.inner.fail_loads.load(Ordering::SeqCst) {
            return Err(PlaybackError::Load {
                track: track.id.clone(),
                reason: "load failure injected".into(),
            });
        }

        let mut hold = self.control.inner.hold_loads.subscribe();
        let held = *hold.borrow_and_update();
        if held {
            self.control.inner.loading.store(true, Ordering::SeqCst);
            let _ = hold.wait_for(|held| !*held).await;
            self.control.inner.loading.store(false, Ordering::SeqCst);
        }

        info!("[headless] load {} ({})", track.id, track.title);
        self.control.record(JournalEntry::Load(track.id.clone()));
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        self.ensure_ready()?;
        info!("[headless] play");
        self.control.record(JournalEntry::Play);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.ensure_ready()?;
        info!("[headless] pause");
        self.control.record(JournalEntry::Pause);
        Ok(())
    }

    async fn set_volume(&mut self, volume: u8) -> Result<(), PlaybackError> {
        self.ensure_ready()?;
        info!("[headless] volume {volume}");
        self.control.record(JournalEntry::SetVolume(volume));
        Ok(())
    }

    async fn teardown(&mut self) {
        self.control.record(JournalEntry::Teardown);
        self.control.inner.loading.store(false, Ordering::SeqCst);
        self.control.inner.active.store(false, Ordering::SeqCst);
        self.control.set_ready(false);
    }
}

#[derive(Clone, Default)]
pub struct HeadlessPlayerFactory {
    control: HeadlessControl,
}

impl HeadlessPlayerFactory {
    pub fn new(control: HeadlessControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> HeadlessControl {
        self.control.clone()
    }
}

impl PlayerFactory for HeadlessPlayerFactory {
    fn create(&self) -> Box<dyn PlaybackResource> {
        Box::new(HeadlessPlayer::new(self.control.clone()))
    }
}
