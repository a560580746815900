pub mod catalog;
pub mod controller;
pub mod driver;
pub mod headless;
pub mod leader;
pub mod reconciler;

#[cfg(feature = "audio")]
mod ambient;
#[cfg(feature = "audio")]
pub mod engine;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{error::PlaybackError, models::Track};

pub use catalog::{builtin_tracks, SharedCatalog, TrackCatalog};
pub use controller::PlaybackController;
pub use driver::PlaybackDriver;
pub use headless::{HeadlessControl, HeadlessPlayer, HeadlessPlayerFactory, JournalEntry};
pub use leader::LeaderPlayback;
pub use reconciler::{plan, PlaybackOp, ReconcileOutcome, Reconciler};

#[cfg(feature = "audio")]
pub use engine::{AudioEngine, AudioEngineFactory};

/// The stateful media resource only the leader may drive.
///
/// Operations may fail with `NotReady` until `readiness()` reports `true`.
#[async_trait]
pub trait PlaybackResource: Send {
    async fn initialize(&mut self) -> Result<(), PlaybackError>;

    /// Current readiness; flips to `true` once the resource can take commands.
    fn readiness(&self) -> watch::Receiver<bool>;

    async fn load(&mut self, track: &Track) -> Result<(), PlaybackError>;

    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), PlaybackError>;

    /// `volume` is 0..=100.
    async fn set_volume(&mut self, volume: u8) -> Result<(), PlaybackError>;

    /// Releases the resource. Must be safe to call in any state, including
    /// halfway through another operation that was cancelled.
    async fn teardown(&mut self);
}

/// Builds a fresh resource each time this instance is elected.
pub trait PlayerFactory: Send + Sync {
    fn create(&self) -> Box<dyn PlaybackResource>;
}
