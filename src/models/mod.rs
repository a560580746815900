pub mod playback;
pub mod session;

pub use playback::{
    ActualPlaybackState, AmbientKind, PlaybackState, Track, TrackSource, MAX_VOLUME,
};
pub use session::{
    CompletedSession, SessionType, TimerDurations, TimerSession, TimerStatus,
};
