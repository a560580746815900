use serde::{Deserialize, Serialize};

pub const MAX_VOLUME: u8 = 100;

/// Logical playback intent shared through `playback.state`. Never carries the
/// live engine status; that lives only in the leader's `ActualPlaybackState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub desired_playing: bool,
    pub volume: u8,
    #[serde(default)]
    pub selected_track_ref: String,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            desired_playing: false,
            volume: 50,
            selected_track_ref: String::new(),
        }
    }
}

impl PlaybackState {
    pub fn track_ref(&self) -> Option<&str> {
        if self.selected_track_ref.is_empty() {
            None
        } else {
            Some(self.selected_track_ref.as_str())
        }
    }
}

/// What the leader's resource is actually doing, as far as acknowledged
/// operations tell. Local to the leader, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualPlaybackState {
    pub playing: bool,
    pub volume: Option<u8>,
    pub track_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AmbientKind {
    BrownNoise,
    Rain,
    Binaural,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum TrackSource {
    Ambient(AmbientKind),
    File(String),
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub source: TrackSource,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source,
        }
    }
}
