use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::SessionType;

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing, non-blocking message (failed write, playback trouble, ...).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Fan-out of notices to whatever UI is attached. Sending never blocks and
/// never fails when nobody listens.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.send(NoticeLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.send(NoticeLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.send(NoticeLevel::Error, message);
    }

    fn send(&self, level: NoticeLevel, message: String) {
        let _ = self.tx.send(Notice {
            level,
            message,
            at: Utc::now(),
        });
    }
}

/// Fire-and-forget cues for the sound/notification collaborator.
pub trait SoundSink: Send + Sync {
    fn session_started(&self, session_type: SessionType);
    fn session_completed(&self, session_type: SessionType);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSoundSink;

impl SoundSink for LogSoundSink {
    fn session_started(&self, session_type: SessionType) {
        info!("{} session started", session_type.as_str());
    }

    fn session_completed(&self, session_type: SessionType) {
        info!("{} session completed", session_type.as_str());
    }
}
