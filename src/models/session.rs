use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Idle => "Idle",
            TimerStatus::Running => "Running",
            TimerStatus::Paused => "Paused",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    #[default]
    Work,
    Break,
    LongBreak,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Work => "Work",
            SessionType::Break => "Break",
            SessionType::LongBreak => "LongBreak",
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, SessionType::Break | SessionType::LongBreak)
    }
}

/// Durations cached from the settings collaborator so a timer restored
/// without settings access still counts down the right length.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerDurations {
    pub work_minutes: u32,
    pub break_minutes: u32,
    pub long_break_minutes: u32,
    pub long_break_interval: u32,
}

impl Default for TimerDurations {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            break_minutes: 5,
            long_break_minutes: 15,
            long_break_interval: 4,
        }
    }
}

impl TimerDurations {
    pub fn seconds_for(&self, session_type: SessionType) -> u32 {
        let minutes = match session_type {
            SessionType::Work => self.work_minutes,
            SessionType::Break => self.break_minutes,
            SessionType::LongBreak => self.long_break_minutes,
        };
        minutes.saturating_mul(60)
    }
}

/// The single logical timer shared by every instance through `timer.session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub status: TimerStatus,
    pub session_type: SessionType,
    pub time_remaining_seconds: u32,
    pub total_seconds: u32,
    pub current_session_id: Option<String>,
    pub consecutive_work_sessions: u32,
    pub selected_goal_ref: Option<String>,
    pub last_tick_timestamp: Option<DateTime<Utc>>,
    /// When the running session was first started; feeds `CompletedSession::started_at`.
    #[serde(default)]
    pub session_started_at: Option<DateTime<Utc>>,
    pub durations: TimerDurations,
}

impl Default for TimerSession {
    fn default() -> Self {
        Self::idle(TimerDurations::default())
    }
}

impl TimerSession {
    pub fn idle(durations: TimerDurations) -> Self {
        let total = durations.seconds_for(SessionType::Work);
        Self {
            status: TimerStatus::Idle,
            session_type: SessionType::Work,
            time_remaining_seconds: total,
            total_seconds: total,
            current_session_id: None,
            consecutive_work_sessions: 0,
            selected_goal_ref: None,
            last_tick_timestamp: None,
            session_started_at: None,
            durations,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != TimerStatus::Idle
    }

    /// Running with nothing left: the signal that a completion is owed.
    pub fn is_expired(&self) -> bool {
        self.status == TimerStatus::Running && self.time_remaining_seconds == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub session_type: SessionType,
    pub interrupted: bool,
    pub goal_ref: Option<String>,
}

impl CompletedSession {
    pub fn duration_minutes(&self) -> u32 {
        self.duration_seconds / 60
    }
}
