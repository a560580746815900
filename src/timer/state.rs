use chrono::{DateTime, Utc};
use log::error;

use crate::{
    error::TimerError,
    models::{CompletedSession, SessionType, TimerDurations, TimerSession, TimerStatus},
};

/// Minimum spacing between accepted ticks. Every instance ticks the shared
/// timer at 1 Hz; ticks arriving sooner than this after the last accepted one
/// (usually from another instance) are dropped.
pub const MIN_TICK_SPACING_MS: i64 = 950;

/// Auto-start policy read from settings at completion time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoStart {
    pub breaks: bool,
    pub work: bool,
}

impl AutoStart {
    fn applies_to(&self, next: SessionType) -> bool {
        if next.is_break() {
            self.breaks
        } else {
            self.work
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    SessionStarted(SessionType),
    SessionCompleted(SessionType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotRunning,
    /// Another tick was accepted less than `MIN_TICK_SPACING_MS` ago.
    TooSoon,
    Counted,
    /// Remaining time hit zero; a completion is owed.
    Expired,
    /// Another instance changed the stored timer since this copy was read.
    /// The stored timer was adopted and nothing was counted.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub record: CompletedSession,
    pub signals: Vec<TimerSignal>,
}

impl TimerSession {
    pub fn start(&mut self, session_id: String, now: DateTime<Utc>) -> Result<TimerSignal, TimerError> {
        if self.status != TimerStatus::Idle {
            return Err(TimerError::InvalidTransition {
                op: "start",
                status: self.status,
            });
        }

        self.begin(session_id, now);
        Ok(TimerSignal::SessionStarted(self.session_type))
    }

    pub fn pause(&mut self) -> Result<(), TimerError> {
        if self.status != TimerStatus::Running {
            return Err(TimerError::InvalidTransition {
                op: "pause",
                status: self.status,
            });
        }
        self.status = TimerStatus::Paused;
        Ok(())
    }

    /// Re-stamps the tick baseline so time spent paused is never counted by
    /// drift recovery.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if self.status != TimerStatus::Paused {
            return Err(TimerError::InvalidTransition {
                op: "resume",
                status: self.status,
            });
        }
        self.status = TimerStatus::Running;
        self.last_tick_timestamp = Some(now);
        Ok(())
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.status != TimerStatus::Running {
            return TickOutcome::NotRunning;
        }
        if self.time_remaining_seconds == 0 {
            return TickOutcome::Expired;
        }
        if let Some(last) = self.last_tick_timestamp {
            if (now - last).num_milliseconds() < MIN_TICK_SPACING_MS {
                return TickOutcome::TooSoon;
            }
        }

        self.time_remaining_seconds -= 1;
        self.last_tick_timestamp = Some(now);

        if self.time_remaining_seconds == 0 {
            TickOutcome::Expired
        } else {
            TickOutcome::Counted
        }
    }

    /// Moves to whatever natural completion would have produced, without a
    /// history entry or sound, and leaves the timer Idle.
    pub fn skip(&mut self) {
        let next = self.advance_session_type();
        self.enter_idle(next);
    }

    /// Abandons the current session and restores the full duration.
    pub fn reset(&mut self) {
        self.enter_idle(self.session_type);
    }

    pub fn select_session_type(&mut self, session_type: SessionType) -> Result<(), TimerError> {
        if self.status != TimerStatus::Idle {
            return Err(TimerError::InvalidTransition {
                op: "change session type",
                status: self.status,
            });
        }
        self.enter_idle(session_type);
        Ok(())
    }

    pub fn select_goal(&mut self, goal_ref: Option<String>) {
        self.selected_goal_ref = goal_ref;
    }

    /// Refreshes cached durations. An Idle timer also picks up the new length;
    /// an active one keeps counting the length it started with.
    pub fn apply_durations(&mut self, durations: TimerDurations) {
        self.durations = durations;
        if self.status == TimerStatus::Idle {
            let total = durations.seconds_for(self.session_type);
            self.total_seconds = total;
            self.time_remaining_seconds = total;
        }
    }

    /// Completes the session identified by `session_id`.
    ///
    /// The id is consumed by the transition, so a second call with the same id
    /// (a duplicate notification, a drift recovery racing a tick) is a no-op
    /// and returns `None`.
    pub fn complete_session(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
        auto_start: AutoStart,
        next_session_id: impl FnOnce() -> String,
    ) -> Option<Completion> {
        if self.status == TimerStatus::Idle
            || self.current_session_id.as_deref() != Some(session_id)
        {
            return None;
        }

        let finished = self.session_type;
        let started_at = self.session_started_at.unwrap_or_else(|| {
            now - chrono::Duration::seconds(i64::from(self.total_seconds))
        });
        let record = CompletedSession {
            id: session_id.to_string(),
            started_at,
            completed_at: now,
            duration_seconds: self.total_seconds,
            session_type: finished,
            interrupted: false,
            goal_ref: self.selected_goal_ref.clone(),
        };

        if finished == SessionType::Work {
            self.selected_goal_ref = None;
        }

        let next = self.advance_session_type();
        let mut signals = vec![TimerSignal::SessionCompleted(finished)];

        self.enter_idle(next);
        if auto_start.applies_to(next) {
            self.begin(next_session_id(), now);
            signals.push(TimerSignal::SessionStarted(next));
        }

        Some(Completion { record, signals })
    }

    /// Repairs states that violate the Idle/active invariants. Returns `true`
    /// when something had to be fixed; such a state is a defect and is logged.
    pub fn normalize(&mut self) -> bool {
        let mut repaired = false;

        if self.status == TimerStatus::Idle
            && (self.current_session_id.is_some() || self.last_tick_timestamp.is_some())
        {
            error!("Idle timer carried session data; clearing it");
            self.current_session_id = None;
            self.last_tick_timestamp = None;
            self.session_started_at = None;
            repaired = true;
        }

        if self.status != TimerStatus::Idle && self.current_session_id.is_none() {
            error!(
                "{} timer had no session id; returning to Idle",
                self.status.as_str()
            );
            self.enter_idle(self.session_type);
            repaired = true;
        }

        if self.time_remaining_seconds > self.total_seconds {
            error!(
                "remaining {}s exceeded total {}s; clamping",
                self.time_remaining_seconds, self.total_seconds
            );
            self.time_remaining_seconds = self.total_seconds;
            repaired = true;
        }

        repaired
    }

    /// Work -> Break or LongBreak (counting the work session), Break -> Work,
    /// LongBreak -> Work with the counter reset.
    fn advance_session_type(&mut self) -> SessionType {
        match self.session_type {
            SessionType::Work => {
                let interval = self.durations.long_break_interval.max(1);
                let next = if self.consecutive_work_sessions + 1 >= interval {
                    SessionType::LongBreak
                } else {
                    SessionType::Break
                };
                self.consecutive_work_sessions += 1;
                next
            }
            SessionType::Break => SessionType::Work,
            SessionType::LongBreak => {
                self.consecutive_work_sessions = 0;
                SessionType::Work
            }
        }
    }

    fn begin(&mut self, session_id: String, now: DateTime<Utc>) {
        let total = self.durations.seconds_for(self.session_type);
        self.status = TimerStatus::Running;
        self.total_seconds = total;
        self.time_remaining_seconds = total;
        self.current_session_id = Some(session_id);
        self.last_tick_timestamp = Some(now);
        self.session_started_at = Some(now);
    }

    fn enter_idle(&mut self, session_type: SessionType) {
        let total = self.durations.seconds_for(session_type);
        self.session_type = session_type;
        self.status = TimerStatus::Idle;
        self.total_seconds = total;
        self.time_remaining_seconds = total;
        self.current_session_id = None;
        self.last_tick_timestamp = None;
        self.session_started_at = None;
    }
}
