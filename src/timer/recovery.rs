use chrono::{DateTime, Utc};
use log::warn;

use crate::models::{TimerSession, TimerStatus};

/// A gap this large between the last accepted tick and now means the
/// instance was suspended; the ticker recovers instead of counting one second.
pub const SUSPEND_GAP_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
    /// Not running, or nothing to correct from.
    Unchanged,
    Adjusted { elapsed_seconds: u32, remaining: u32 },
    /// The session ran out while nobody was ticking; a completion is owed.
    Expired { elapsed_seconds: u32 },
}

/// Reconciles a restored timer with wall-clock time.
///
/// Whole seconds elapsed since `last_tick_timestamp` are subtracted from the
/// remaining time. When that exhausts the session the remaining time is left
/// at zero and `Expired` is returned so the caller completes it; otherwise the
/// baseline is re-stamped to `now`, which makes a second run with no time in
/// between a no-op.
pub fn recover_drift(session: &mut TimerSession, now: DateTime<Utc>) -> DriftOutcome {
    if session.status != TimerStatus::Running {
        return DriftOutcome::Unchanged;
    }
    let Some(last_tick) = session.last_tick_timestamp else {
        return DriftOutcome::Unchanged;
    };

    let elapsed_ms = (now - last_tick).num_milliseconds();
    let elapsed_seconds = if elapsed_ms < 0 {
        warn!("last tick is {}ms in the future; treating as no drift", -elapsed_ms);
        0
    } else {
        u32::try_from(elapsed_ms / 1000).unwrap_or(u32::MAX)
    };

    let remaining = session.time_remaining_seconds.saturating_sub(elapsed_seconds);
    if remaining == 0 {
        session.time_remaining_seconds = 0;
        return DriftOutcome::Expired { elapsed_seconds };
    }

    session.time_remaining_seconds = remaining;
    session.last_tick_timestamp = Some(now);
    DriftOutcome::Adjusted {
        elapsed_seconds,
        remaining,
    }
}

/// True when the gap since the last accepted tick looks like a suspension.
pub fn is_suspend_gap(session: &TimerSession, now: DateTime<Utc>) -> bool {
    session
        .last_tick_timestamp
        .map(|last| (now - last).num_seconds() >= SUSPEND_GAP_SECS)
        .unwrap_or(false)
}
