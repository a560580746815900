use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::{models::TimerDurations, timer::AutoStart};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerSettings {
    pub work_minutes: u32,
    pub break_minutes: u32,
    pub long_break_minutes: u32,
    pub long_break_interval: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let durations = TimerDurations::default();
        Self {
            work_minutes: durations.work_minutes,
            break_minutes: durations.break_minutes,
            long_break_minutes: durations.long_break_minutes,
            long_break_interval: durations.long_break_interval,
            auto_start_breaks: false,
            auto_start_work: false,
        }
    }
}

impl TimerSettings {
    pub fn durations(&self) -> TimerDurations {
        TimerDurations {
            work_minutes: self.work_minutes,
            break_minutes: self.break_minutes,
            long_break_minutes: self.long_break_minutes,
            long_break_interval: self.long_break_interval.max(1),
        }
    }

    pub fn auto_start(&self) -> AutoStart {
        AutoStart {
            breaks: self.auto_start_breaks,
            work: self.auto_start_work,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackDefaults {
    pub default_track: String,
    pub default_volume: u8,
}

impl Default for PlaybackDefaults {
    fn default() -> Self {
        Self {
            default_track: "brown-noise".into(),
            default_volume: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub timer: TimerSettings,
    pub playback: PlaybackDefaults,
}

/// Read-only view of user settings. The timer and playback re-read it on
/// demand and never own it.
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> Settings;
}

/// In-memory provider for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticSettings {
    data: RwLock<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            data: RwLock::new(settings),
        }
    }

    pub fn set(&self, settings: Settings) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

impl SettingsProvider for StaticSettings {
    fn snapshot(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Settings persisted as JSON next to the state store.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings in {}: {err}; using defaults",
                    path.display()
                );
                Settings::default()
            })
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn update_timer(&self, timer: TimerSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.timer = timer;
        self.persist(&guard)
    }

    pub fn update_playback(&self, playback: PlaybackDefaults) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.playback = playback;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", self.path.display()))?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl SettingsProvider for SettingsStore {
    fn snapshot(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
