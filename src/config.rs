use std::{env, path::PathBuf, time::Duration};

const DEFAULT_TICK_MS: u64 = 1000;
const DEFAULT_POLL_MS: u64 = 250;
const DEFAULT_LOCK_POLL_MS: u64 = 500;

/// Per-instance runtime knobs. Durations and playback defaults live in
/// `Settings`; this only covers where data lives and how often loops run.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub store_poll_interval: Duration,
    pub lock_poll_interval: Duration,
    pub debug: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            store_poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_MS),
            debug: false,
        }
    }
}

impl InstanceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env::var_os("FOCUSDECK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            tick_interval: millis_from_env("FOCUSDECK_TICK_MS").unwrap_or(defaults.tick_interval),
            store_poll_interval: millis_from_env("FOCUSDECK_POLL_MS")
                .unwrap_or(defaults.store_poll_interval),
            lock_poll_interval: defaults.lock_poll_interval,
            debug: env::var("FOCUSDECK_DEBUG")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("focusdeck.sqlite3")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("leader.lock")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("focusdeck"))
        .unwrap_or_else(|| PathBuf::from(".focusdeck"))
}

fn millis_from_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_in_the_data_dir() {
        let config = InstanceConfig {
            data_dir: PathBuf::from("/tmp/fd"),
            ..InstanceConfig::default()
        };
        assert_eq!(config.store_path(), PathBuf::from("/tmp/fd/focusdeck.sqlite3"));
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/fd/settings.json"));
        assert_eq!(config.lock_path(), PathBuf::from("/tmp/fd/leader.lock"));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }
}
