pub mod memory;
mod migrations;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;

use crate::{
    error::StoreError,
    models::{CompletedSession, PlaybackState, TimerSession, Track},
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const TIMER_SESSION_KEY: &str = "timer.session";
pub const TIMER_HISTORY_KEY: &str = "timer.history";
pub const PLAYBACK_STATE_KEY: &str = "playback.state";
pub const CUSTOM_PLAYLISTS_KEY: &str = "playback.customPlaylists";

/// Capacity of the per-store notification channel. Receivers that fall further
/// behind observe `Lagged` and rehydrate everything.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// One applied write, delivered to every subscriber in apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub revision: u64,
}

/// Durable key-value store shared by every instance.
///
/// Values are opaque JSON strings. Every successful `put` or first-time
/// `append` is announced on the `subscribe` channel, including to the
/// subscriber that belongs to the writing instance.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Last write wins. Returns the revision assigned to the write.
    async fn put(&self, key: &str, value: String) -> Result<u64, StoreError>;

    /// Writes `value` only while `key` still holds exactly `expected` (`None`
    /// meaning absent). Returns `false`, without notifying, when it does not.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, StoreError>;

    /// Appends to the ordered log under `key`. Returns `false` without
    /// notifying when `entry_id` is already present.
    async fn append(&self, key: &str, entry_id: &str, value: String) -> Result<bool, StoreError>;

    async fn entries(&self, key: &str) -> Result<Vec<String>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Result of a conditional timer write.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerWrite {
    Written,
    /// The store no longer held the expected timer; this is what it holds.
    Superseded(TimerSession),
}

/// Typed access to the conceptual keys.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn StateStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    pub async fn load_timer(&self) -> Result<Option<TimerSession>, StoreError> {
        self.get_json(TIMER_SESSION_KEY).await
    }

    pub async fn save_timer(&self, session: &TimerSession) -> Result<(), StoreError> {
        self.put_json(TIMER_SESSION_KEY, session).await
    }

    /// Writes `next` only if the stored timer still equals `baseline`, the
    /// copy `next` was derived from. Background writes (ticks, drift fixes)
    /// go through here so they never undo another instance's action.
    pub async fn replace_timer(
        &self,
        baseline: &TimerSession,
        next: &TimerSession,
    ) -> Result<TimerWrite, StoreError> {
        let raw = self.store.get(TIMER_SESSION_KEY).await?;
        if let Some(raw) = raw.as_deref() {
            let stored: TimerSession = decode(TIMER_SESSION_KEY, raw)?;
            if stored != *baseline {
                return Ok(TimerWrite::Superseded(stored));
            }
        }

        let value = encode(TIMER_SESSION_KEY, next)?;
        if self
            .store
            .compare_and_put(TIMER_SESSION_KEY, raw.as_deref(), value)
            .await?
        {
            return Ok(TimerWrite::Written);
        }
        // Lost the race between the read and the write.
        let stored = self.load_timer().await?.unwrap_or_else(|| baseline.clone());
        Ok(TimerWrite::Superseded(stored))
    }

    pub async fn load_playback(&self) -> Result<Option<PlaybackState>, StoreError> {
        self.get_json(PLAYBACK_STATE_KEY).await
    }

    pub async fn save_playback(&self, state: &PlaybackState) -> Result<(), StoreError> {
        self.put_json(PLAYBACK_STATE_KEY, state).await
    }

    /// Returns `false` when another instance already recorded this session.
    pub async fn append_history(&self, entry: &CompletedSession) -> Result<bool, StoreError> {
        let value = encode(TIMER_HISTORY_KEY, entry)?;
        self.store.append(TIMER_HISTORY_KEY, &entry.id, value).await
    }

    pub async fn history(&self) -> Result<Vec<CompletedSession>, StoreError> {
        self.store
            .entries(TIMER_HISTORY_KEY)
            .await?
            .iter()
            .map(|raw| decode(TIMER_HISTORY_KEY, raw))
            .collect()
    }

    pub async fn load_custom_tracks(&self) -> Result<Vec<Track>, StoreError> {
        Ok(self
            .get_json::<Vec<Track>>(CUSTOM_PLAYLISTS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_custom_tracks(&self, tracks: &[Track]) -> Result<(), StoreError> {
        self.put_json(CUSTOM_PLAYLISTS_KEY, &tracks).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = encode(key, value)?;
        self.store.put(key, raw).await.map(|_| ())
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionType, TimerStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn repository_round_trips_timer_and_reports_corrupt_values() {
        let store = MemoryStore::new();
        let repo = Repository::new(Arc::new(store.clone()));

        assert!(repo.load_timer().await.unwrap().is_none());

        let mut session = TimerSession::default();
        session.status = TimerStatus::Paused;
        session.current_session_id = Some("s-1".into());
        repo.save_timer(&session).await.unwrap();
        assert_eq!(repo.load_timer().await.unwrap(), Some(session));

        store
            .put(PLAYBACK_STATE_KEY, "{not json".into())
            .await
            .unwrap();
        let err = repo.load_playback().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == PLAYBACK_STATE_KEY));
    }

    #[tokio::test]
    async fn timer_replacement_refuses_a_changed_baseline() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let mut running = TimerSession::default();
        running.status = TimerStatus::Running;
        running.current_session_id = Some("s-1".into());
        running.time_remaining_seconds = 100;
        repo.save_timer(&running).await.unwrap();

        let mut ticked = running.clone();
        ticked.time_remaining_seconds = 99;
        assert_eq!(
            repo.replace_timer(&running, &ticked).await.unwrap(),
            TimerWrite::Written
        );

        // `running` is no longer what the store holds.
        let mut again = running.clone();
        again.time_remaining_seconds = 98;
        assert_eq!(
            repo.replace_timer(&running, &again).await.unwrap(),
            TimerWrite::Superseded(ticked.clone())
        );
        assert_eq!(repo.load_timer().await.unwrap(), Some(ticked));
    }

    #[tokio::test]
    async fn history_append_is_keyed_by_session_id() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let entry = CompletedSession {
            id: "s-1".into(),
            started_at: now,
            completed_at: now,
            duration_seconds: 1500,
            session_type: SessionType::Work,
            interrupted: false,
            goal_ref: None,
        };

        assert!(repo.append_history(&entry).await.unwrap());
        assert!(!repo.append_history(&entry).await.unwrap());
        assert_eq!(repo.history().await.unwrap(), vec![entry]);
    }
}
