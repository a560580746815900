use std::sync::PoisonError;

use log::info;

use crate::{
    error::{CatalogError, PlaybackError, StoreError},
    models::{PlaybackState, Track, MAX_VOLUME},
    notify::Notifier,
    store::Repository,
    sync::SharedState,
};

use super::{SharedCatalog, TrackCatalog};

/// Edits the shared playback intent. Any instance may call these; only the
/// leader turns the result into sound, via the change notification.
#[derive(Clone)]
pub struct PlaybackController {
    state: SharedState,
    repo: Repository,
    catalog: SharedCatalog,
    notifier: Notifier,
}

impl PlaybackController {
    pub fn new(
        state: SharedState,
        repo: Repository,
        catalog: SharedCatalog,
        notifier: Notifier,
    ) -> Self {
        Self {
            state,
            repo,
            catalog,
            notifier,
        }
    }

    pub async fn snapshot(&self) -> PlaybackState {
        self.state.lock().await.playback.clone()
    }

    pub async fn set_playing(&self, playing: bool) -> PlaybackState {
        self.update(|playback| playback.desired_playing = playing)
            .await
    }

    pub async fn toggle(&self) -> PlaybackState {
        self.update(|playback| playback.desired_playing = !playback.desired_playing)
            .await
    }

    /// Values above 100 are clamped.
    pub async fn set_volume(&self, volume: u32) -> PlaybackState {
        let volume = volume.min(u32::from(MAX_VOLUME)) as u8;
        self.update(|playback| playback.volume = volume).await
    }

    pub async fn select_track(&self, track_ref: &str) -> Result<PlaybackState, PlaybackError> {
        if !self.read_catalog(|catalog| catalog.contains(track_ref)) {
            return Err(PlaybackError::UnknownTrack(track_ref.to_string()));
        }
        Ok(self
            .update(|playback| playback.selected_track_ref = track_ref.to_string())
            .await)
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.read_catalog(|catalog| catalog.tracks())
    }

    pub async fn add_custom_track(&self, track: Track) -> Result<(), CatalogError> {
        let custom = {
            let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
            catalog.add_custom(track)?;
            catalog.custom().to_vec()
        };
        self.persist_custom(&custom).await;
        Ok(())
    }

    /// Removing the selected track also clears the selection and stops playback.
    pub async fn remove_track(&self, track_ref: &str) -> Result<Track, CatalogError> {
        let (removed, custom) = {
            let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
            let removed = catalog.remove(track_ref)?;
            (removed, catalog.custom().to_vec())
        };
        self.persist_custom(&custom).await;

        let selected = self.state.lock().await.playback.selected_track_ref == removed.id;
        if selected {
            self.update(|playback| {
                playback.selected_track_ref.clear();
                playback.desired_playing = false;
            })
            .await;
        }
        Ok(removed)
    }

    /// Reloads the user tier of the catalog from the store.
    pub async fn refresh_catalog(&self) -> Result<(), StoreError> {
        let custom = self.repo.load_custom_tracks().await?;
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_custom(custom);
        Ok(())
    }

    async fn update(&self, apply: impl FnOnce(&mut PlaybackState)) -> PlaybackState {
        let mut local = self.state.lock().await;
        apply(&mut local.playback);
        if let Err(err) = self.repo.save_playback(&local.playback).await {
            self.notifier
                .warn(format!("Playback change kept locally, not saved: {err}"));
        }
        local.playback.clone()
    }

    async fn persist_custom(&self, custom: &[Track]) {
        match self.repo.save_custom_tracks(custom).await {
            Ok(()) => info!("Saved {} custom track(s)", custom.len()),
            Err(err) => self
                .notifier
                .warn(format!("Track list change kept locally, not saved: {err}")),
        }
    }

    fn read_catalog<T>(&self, read: impl FnOnce(&TrackCatalog) -> T) -> T {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        read(&*catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{TimerSession, TrackSource},
        store::MemoryStore,
        sync::LocalState,
    };
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn controller(store: &MemoryStore) -> PlaybackController {
        let state: SharedState = Arc::new(Mutex::new(LocalState {
            timer: TimerSession::default(),
            playback: PlaybackState::default(),
        }));
        PlaybackController::new(
            state,
            Repository::new(Arc::new(store.clone())),
            TrackCatalog::default().shared(),
            Notifier::new(),
        )
    }

    #[tokio::test]
    async fn edits_are_written_through() {
        let store = MemoryStore::new();
        let playback = controller(&store);

        playback.set_volume(250).await;
        playback.toggle().await;
        playback.select_track("rain").await.unwrap();

        let saved = Repository::new(Arc::new(store))
            .load_playback()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            saved,
            PlaybackState {
                desired_playing: true,
                volume: 100,
                selected_track_ref: "rain".into(),
            }
        );
    }

    #[tokio::test]
    async fn unknown_tracks_are_rejected() {
        let playback = controller(&MemoryStore::new());
        assert_eq!(
            playback.select_track("missing").await,
            Err(PlaybackError::UnknownTrack("missing".into()))
        );
        assert_eq!(playback.snapshot().await.selected_track_ref, "");
    }

    #[tokio::test]
    async fn custom_tracks_persist_and_removing_the_selection_stops_playback() {
        let store = MemoryStore::new();
        let playback = controller(&store);
        let lofi = Track::new("lofi", "Lo-fi", TrackSource::File("/music/lofi.mp3".into()));

        playback.add_custom_track(lofi.clone()).await.unwrap();
        playback.select_track("lofi").await.unwrap();
        playback.set_playing(true).await;

        let other = controller(&store);
        other.refresh_catalog().await.unwrap();
        assert!(other.tracks().contains(&lofi));

        playback.remove_track("lofi").await.unwrap();
        let state = playback.snapshot().await;
        assert!(!state.desired_playing);
        assert!(state.track_ref().is_none());
        assert!(matches!(
            playback.remove_track("rain").await,
            Err(CatalogError::CannotRemoveDefault(_))
        ));
    }
}
