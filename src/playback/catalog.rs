use std::sync::{Arc, RwLock};

use log::warn;

use crate::{
    error::CatalogError,
    models::{AmbientKind, Track, TrackSource},
};

pub type SharedCatalog = Arc<RwLock<TrackCatalog>>;

pub fn builtin_tracks() -> Vec<Track> {
    vec![
        Track::new(
            "brown-noise",
            "Brown noise",
            TrackSource::Ambient(AmbientKind::BrownNoise),
        ),
        Track::new("rain", "Rain", TrackSource::Ambient(AmbientKind::Rain)),
        Track::new(
            "binaural-focus",
            "Binaural focus (200/204 Hz)",
            TrackSource::Ambient(AmbientKind::Binaural),
        ),
    ]
}

/// Immutable defaults overlaid with user additions, looked up by id.
/// Defaults always come first and can never be removed.
#[derive(Debug, Clone)]
pub struct TrackCatalog {
    defaults: Vec<Track>,
    custom: Vec<Track>,
}

impl Default for TrackCatalog {
    fn default() -> Self {
        Self::new(builtin_tracks())
    }
}

impl TrackCatalog {
    pub fn new(defaults: Vec<Track>) -> Self {
        Self {
            defaults,
            custom: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// Replaces the user tier. Entries shadowing a default or repeating an
    /// earlier id are dropped.
    pub fn replace_custom(&mut self, custom: Vec<Track>) {
        self.custom.clear();
        for track in custom {
            if self.get(&track.id).is_some() {
                warn!("Ignoring custom track '{}': id already in use", track.id);
                continue;
            }
            self.custom.push(track);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .find(|track| track.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn is_default(&self, id: &str) -> bool {
        self.defaults.iter().any(|track| track.id == id)
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .cloned()
            .collect()
    }

    pub fn custom(&self) -> &[Track] {
        &self.custom
    }

    pub fn add_custom(&mut self, track: Track) -> Result<(), CatalogError> {
        if self.contains(&track.id) {
            return Err(CatalogError::Duplicate(track.id));
        }
        self.custom.push(track);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Track, CatalogError> {
        if self.is_default(id) {
            return Err(CatalogError::CannotRemoveDefault(id.to_string()));
        }
        let index = self
            .custom
            .iter()
            .position(|track| track.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(self.custom.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_track(id: &str) -> Track {
        Track::new(id, id, TrackSource::File(format!("/music/{id}.ogg")))
    }

    #[test]
    fn custom_tracks_follow_defaults_in_order() {
        let mut catalog = TrackCatalog::default();
        catalog.replace_custom(vec![file_track("lofi"), file_track("cafe")]);

        let ids: Vec<String> = catalog.tracks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["brown-noise", "rain", "binaural-focus", "lofi", "cafe"]);
        assert!(catalog.get("cafe").is_some());
    }

    #[test]
    fn shadowing_and_duplicate_custom_ids_are_dropped() {
        let mut catalog = TrackCatalog::default();
        catalog.replace_custom(vec![file_track("rain"), file_track("lofi"), file_track("lofi")]);

        assert_eq!(catalog.custom().len(), 1);
        assert_eq!(
            catalog.get("rain").unwrap().source,
            TrackSource::Ambient(AmbientKind::Rain)
        );
    }

    #[test]
    fn defaults_cannot_be_removed() {
        let mut catalog = TrackCatalog::default();
        catalog.add_custom(file_track("lofi")).unwrap();

        assert!(matches!(
            catalog.remove("brown-noise"),
            Err(CatalogError::CannotRemoveDefault(_))
        ));
        assert!(matches!(
            catalog.add_custom(file_track("lofi")),
            Err(CatalogError::Duplicate(_))
        ));
        assert_eq!(catalog.remove("lofi").unwrap().id, "lofi");
        assert!(matches!(
            catalog.remove("lofi"),
            Err(CatalogError::NotFound(_))
        ));
    }
}
