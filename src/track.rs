//! Track records consumed by the sort tabs.
//!
//! Tracks are owned by a [`TrackLibrary`]; stages only ever hold [`TrackId`]
//! handles and borrow the library when they need field values.

use std::collections::HashMap;

/// Rating units per star, as stored on the device.
pub const RATING_STEP: u32 = 20;
/// Highest star count a track can carry.
pub const RATING_MAX: u32 = 5;

/// Opaque track handle. Equality is identity.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct TrackId(pub u64);

/// Flat track record with the fields the sort tabs group and filter on.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub compilation: bool,
    /// Rating in device units, `0..=100` in steps of [`RATING_STEP`].
    #[serde(default)]
    pub rating: u32,
    #[serde(default)]
    pub playcount: u32,
    /// Unix seconds, `0` means never.
    #[serde(default)]
    pub time_added: i64,
    #[serde(default)]
    pub time_modified: i64,
    #[serde(default)]
    pub time_played: i64,
}

impl Track {
    pub fn new(id: u64) -> Self {
        Self {
            id: TrackId(id),
            ..Self::default()
        }
    }

    /// Star count derived from the device rating.
    pub fn stars(&self) -> u32 {
        (self.rating / RATING_STEP).min(RATING_MAX)
    }
}

/// In-memory owner of every track known to the application.
#[derive(Debug, Default, Clone)]
pub struct TrackLibrary {
    tracks: HashMap<TrackId, Track>,
}

impl TrackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut library = Self::new();
        for track in tracks {
            library.insert(track);
        }
        library
    }

    /// Inserts or replaces a track, returning its id.
    pub fn insert(&mut self, track: Track) -> TrackId {
        let id = track.id;
        self.tracks.insert(id, track);
        id
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.remove(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Ids sorted ascending, giving a stable load order.
    pub fn ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        ids.sort();
        ids
    }
}
