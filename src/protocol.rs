//! Event-bus protocol between the sort tabs and the rest of the application.
//!
//! Commands flow in as [`SortTabMessage`] and [`ConfigMessage`]; the final
//! filtered track list flows out as [`DisplayMessage`].

use crate::category::Category;
use crate::config::PreferenceChange;
use crate::query::QueryRules;
use crate::track::{Track, TrackId};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    SortTab(SortTabMessage),
    Display(DisplayMessage),
    Config(ConfigMessage),
}

/// Read-only view of one entry, as published to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub name: String,
    pub member_count: usize,
    pub selected: bool,
    pub is_master: bool,
    pub is_compilation: bool,
}

/// Sort-tab commands and notifications.
#[derive(Debug, Clone)]
pub enum SortTabMessage {
    /// A new source collection (playlist) was selected.
    LoadSource(Vec<Track>),
    TrackAdded(Track),
    /// Track fields were edited elsewhere.
    TrackUpdated(Track),
    TrackRemoved(TrackId),
    /// User selection by entry name; an empty list clears the selection.
    SelectEntries {
        stage: usize,
        names: Vec<String>,
    },
    SetCategory {
        stage: usize,
        category: Category,
    },
    Go {
        stage: usize,
    },
    SetQueryRules {
        stage: usize,
        rules: QueryRules,
    },
    SetAutodisplay {
        stage: usize,
        enabled: bool,
    },
    RenameEntry {
        stage: usize,
        old_name: String,
        new_name: String,
    },
    Refresh {
        stage: usize,
    },
    /// `None` asks for the source collection.
    RequestSelectedTracks {
        stage: Option<usize>,
    },
    RequestEntries {
        stage: usize,
    },
    SelectedTracks {
        stage: Option<usize>,
        tracks: Vec<TrackId>,
    },
    Entries {
        stage: usize,
        entries: Vec<EntrySummary>,
    },
}

/// Output of the last stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    Cleared,
    /// Tracks appended since the previous batch, in arrival order.
    TracksAdded {
        tracks: Vec<TrackId>,
        final_batch: bool,
        display: bool,
    },
    TrackRemoved(TrackId),
    TrackChanged {
        track: TrackId,
        removed: bool,
    },
    SortEnablement(bool),
    Status(String),
}

#[derive(Debug, Clone)]
pub enum ConfigMessage {
    PreferenceChanged(PreferenceChange),
}
