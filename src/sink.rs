//! Receivers of the fully filtered track list.

use tokio::sync::broadcast::Sender;

use crate::protocol::{DisplayMessage, Message};
use crate::track::TrackId;

/// Downstream end of the chain. Receives the same protocol as a stage.
pub trait DisplaySink {
    fn clear(&mut self);
    /// `None` carries only the batch flags.
    fn add_track(&mut self, track: Option<TrackId>, final_batch: bool, display: bool);
    fn remove_track(&mut self, track: TrackId);
    fn track_changed(&mut self, track: TrackId, removed: bool);
    fn set_sort_enablement(&mut self, _enabled: bool) {}
    fn status_message(&mut self, _message: &str) {}
}

/// In-memory displayed track list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackList {
    pub tracks: Vec<TrackId>,
    /// More tracks are still expected for the current batch.
    pub pending: bool,
    pub sort_enabled: bool,
    pub messages: Vec<String>,
    /// Tracks reported as edited while displayed.
    pub updated: Vec<TrackId>,
}

impl TrackList {
    pub fn new() -> Self {
        Self {
            sort_enabled: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, track: TrackId) -> bool {
        self.tracks.contains(&track)
    }
}

impl DisplaySink for TrackList {
    fn clear(&mut self) {
        self.tracks.clear();
        self.updated.clear();
        self.pending = false;
    }

    fn add_track(&mut self, track: Option<TrackId>, final_batch: bool, _display: bool) {
        if let Some(track) = track {
            if !self.tracks.contains(&track) {
                self.tracks.push(track);
            }
        }
        self.pending = !final_batch;
    }

    fn remove_track(&mut self, track: TrackId) {
        self.tracks.retain(|existing| *existing != track);
    }

    fn track_changed(&mut self, track: TrackId, removed: bool) {
        if removed {
            self.remove_track(track);
        } else if self.tracks.contains(&track) {
            self.updated.push(track);
        }
    }

    fn set_sort_enablement(&mut self, enabled: bool) {
        self.sort_enabled = enabled;
    }

    fn status_message(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

/// Publishes display updates on the event bus.
///
/// Additions are buffered and published as one `TracksAdded` message when a
/// batch completes, so bulk loads cost a handful of bus slots.
#[derive(Debug, Clone)]
pub struct BusDisplaySink {
    bus_producer: Sender<Message>,
    buffered: Vec<TrackId>,
    final_batch: bool,
    display: bool,
}

impl BusDisplaySink {
    pub fn new(bus_producer: Sender<Message>) -> Self {
        Self {
            bus_producer,
            buffered: Vec::new(),
            final_batch: true,
            display: true,
        }
    }

    fn publish(&self, message: DisplayMessage) {
        let _ = self.bus_producer.send(Message::Display(message));
    }

    /// Publishes buffered additions, if any.
    pub fn flush(&mut self) {
        if self.buffered.is_empty() {
            return;
        }
        let tracks = std::mem::take(&mut self.buffered);
        self.publish(DisplayMessage::TracksAdded {
            tracks,
            final_batch: self.final_batch,
            display: self.display,
        });
    }
}

impl DisplaySink for BusDisplaySink {
    fn clear(&mut self) {
        self.buffered.clear();
        self.publish(DisplayMessage::Cleared);
    }

    fn add_track(&mut self, track: Option<TrackId>, final_batch: bool, display: bool) {
        self.final_batch = final_batch;
        self.display = display;
        if let Some(track) = track {
            self.buffered.push(track);
        }
        if !final_batch {
            return;
        }
        if self.buffered.is_empty() {
            self.publish(DisplayMessage::TracksAdded {
                tracks: Vec::new(),
                final_batch,
                display,
            });
        } else {
            self.flush();
        }
    }

    fn remove_track(&mut self, track: TrackId) {
        self.flush();
        self.publish(DisplayMessage::TrackRemoved(track));
    }

    fn track_changed(&mut self, track: TrackId, removed: bool) {
        self.flush();
        self.publish(DisplayMessage::TrackChanged { track, removed });
    }

    fn set_sort_enablement(&mut self, enabled: bool) {
        self.publish(DisplayMessage::SortEnablement(enabled));
    }

    fn status_message(&mut self, message: &str) {
        self.flush();
        self.publish(DisplayMessage::Status(message.to_string()));
    }
}
