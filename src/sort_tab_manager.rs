//! Bus-facing runtime component that owns the sort-tab chain.
//!
//! Selection requests are queued and applied once the bus goes idle, so a
//! burst of selections rebuilds downstream stages only once. Any other
//! command settles the queue first.

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::protocol::{self, Message, SortTabMessage};
use crate::sink::BusDisplaySink;
use crate::track::{Track, TrackId, TrackLibrary};

/// Coordinates the sort-tab pipeline and its track records.
pub struct SortTabManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    pipeline: Pipeline<BusDisplaySink>,
    library: TrackLibrary,
}

impl SortTabManager {
    pub fn new(
        config: Config,
        library: TrackLibrary,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        let sink = BusDisplaySink::new(bus_producer.clone());
        Self {
            bus_consumer,
            bus_producer,
            pipeline: Pipeline::new(config, sink),
            library,
        }
    }

    fn settle(&mut self) {
        if self.pipeline.has_pending_selections() {
            self.pipeline.process_pending_selections(&self.library);
        }
    }

    fn load_source(&mut self, tracks: Vec<Track>) {
        let ids: Vec<TrackId> = tracks.iter().map(|track| track.id).collect();
        for track in tracks {
            self.library.insert(track);
        }
        self.pipeline.load_source(&self.library, ids);
    }

    fn rename_entry(&mut self, stage: usize, old_name: &str, new_name: &str) {
        let entry = self
            .pipeline
            .stage(stage)
            .and_then(|stage| stage.categorical())
            .and_then(|state| state.entry_by_name(old_name))
            .map(|entry| entry.id);
        let Some(entry) = entry else {
            warn!(
                "SortTabManager: no entry named '{}' in stage {}",
                old_name, stage
            );
            return;
        };
        if self
            .pipeline
            .rename_entry(&mut self.library, stage, entry, new_name)
        {
            self.publish_entries(stage);
        }
    }

    fn publish_selected_tracks(&mut self, stage: Option<usize>) {
        let tracks = self.pipeline.selected_tracks(stage);
        let _ = self
            .bus_producer
            .send(Message::SortTab(SortTabMessage::SelectedTracks { stage, tracks }));
    }

    fn publish_entries(&mut self, stage: usize) {
        let entries = self.pipeline.entry_summaries(stage);
        let _ = self
            .bus_producer
            .send(Message::SortTab(SortTabMessage::Entries { stage, entries }));
    }

    fn handle_sort_tab_message(&mut self, message: SortTabMessage) {
        if !matches!(
            message,
            SortTabMessage::SelectEntries { .. }
                | SortTabMessage::SelectedTracks { .. }
                | SortTabMessage::Entries { .. }
        ) {
            self.settle();
        }

        match message {
            SortTabMessage::LoadSource(tracks) => self.load_source(tracks),
            SortTabMessage::TrackAdded(track) => {
                let id = self.library.insert(track);
                self.pipeline.add_track(&self.library, id);
            }
            SortTabMessage::TrackUpdated(track) => {
                let id = self.library.insert(track);
                self.pipeline.track_changed(&self.library, id);
            }
            SortTabMessage::TrackRemoved(id) => {
                self.pipeline.remove_track(id);
                self.library.remove(id);
            }
            SortTabMessage::SelectEntries { stage, names } => {
                self.pipeline.select_entries_by_name(stage, &names);
            }
            SortTabMessage::SetCategory { stage, category } => {
                self.pipeline.set_category(&self.library, stage, category);
            }
            SortTabMessage::Go { stage } => self.pipeline.go(&self.library, stage),
            SortTabMessage::SetQueryRules { stage, rules } => {
                self.pipeline.set_query_rules(&self.library, stage, rules);
            }
            SortTabMessage::SetAutodisplay { stage, enabled } => {
                self.pipeline.set_autodisplay(&self.library, stage, enabled);
            }
            SortTabMessage::RenameEntry {
                stage,
                old_name,
                new_name,
            } => self.rename_entry(stage, &old_name, &new_name),
            SortTabMessage::Refresh { stage } => self.pipeline.refresh(&self.library, stage),
            SortTabMessage::RequestSelectedTracks { stage } => {
                self.publish_selected_tracks(stage);
            }
            SortTabMessage::RequestEntries { stage } => self.publish_entries(stage),
            SortTabMessage::SelectedTracks { .. } | SortTabMessage::Entries { .. } => {}
        }
    }

    /// Starts the blocking event loop for sort-tab commands.
    pub fn run(&mut self) {
        info!(
            "SortTabManager started with {} stages",
            self.pipeline.stage_count()
        );
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    match message {
                        Message::SortTab(message) => self.handle_sort_tab_message(message),
                        Message::Config(protocol::ConfigMessage::PreferenceChanged(change)) => {
                            self.settle();
                            self.pipeline.apply_preference(&self.library, change);
                        }
                        Message::Display(_) => {}
                    }
                    if self.bus_consumer.is_empty() && self.pipeline.has_pending_selections() {
                        debug!("SortTabManager idle, applying queued selections");
                        self.settle();
                    }
                    self.pipeline.sink_mut().flush();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "SortTabManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
