//! Grouping state of a categorical stage: entries, selection and selection memory.
//!
//! This module only mutates the stage's own state. Forwarding to the next
//! stage is decided here but carried out by the pipeline, which owns the chain.

use std::collections::{HashMap, HashSet};

use log::{debug, error};

use crate::category::{canonical_year_name, Category};
use crate::entry::{compare_entries, EntryId, GroupEntry};
use crate::sort_key::{make_sort_key, PrefixSkipper, SortOrder};
use crate::track::{Track, TrackId};

/// Pipeline-wide settings an ingestion call needs.
#[derive(Debug, Clone, Copy)]
pub struct GroupingContext<'a> {
    pub category: Category,
    pub group_compilations: bool,
    pub case_sensitive: bool,
    pub skipper: &'a PrefixSkipper,
    pub sort_order: SortOrder,
    /// Entries are kept sorted on every insert.
    pub sorting_live: bool,
}

/// What the pipeline must do after one `add_track` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Forward the track to the next stage.
    pub forward: bool,
    /// Entry that became selected; a selection request must be queued for it.
    pub selected: Option<EntryId>,
    /// Forward the terminal `(None, final)` signal.
    pub forward_terminal: bool,
}

/// Result of a successful rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    /// Entry now holding the renamed members.
    pub entry: EntryId,
    pub name: String,
    /// Tracks whose field must be rewritten.
    pub members: Vec<TrackId>,
    /// The members joined an entry that already existed.
    pub folded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CategoricalState {
    entries: HashMap<EntryId, GroupEntry>,
    order: Vec<EntryId>,
    by_name: HashMap<String, EntryId>,
    master: Option<EntryId>,
    compilation: Option<EntryId>,
    next_entry_id: u64,
    pub selected: Vec<EntryId>,
    /// Names selected before the last rebuild, master excluded.
    pub last_selection: Vec<String>,
    /// Master was part of the remembered selection.
    pub last_selection_had_master: bool,
    /// The user explicitly cleared the selection.
    pub unselected: bool,
    /// Compare entries by their prefix-stripped key.
    pub use_fuzzy: bool,
    resort_passes: usize,
}

impl CategoricalState {
    pub fn new(use_fuzzy: bool) -> Self {
        Self {
            use_fuzzy,
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId(self.next_entry_id);
        self.next_entry_id += 1;
        id
    }

    /// Drops every entry and the current selection. Selection memory survives.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.by_name.clear();
        self.master = None;
        self.compilation = None;
        self.selected.clear();
    }

    pub fn record_last_selection(&mut self) {
        if self.selected.is_empty() {
            return;
        }
        let mut names = Vec::new();
        let mut had_master = false;
        for id in &self.selected {
            match self.entries.get(id) {
                Some(entry) if entry.is_master => had_master = true,
                Some(entry) => names.push(entry.name.clone()),
                None => {}
            }
        }
        self.last_selection = names;
        self.last_selection_had_master = had_master;
    }

    pub fn forget_last_selection(&mut self) {
        self.last_selection.clear();
        self.last_selection_had_master = false;
    }

    /// Entries in display order.
    pub fn entries(&self) -> impl Iterator<Item = &GroupEntry> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn entry_count(&self) -> usize {
        self.order.len()
    }

    pub fn entry(&self, id: EntryId) -> Option<&GroupEntry> {
        self.entries.get(&id)
    }

    pub fn master(&self) -> Option<&GroupEntry> {
        self.master.and_then(|id| self.entries.get(&id))
    }

    pub fn master_id(&self) -> Option<EntryId> {
        self.master
    }

    pub fn compilation_id(&self) -> Option<EntryId> {
        self.compilation
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&GroupEntry> {
        self.by_name.get(name).and_then(|id| self.entries.get(id))
    }

    pub fn resort_passes(&self) -> usize {
        self.resort_passes
    }

    pub fn is_selected(&self, id: EntryId) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_master_selected(&self) -> bool {
        self.master.is_some_and(|id| self.is_selected(id))
    }

    /// Entry other than master that holds `track`.
    pub fn owning_entry(&self, track: TrackId) -> Option<EntryId> {
        self.order.iter().copied().find(|id| {
            self.entries
                .get(id)
                .is_some_and(|entry| !entry.is_master && entry.members.contains(track))
        })
    }

    pub fn contains_track(&self, track: TrackId) -> bool {
        self.master()
            .is_some_and(|master| master.members.contains(track))
    }

    /// True when `track` is in a selected entry.
    pub fn is_track_selected(&self, track: TrackId) -> bool {
        self.selected.iter().any(|id| {
            self.entries
                .get(id)
                .is_some_and(|entry| entry.members.contains(track))
        })
    }

    /// Members of every selected entry, without duplicates, in selection order.
    pub fn selected_tracks(&self) -> Vec<TrackId> {
        let mut seen = HashSet::new();
        let mut tracks = Vec::new();
        for id in &self.selected {
            if let Some(entry) = self.entries.get(id) {
                for track in entry.members.iter() {
                    if seen.insert(track) {
                        tracks.push(track);
                    }
                }
            }
        }
        tracks
    }

    /// Replaces the selection, dropping ids that no longer exist.
    pub fn set_selection(&mut self, ids: &[EntryId]) {
        self.selected.clear();
        for id in ids {
            if self.entries.contains_key(id) && !self.selected.contains(id) {
                self.selected.push(*id);
            }
        }
    }

    fn insert_entry(&mut self, entry: GroupEntry, ctx: &GroupingContext<'_>) {
        let id = entry.id;
        if !entry.is_special() {
            self.by_name.insert(entry.name.clone(), id);
        }
        let position = if ctx.sorting_live {
            self.sorted_position(&entry, ctx.sort_order)
        } else if entry.is_master {
            0
        } else if entry.is_compilation {
            self.order.len().min(1)
        } else {
            self.order.len()
        };
        self.entries.insert(id, entry);
        self.order.insert(position, id);
    }

    fn sorted_position(&self, entry: &GroupEntry, order: SortOrder) -> usize {
        let use_fuzzy = self.use_fuzzy;
        self.order.partition_point(|existing| {
            self.entries.get(existing).is_some_and(|existing| {
                compare_entries(existing, entry, order, use_fuzzy) != std::cmp::Ordering::Greater
            })
        })
    }

    /// Reorders entries once with the comparator.
    pub fn resort(&mut self, order: SortOrder) {
        if order == SortOrder::None {
            return;
        }
        let use_fuzzy = self.use_fuzzy;
        let entries = &self.entries;
        self.order.sort_by(|a, b| match (entries.get(a), entries.get(b)) {
            (Some(a), Some(b)) => compare_entries(a, b, order, use_fuzzy),
            _ => std::cmp::Ordering::Equal,
        });
        self.resort_passes += 1;
    }

    pub fn rebuild_sort_keys(&mut self, case_sensitive: bool, skipper: &PrefixSkipper) {
        for entry in self.entries.values_mut() {
            entry.build_sort_keys(case_sensitive, skipper);
        }
    }

    /// Ingests one track (or the terminal signal) and updates the selection.
    pub fn add_track(
        &mut self,
        ctx: &GroupingContext<'_>,
        track: Option<(TrackId, &Track)>,
        final_batch: bool,
    ) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        let mut select_entry = None;

        if let Some((track_id, track)) = track {
            let mut first = false;
            let master_id = match self.master {
                Some(id) => id,
                None => {
                    let id = self.allocate_id();
                    let mut master = GroupEntry::master(id);
                    master.build_sort_keys(ctx.case_sensitive, ctx.skipper);
                    self.insert_entry(master, ctx);
                    self.master = Some(id);
                    first = true;
                    id
                }
            };
            if let Some(master) = self.entries.get_mut(&master_id) {
                master.members.prepend(track_id);
            }

            let group_track = ctx.group_compilations
                && track.compilation
                && ctx.category == Category::Artist;
            let name = if group_track {
                String::new()
            } else {
                ctx.category.value_of(track)
            };
            let existing = if group_track {
                self.compilation
            } else {
                self.by_name.get(&name).copied()
            };

            let entry_id = match existing {
                Some(id) => id,
                None => {
                    let id = self.allocate_id();
                    let mut entry = if group_track {
                        GroupEntry::compilation(id)
                    } else {
                        GroupEntry::new(id, &name)
                    };
                    entry.build_sort_keys(ctx.case_sensitive, ctx.skipper);
                    self.insert_entry(entry, ctx);
                    if group_track {
                        self.compilation = Some(id);
                    }
                    id
                }
            };
            if let Some(entry) = self.entries.get_mut(&entry_id) {
                entry.members.prepend(track_id);
            }

            outcome.forward = self.is_master_selected() || self.is_selected(entry_id);

            if self.selected.is_empty() {
                if self.last_selection.is_empty() {
                    if first {
                        select_entry = Some(master_id);
                    }
                } else if self.last_selection_had_master
                    || self
                        .entries
                        .get(&entry_id)
                        .is_some_and(|entry| self.last_selection.contains(&entry.name))
                {
                    select_entry = Some(entry_id);
                }
            }
        }

        if final_batch && self.selected.is_empty() && select_entry.is_none() && !self.unselected {
            select_entry = self.master;
        }

        if let Some(id) = select_entry {
            debug!("Sort tab auto-selecting entry {:?}", id);
            self.selected = vec![id];
            outcome.selected = Some(id);
        } else if track.is_none() && final_batch {
            outcome.forward_terminal = true;
        }
        outcome
    }

    fn destroy_if_empty(&mut self, id: EntryId) {
        let empty = self
            .entries
            .get(&id)
            .is_some_and(|entry| !entry.is_master && entry.members.is_empty());
        if !empty {
            return;
        }
        if let Some(entry) = self.entries.remove(&id) {
            if self.by_name.get(&entry.name) == Some(&id) {
                self.by_name.remove(&entry.name);
            }
            debug!("Sort tab entry '{}' emptied and destroyed", entry.name);
        }
        if self.compilation == Some(id) {
            self.compilation = None;
        }
        self.order.retain(|existing| *existing != id);
        self.selected.retain(|existing| *existing != id);
    }

    /// Removes `track` from master and its owning entry. Returns false without a master.
    pub fn remove_track(&mut self, track: TrackId) -> bool {
        let Some(master_id) = self.master else {
            return false;
        };
        if let Some(master) = self.entries.get_mut(&master_id) {
            master.members.remove(track);
        }
        if let Some(owner) = self.owning_entry(track) {
            if let Some(entry) = self.entries.get_mut(&owner) {
                entry.members.remove(track);
            }
            self.destroy_if_empty(owner);
        }
        true
    }

    /// Handles a removal notice. `None` when the stage never held `track`,
    /// otherwise whether downstream saw it.
    pub fn remove_changed_track(&mut self, track: TrackId) -> Option<bool> {
        if !self.contains_track(track) {
            return None;
        }
        let owner = self.owning_entry(track);
        let was_forwarded =
            self.is_master_selected() || owner.is_some_and(|owner| self.is_selected(owner));
        self.remove_track(track);
        Some(was_forwarded)
    }

    /// Renames a regular entry, folding into an existing entry of the same name.
    pub fn rename(
        &mut self,
        id: EntryId,
        new_name: &str,
        ctx: &GroupingContext<'_>,
    ) -> Option<RenameOutcome> {
        let Some(entry) = self.entries.get(&id) else {
            error!("Sort tab rename: entry {:?} does not exist", id);
            return None;
        };
        if entry.is_special() {
            error!("Sort tab rename: '{}' cannot be renamed", entry.name);
            return None;
        }

        let new_name = if ctx.category == Category::Year {
            canonical_year_name(new_name)
        } else {
            new_name.to_string()
        };
        if make_sort_key(&new_name, ctx.case_sensitive)
            == make_sort_key(&entry.name, ctx.case_sensitive)
        {
            return None;
        }

        let old_name = entry.name.clone();
        let members = entry.members.to_vec();
        if self.by_name.get(&old_name) == Some(&id) {
            self.by_name.remove(&old_name);
        }

        if let Some(target) = self.by_name.get(&new_name).copied() {
            debug!(
                "Sort tab rename '{}' -> '{}' folds into existing entry",
                old_name, new_name
            );
            if let Some(target_entry) = self.entries.get_mut(&target) {
                for track in members.iter().rev() {
                    target_entry.members.prepend(*track);
                }
            }
            if let Some(position) = self.selected.iter().position(|selected| *selected == id) {
                if self.selected.contains(&target) {
                    self.selected.remove(position);
                } else {
                    self.selected[position] = target;
                }
            }
            self.entries.remove(&id);
            self.order.retain(|existing| *existing != id);
            return Some(RenameOutcome {
                entry: target,
                name: new_name,
                members,
                folded: true,
            });
        }

        let entry = self.entries.get_mut(&id)?;
        entry.name = new_name.clone();
        entry.build_sort_keys(ctx.case_sensitive, ctx.skipper);
        self.by_name.insert(new_name.clone(), id);
        if ctx.sorting_live {
            self.order.retain(|existing| *existing != id);
            let position = match self.entries.get(&id) {
                Some(entry) => self.sorted_position(entry, ctx.sort_order),
                None => self.order.len(),
            };
            self.order.insert(position, id);
        }
        Some(RenameOutcome {
            entry: id,
            name: new_name,
            members,
            folded: false,
        })
    }

    /// First entry, in display order, whose name starts with `text` ignoring case.
    pub fn find_by_prefix(&self, text: &str) -> Option<EntryId> {
        self.entries()
            .find(|entry| crate::sort_key::matches_start_case_insensitive(&entry.name, text))
            .map(|entry| entry.id)
    }
}
