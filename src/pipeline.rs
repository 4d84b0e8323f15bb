//! The sort-tab chain: stage arena, item protocol and reconfiguration.
//!
//! Every stage speaks the same protocol (`add`, `remove`, `changed`, `build`,
//! sort enablement). A stage's `next` of `None` means the display sink.
//! Selection changes are queued per stage and applied by
//! [`Pipeline::process_pending_selections`], so only the latest request of a
//! burst is rebuilt.

use log::{debug, error, info, warn};

use crate::categorical::{CategoricalState, GroupingContext};
use crate::category::Category;
use crate::config::{Config, PreferenceChange, MAX_STAGES};
use crate::entry::EntryId;
use crate::interval::unix_now;
use crate::protocol::EntrySummary;
use crate::query::QueryRules;
use crate::sink::{DisplaySink, TrackList};
use crate::sort_key::{PrefixSkipper, SortOrder};
use crate::stage::{Stage, StageKind};
use crate::track::{TrackId, TrackLibrary};

fn grouping_context<'a>(
    config: &Config,
    skipper: &'a PrefixSkipper,
    stage: &Stage,
) -> GroupingContext<'a> {
    let sort_order = config.sort_tabs.st_sort;
    GroupingContext {
        category: stage.category,
        group_compilations: config.sort_tabs.group_compilations,
        case_sensitive: config.sort_tabs.st_case_sensitive,
        skipper,
        sort_order,
        sorting_live: !stage.sort_suspended() && sort_order != SortOrder::None,
    }
}

pub struct Pipeline<S: DisplaySink = TrackList> {
    stages: Vec<Stage>,
    sink: S,
    config: Config,
    skipper: PrefixSkipper,
    /// Tracks of the active source collection, in load order.
    source: Vec<TrackId>,
}

impl<S: DisplaySink> Pipeline<S> {
    /// Creates `sort_tab_num` empty stages from `config`.
    pub fn new(config: Config, sink: S) -> Self {
        let skipper = PrefixSkipper::new(&config.sort_tabs.sort_ign_strings);
        let stage_count = config.sort_tabs.sort_tab_num.clamp(1, MAX_STAGES);
        let mut pipeline = Self {
            stages: Vec::new(),
            sink,
            config,
            skipper,
            source: Vec::new(),
        };
        for _ in 0..stage_count {
            pipeline.append_stage();
        }
        pipeline
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &[TrackId] {
        &self.source
    }

    fn first_stage(&self) -> Option<usize> {
        if self.stages.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    fn valid_stage(&self, index: usize, operation: &str) -> bool {
        if index < self.stages.len() {
            return true;
        }
        error!(
            "Sort tab {}: stage index {} out of range ({} stages)",
            operation,
            index,
            self.stages.len()
        );
        false
    }

    fn categorical_stage(&self, index: usize, operation: &str) -> Option<&CategoricalState> {
        if !self.valid_stage(index, operation) {
            return None;
        }
        let state = self.stages[index].categorical();
        if state.is_none() {
            error!(
                "Sort tab {}: stage {} is not a categorical stage",
                operation, index
            );
        }
        state
    }

    fn report_diagnostics(&mut self, messages: Vec<String>) {
        for message in messages {
            self.sink.status_message(&message);
        }
    }

    fn stage_add(
        &mut self,
        library: &TrackLibrary,
        target: Option<usize>,
        track: Option<TrackId>,
        final_batch: bool,
        display: bool,
    ) {
        let Some(index) = target else {
            self.sink.add_track(track, final_batch, display);
            return;
        };
        if !self.valid_stage(index, "add") {
            return;
        }
        let track_ref = match track {
            Some(id) => match library.get(id) {
                Some(record) => Some((id, record)),
                None => {
                    warn!("Sort tab add: track {:?} is not in the library", id);
                    return;
                }
            },
            None => None,
        };

        let ctx = grouping_context(&self.config, &self.skipper, &self.stages[index]);
        let stage = &mut self.stages[index];
        stage.all_items_received = final_batch;
        let next = stage.next;

        match &mut stage.kind {
            StageKind::Categorical(state) => {
                let outcome = state.add_track(&ctx, track_ref, final_batch);
                if let Some(selected) = outcome.selected {
                    stage.pending_selection = Some(vec![selected]);
                }
                if outcome.forward {
                    self.stage_add(library, next, track, final_batch, display);
                }
                if outcome.forward_terminal {
                    self.stage_add(library, next, None, final_batch, display);
                }
            }
            StageKind::Query(state) => {
                let passing = state.passing(&stage.rules);
                let forward = match track_ref {
                    Some((id, record)) => state.add_member(&stage.rules, id, record),
                    None => false,
                };
                let diagnostics = state.take_diagnostics();
                self.report_diagnostics(diagnostics);
                if forward {
                    self.stage_add(library, next, track, final_batch, display);
                }
                if track.is_none() && final_batch && passing {
                    self.stage_add(library, next, None, final_batch, display);
                }
            }
        }
    }

    fn stage_remove(&mut self, target: Option<usize>, track: TrackId) {
        let Some(index) = target else {
            self.sink.remove_track(track);
            return;
        };
        if !self.valid_stage(index, "remove") {
            return;
        }
        let stage = &mut self.stages[index];
        let next = stage.next;
        let forward = match &mut stage.kind {
            StageKind::Categorical(state) => state.remove_track(track),
            StageKind::Query(state) => {
                let was_member = state.members.remove(track);
                state.matched.remove(track);
                was_member
            }
        };
        if forward {
            self.stage_remove(next, track);
        }
    }

    fn stage_changed(
        &mut self,
        library: &TrackLibrary,
        target: Option<usize>,
        track: TrackId,
        removed: bool,
    ) {
        let Some(index) = target else {
            self.sink.track_changed(track, removed);
            return;
        };
        if !self.valid_stage(index, "changed") {
            return;
        }
        let stage = &mut self.stages[index];
        let next = stage.next;

        match &mut stage.kind {
            StageKind::Categorical(state) => {
                if removed {
                    if state.remove_changed_track(track) == Some(true) {
                        self.stage_changed(library, next, track, true);
                    }
                } else if state.contains_track(track) && state.is_track_selected(track) {
                    self.stage_changed(library, next, track, false);
                }
            }
            StageKind::Query(state) => {
                if !state.members.contains(track) {
                    return;
                }
                if removed {
                    state.members.remove(track);
                    if state.matched.remove(track) {
                        self.stage_changed(library, next, track, true);
                    }
                    return;
                }
                let Some(record) = library.get(track) else {
                    warn!("Sort tab changed: track {:?} is not in the library", track);
                    return;
                };
                let rules = &stage.rules;
                if state.matched.contains(track) {
                    let still_matches = state.check_track(rules, record);
                    if !still_matches {
                        state.matched.remove(track);
                    }
                    let diagnostics = state.take_diagnostics();
                    self.report_diagnostics(diagnostics);
                    self.stage_changed(library, next, track, !still_matches);
                } else if state.passing(rules) && state.check_track(rules, record) {
                    state.matched.append(track);
                    let diagnostics = state.take_diagnostics();
                    self.report_diagnostics(diagnostics);
                    self.stage_add(library, next, Some(track), true, true);
                } else {
                    let diagnostics = state.take_diagnostics();
                    self.report_diagnostics(diagnostics);
                }
            }
        }
    }

    /// Clears `target` and everything downstream, optionally switching its category.
    pub fn build(&mut self, target: Option<usize>, new_category: Option<Category>) {
        let Some(index) = target else {
            self.sink.clear();
            return;
        };
        if !self.valid_stage(index, "build") {
            return;
        }
        let use_fuzzy = new_category.map(|category| self.config.ignores_prefix(category));
        let stage = &mut self.stages[index];
        stage.all_items_received = true;
        stage.pending_selection = None;
        reset_active_state(stage);

        if let (Some(category), Some(use_fuzzy)) = (new_category, use_fuzzy) {
            if category != stage.category {
                debug!(
                    "Sort tab {} switching category {} -> {}",
                    index,
                    stage.category.label(),
                    category.label()
                );
                stage.switch_category(category, use_fuzzy);
                reset_active_state(stage);
            }
        }

        let next = stage.next;
        self.build(next, None);
    }

    /// Reentrant resort suspension for `target` and everything downstream.
    pub fn set_sort_enablement(&mut self, target: Option<usize>, enabled: bool) {
        let Some(index) = target else {
            self.sink.set_sort_enablement(enabled);
            return;
        };
        if !self.valid_stage(index, "sort enablement") {
            return;
        }
        let order = self.config.sort_tabs.st_sort;
        let stage = &mut self.stages[index];
        let next = stage.next;

        if !enabled {
            stage.sort_suspend_depth += 1;
            if stage.sort_suspend_depth == 1 {
                self.set_sort_enablement(next, false);
            }
            return;
        }

        if stage.sort_suspend_depth == 0 {
            error!("Sort tab {}: sort enablement resumed more often than suspended", index);
            return;
        }
        stage.sort_suspend_depth -= 1;
        if stage.sort_suspend_depth == 0 {
            if let Some(state) = stage.categorical_mut() {
                state.resort(order);
            }
            self.set_sort_enablement(next, true);
        }
    }

    fn feed(
        &mut self,
        library: &TrackLibrary,
        target: Option<usize>,
        tracks: &[TrackId],
        final_batch: bool,
    ) {
        self.set_sort_enablement(target, false);
        for track in tracks {
            self.stage_add(library, target, Some(*track), false, true);
        }
        self.set_sort_enablement(target, true);
        self.stage_add(library, target, None, true, final_batch);
    }

    /// Replaces the source collection and refills the whole chain.
    pub fn load_source(&mut self, library: &TrackLibrary, tracks: Vec<TrackId>) {
        info!("Sort tabs loading {} source tracks", tracks.len());
        self.source = tracks;
        let first = self.first_stage();
        self.build(first, None);
        let source = self.source.clone();
        self.feed(library, first, &source, true);
    }

    pub fn add_track(&mut self, library: &TrackLibrary, track: TrackId) {
        if !self.source.contains(&track) {
            self.source.push(track);
        }
        let first = self.first_stage();
        self.stage_add(library, first, Some(track), true, true);
    }

    pub fn remove_track(&mut self, track: TrackId) {
        self.source.retain(|existing| *existing != track);
        let first = self.first_stage();
        self.stage_remove(first, track);
    }

    /// Notifies the chain that `track`'s fields were edited.
    pub fn track_changed(&mut self, library: &TrackLibrary, track: TrackId) {
        let first = self.first_stage();
        self.stage_changed(library, first, track, false);
    }

    /// Queues a selection for `stage`, replacing any request still pending.
    pub fn select_entries(&mut self, stage: usize, entries: Vec<EntryId>) {
        if self.categorical_stage(stage, "select").is_none() {
            return;
        }
        self.stages[stage].pending_selection = Some(entries);
    }

    /// Queues a selection by entry name. Unknown names are skipped.
    pub fn select_entries_by_name(&mut self, stage: usize, names: &[String]) {
        let Some(state) = self.categorical_stage(stage, "select") else {
            return;
        };
        let mut ids = Vec::new();
        for name in names {
            match state.entries().find(|entry| entry.name == *name) {
                Some(entry) => ids.push(entry.id),
                None => warn!("Sort tab {}: no entry named '{}'", stage, name),
            }
        }
        if ids.is_empty() && !names.is_empty() {
            return;
        }
        self.select_entries(stage, ids);
    }

    pub fn has_pending_selections(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.pending_selection.is_some())
    }

    /// Applies queued selections, upstream stages first, until none remain.
    pub fn process_pending_selections(&mut self, library: &TrackLibrary) {
        while let Some(index) = self
            .stages
            .iter()
            .position(|stage| stage.pending_selection.is_some())
        {
            if let Some(request) = self.stages[index].pending_selection.take() {
                self.apply_selection(library, index, request);
            }
        }
    }

    fn apply_selection(&mut self, library: &TrackLibrary, index: usize, request: Vec<EntryId>) {
        let stage = &mut self.stages[index];
        let next = stage.next;
        let final_batch = stage.all_items_received;
        let Some(state) = stage.categorical_mut() else {
            return;
        };

        if request.is_empty() {
            if !state.selected.is_empty() {
                state.selected.clear();
                state.forget_last_selection();
                state.unselected = true;
            }
            debug!("Sort tab {} selection cleared", index);
            self.build(next, None);
            return;
        }

        let live: Vec<EntryId> = request
            .into_iter()
            .filter(|id| state.entry(*id).is_some())
            .collect();
        if live.is_empty() {
            debug!("Sort tab {} dropped a selection of vanished entries", index);
            return;
        }

        state.record_last_selection();
        state.set_selection(&live);
        state.unselected = false;
        let tracks = state.selected_tracks();
        debug!(
            "Sort tab {} selected {} entries ({} tracks)",
            index,
            live.len(),
            tracks.len()
        );

        self.build(next, None);
        self.feed(library, next, &tracks, final_batch);
    }

    fn stage_selected_tracks(&self, index: usize) -> Vec<TrackId> {
        match &self.stages[index].kind {
            StageKind::Categorical(state) => state.selected_tracks(),
            StageKind::Query(state) => state.matched.to_vec(),
        }
    }

    /// Tracks a stage passes on; `None` is the source collection.
    pub fn selected_tracks(&self, stage: Option<usize>) -> Vec<TrackId> {
        match stage {
            None => self.source.clone(),
            Some(index) if self.valid_stage(index, "selected tracks") => {
                self.stage_selected_tracks(index)
            }
            Some(_) => Vec::new(),
        }
    }

    pub fn entry_tracks(&self, stage: usize, entry: EntryId) -> Vec<TrackId> {
        self.categorical_stage(stage, "entry tracks")
            .and_then(|state| state.entry(entry))
            .map(|entry| entry.members.to_vec())
            .unwrap_or_default()
    }

    pub fn entry_summaries(&self, stage: usize) -> Vec<EntrySummary> {
        let Some(state) = self.categorical_stage(stage, "entries") else {
            return Vec::new();
        };
        state
            .entries()
            .map(|entry| EntrySummary {
                name: entry.name.clone(),
                member_count: entry.members.len(),
                selected: state.is_selected(entry.id),
                is_master: entry.is_master,
                is_compilation: entry.is_compilation,
            })
            .collect()
    }

    /// Type-ahead lookup in display order.
    pub fn find_entry_by_prefix(&self, stage: usize, text: &str) -> Option<EntryId> {
        self.categorical_stage(stage, "search")?.find_by_prefix(text)
    }

    /// Rebuilds `stage` from its upstream selection, or from the source for the first stage.
    pub fn refresh(&mut self, library: &TrackLibrary, stage: usize) {
        if !self.valid_stage(stage, "refresh") {
            return;
        }
        let category = self.stages[stage].category;
        self.refill(library, stage, category);
    }

    pub fn set_category(&mut self, library: &TrackLibrary, stage: usize, category: Category) {
        if !self.valid_stage(stage, "set category") {
            return;
        }
        self.refill(library, stage, category);
    }

    fn refill(&mut self, library: &TrackLibrary, index: usize, category: Category) {
        let old_category = self.stages[index].category;
        let was_passing = self.stages[index]
            .query()
            .is_some_and(|state| state.pass_on);

        self.build(Some(index), Some(category));
        if category == old_category {
            if let Some(state) = self.stages[index].query_mut() {
                state.pass_on = was_passing;
            }
        }

        let (tracks, final_batch) = match self.stages[index].prev {
            Some(prev) => (
                self.stage_selected_tracks(prev),
                self.stages[prev].all_items_received,
            ),
            None => (self.source.clone(), true),
        };
        if tracks.is_empty() {
            return;
        }
        self.feed(library, Some(index), &tracks, final_batch);
    }

    /// Links a new empty stage at the tail. Returns its index.
    pub fn append_stage(&mut self) -> Option<usize> {
        if self.stages.len() >= MAX_STAGES {
            error!("Sort tab append: already at {} stages", MAX_STAGES);
            return None;
        }
        let index = self.stages.len();
        let stage_config = self.config.stage(index);
        let mut stage = Stage::new(
            stage_config.category,
            stage_config.query_rules(),
            self.config.ignores_prefix(stage_config.category),
        );
        stage.prev = index.checked_sub(1);
        if let Some(prev) = stage.prev {
            self.stages[prev].next = Some(index);
        }
        self.stages.push(stage);
        debug!("Sort tab appended stage {}", index);
        Some(index)
    }

    /// Unlinks the tail stage; the rest of the chain keeps its entries.
    pub fn remove_stage(&mut self) -> bool {
        let Some(removed) = self.stages.pop() else {
            error!("Sort tab remove: no stage left to remove");
            return false;
        };
        if let Some(prev) = removed.prev {
            self.stages[prev].next = None;
        }
        debug!("Sort tab removed stage {}", self.stages.len());
        true
    }

    /// Appends or removes tail stages until `count` (clamped to `1..=MAX_STAGES`) remain.
    pub fn set_stage_count(&mut self, count: usize) {
        let count = count.clamp(1, MAX_STAGES);
        while self.stages.len() < count {
            if self.append_stage().is_none() {
                break;
            }
        }
        while self.stages.len() > count {
            if !self.remove_stage() {
                break;
            }
        }
        self.config.sort_tabs.sort_tab_num = count;
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.config.sort_tabs.st_sort = order;
        self.resort_all();
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.config.sort_tabs.st_case_sensitive = case_sensitive;
        self.rebuild_all_sort_keys();
    }

    pub fn set_ignore_prefixes(&mut self, prefixes: Vec<String>) {
        self.skipper = PrefixSkipper::new(&prefixes);
        self.config.sort_tabs.sort_ign_strings = prefixes;
        self.rebuild_all_sort_keys();
    }

    pub fn set_ignore_fields(&mut self, fields: Vec<Category>) {
        for stage in &mut self.stages {
            stage.for_each_categorical(|category, state| {
                state.use_fuzzy = fields.contains(&category);
            });
        }
        self.config.sort_tabs.sort_ign_fields = fields;
        self.resort_all();
    }

    /// Regroups everything; compilation grouping changes entry membership.
    pub fn set_group_compilations(&mut self, library: &TrackLibrary, enabled: bool) {
        self.config.sort_tabs.group_compilations = enabled;
        let source = self.source.clone();
        self.load_source(library, source);
    }

    fn rebuild_all_sort_keys(&mut self) {
        let case_sensitive = self.config.sort_tabs.st_case_sensitive;
        let skipper = &self.skipper;
        for stage in &mut self.stages {
            stage.for_each_categorical(|_, state| state.rebuild_sort_keys(case_sensitive, skipper));
        }
        self.resort_all();
    }

    fn resort_all(&mut self) {
        let order = self.config.sort_tabs.st_sort;
        for stage in &mut self.stages {
            if stage.sort_suspended() {
                continue;
            }
            if let Some(state) = stage.categorical_mut() {
                state.resort(order);
            }
        }
    }

    /// Applies one preference edit. Structural changes refill the affected tail.
    pub fn apply_preference(&mut self, library: &TrackLibrary, change: PreferenceChange) {
        info!("Sort tabs applying preference change {:?}", change);
        match change {
            PreferenceChange::StageCount(count) => {
                let before = self.stages.len();
                self.set_stage_count(count);
                let after = self.stages.len();
                if after > before {
                    self.refresh(library, before);
                } else if after < before {
                    self.refresh(library, after - 1);
                }
            }
            PreferenceChange::GroupCompilations(enabled) => {
                self.set_group_compilations(library, enabled);
            }
            PreferenceChange::SortOrder(order) => self.set_sort_order(order),
            PreferenceChange::CaseSensitive(case_sensitive) => {
                self.set_case_sensitive(case_sensitive)
            }
            PreferenceChange::IgnoreFields(fields) => self.set_ignore_fields(fields),
            PreferenceChange::IgnorePrefixes(prefixes) => self.set_ignore_prefixes(prefixes),
        }
    }

    /// Renames an entry and writes the new value into every member track.
    /// Tracks are not moved to other entries.
    pub fn rename_entry(
        &mut self,
        library: &mut TrackLibrary,
        stage: usize,
        entry: EntryId,
        new_name: &str,
    ) -> bool {
        if self.categorical_stage(stage, "rename").is_none() {
            return false;
        }
        let ctx = grouping_context(&self.config, &self.skipper, &self.stages[stage]);
        let category = ctx.category;
        let Some(outcome) = self.stages[stage]
            .categorical_mut()
            .and_then(|state| state.rename(entry, new_name, &ctx))
        else {
            return false;
        };

        info!(
            "Sort tab {} renamed entry to '{}' ({} tracks)",
            stage,
            outcome.name,
            outcome.members.len()
        );
        let rebuild = self.stages[stage]
            .categorical()
            .filter(|state| outcome.folded && state.is_selected(outcome.entry))
            .map(|state| state.selected.clone());
        if let Some(selection) = rebuild {
            debug!(
                "Sort tab {} rename grew a selected entry, rebuilding downstream",
                stage
            );
            self.stages[stage].pending_selection = Some(selection);
        }

        let now = unix_now();
        for member in &outcome.members {
            if let Some(track) = library.get_mut(*member) {
                category.set_value(track, &outcome.name);
                track.time_modified = now;
            }
        }
        for member in &outcome.members {
            self.track_changed(library, *member);
        }
        true
    }

    /// Re-evaluates every member of a query stage and starts passing matches on.
    pub fn go(&mut self, library: &TrackLibrary, stage: usize) {
        if !self.valid_stage(stage, "go") {
            return;
        }
        let target = &mut self.stages[stage];
        let next = target.next;
        let final_batch = target.all_items_received;
        let rules = target.rules.clone();
        let Some(state) = target.query_mut() else {
            error!("Sort tab go: stage {} is not a query stage", stage);
            return;
        };
        state.reparse_intervals(&rules);
        state.pass_on = true;
        state.matched.clear();
        let members = state.members.to_vec();
        let diagnostics = state.take_diagnostics();
        self.report_diagnostics(diagnostics);

        self.build(next, None);
        self.set_sort_enablement(Some(stage), false);
        let mut matched = 0usize;
        for member in members {
            let Some(record) = library.get(member) else {
                continue;
            };
            let accepted = match self.stages[stage].query_mut() {
                Some(state) => {
                    let accepted = state.check_track(&rules, record);
                    if accepted {
                        state.matched.append(member);
                    }
                    accepted
                }
                None => false,
            };
            if accepted {
                matched += 1;
                self.stage_add(library, next, Some(member), false, true);
            }
        }
        self.set_sort_enablement(Some(stage), true);
        self.stage_add(library, next, None, true, final_batch);
        debug!("Sort tab {} query matched {} tracks", stage, matched);
    }

    /// Replaces a stage's rules; a stage already passing tracks on is refreshed.
    pub fn set_query_rules(&mut self, library: &TrackLibrary, stage: usize, rules: QueryRules) {
        if !self.valid_stage(stage, "query rules") {
            return;
        }
        let target = &mut self.stages[stage];
        target.rules = rules;
        let passing = target
            .query()
            .is_some_and(|state| state.passing(&target.rules));
        if passing {
            self.refresh(library, stage);
        }
    }

    pub fn set_autodisplay(&mut self, library: &TrackLibrary, stage: usize, enabled: bool) {
        if !self.valid_stage(stage, "autodisplay") {
            return;
        }
        self.stages[stage].rules.autodisplay = enabled;
        if enabled && self.stages[stage].query().is_some() {
            self.go(library, stage);
        }
    }
}

fn reset_active_state(stage: &mut Stage) {
    match &mut stage.kind {
        StageKind::Categorical(state) => {
            state.record_last_selection();
            state.unselected = false;
            state.clear();
        }
        StageKind::Query(state) => {
            state.pass_on = false;
            state.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::Pipeline;
    use crate::category::Category;
    use crate::config::{Config, PreferenceChange, StageConfig};
    use crate::entry::EntryId;
    use crate::query::QueryRules;
    use crate::sink::TrackList;
    use crate::sort_key::SortOrder;
    use crate::track::{Track, TrackId, TrackLibrary};

    fn track(id: u64, artist: &str, album: &str, genre: &str, stars: u32) -> Track {
        let mut track = Track::new(id);
        track.artist = artist.to_string();
        track.album = album.to_string();
        track.genre = genre.to_string();
        track.rating = stars * 20;
        track
    }

    fn library() -> TrackLibrary {
        let mut compilation = track(4, "Various", "Z", "Pop", 1);
        compilation.compilation = true;
        TrackLibrary::from_tracks([
            track(1, "A", "X", "Rock", 5),
            track(2, "A", "Y", "Jazz", 3),
            track(3, "B", "X", "Rock", 5),
            compilation,
        ])
    }

    fn config(stage_count: usize) -> Config {
        let mut config = Config::default();
        config.sort_tabs.sort_tab_num = stage_count;
        config
    }

    fn query_config() -> Config {
        let mut config = config(2);
        config.stages[1] = StageConfig {
            sp_rating_cond: true,
            sp_rating_state: 1 << 5,
            ..StageConfig::for_category(Category::Query)
        };
        config
    }

    fn loaded(config: Config, library: &TrackLibrary) -> Pipeline {
        let mut pipeline = Pipeline::new(config, TrackList::new());
        pipeline.load_source(library, library.ids());
        pipeline.process_pending_selections(library);
        pipeline
    }

    fn names(pipeline: &Pipeline, stage: usize) -> Vec<String> {
        pipeline
            .entry_summaries(stage)
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    fn entry_id(pipeline: &Pipeline, stage: usize, name: &str) -> EntryId {
        pipeline
            .stage(stage)
            .and_then(|stage| stage.categorical())
            .and_then(|state| state.entry_by_name(name))
            .map(|entry| entry.id)
            .expect("entry should exist")
    }

    fn master_id(pipeline: &Pipeline, stage: usize) -> EntryId {
        pipeline
            .stage(stage)
            .and_then(|stage| stage.categorical())
            .and_then(|state| state.master_id())
            .expect("master should exist")
    }

    fn displayed(pipeline: &Pipeline) -> Vec<TrackId> {
        let mut tracks = pipeline.sink().tracks.clone();
        tracks.sort();
        tracks
    }

    fn ids(raw: &[u64]) -> Vec<TrackId> {
        raw.iter().map(|id| TrackId(*id)).collect()
    }

    #[test]
    fn test_load_source_selects_all_and_displays_everything() {
        let library = library();
        let pipeline = loaded(config(2), &library);

        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "A", "B"]);
        assert_eq!(names(&pipeline, 1), vec!["All", "X", "Y", "Z"]);
        assert!(pipeline.entry_summaries(0)[0].selected);
        assert_eq!(displayed(&pipeline), ids(&[1, 2, 3, 4]));
        assert!(!pipeline.sink().pending);
        assert!(!pipeline.has_pending_selections());
    }

    #[test]
    fn test_selecting_entry_filters_downstream() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        let artist_a = entry_id(&pipeline, 0, "A");
        pipeline.select_entries(0, vec![artist_a]);
        pipeline.process_pending_selections(&library);

        assert_eq!(names(&pipeline, 1), vec!["All", "X", "Y"]);
        assert_eq!(displayed(&pipeline), ids(&[1, 2]));
    }

    #[test]
    fn test_last_selection_request_wins() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        let artist_a = entry_id(&pipeline, 0, "A");
        let artist_b = entry_id(&pipeline, 0, "B");
        pipeline.select_entries(0, vec![artist_a]);
        pipeline.select_entries(0, vec![artist_b]);
        assert!(pipeline.has_pending_selections());
        pipeline.process_pending_selections(&library);

        assert_eq!(names(&pipeline, 1), vec!["All", "X"]);
        assert_eq!(displayed(&pipeline), ids(&[3]));
    }

    #[test]
    fn test_downstream_selection_restored_after_upstream_change() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        pipeline.select_entries_by_name(0, &["A".to_string()]);
        pipeline.process_pending_selections(&library);
        pipeline.select_entries_by_name(1, &["X".to_string()]);
        pipeline.process_pending_selections(&library);
        assert_eq!(displayed(&pipeline), ids(&[1]));

        let master = master_id(&pipeline, 0);
        pipeline.select_entries(0, vec![master]);
        pipeline.process_pending_selections(&library);

        let album_x = entry_id(&pipeline, 1, "X");
        let stage = pipeline.stage(1).and_then(|stage| stage.categorical());
        assert_eq!(stage.map(|state| state.selected.clone()), Some(vec![album_x]));
        assert_eq!(displayed(&pipeline), ids(&[1, 3]));
    }

    #[test]
    fn test_clearing_selection_stays_unselected() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        pipeline.select_entries(0, Vec::new());
        pipeline.process_pending_selections(&library);
        assert!(displayed(&pipeline).is_empty());
        assert!(names(&pipeline, 1).is_empty());

        let mut library = library;
        library.insert(track(5, "C", "W", "Rock", 2));
        pipeline.add_track(&library, TrackId(5));
        pipeline.process_pending_selections(&library);

        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "A", "B", "C"]);
        assert!(pipeline.entry_summaries(0).iter().all(|entry| !entry.selected));
        assert!(displayed(&pipeline).is_empty());
    }

    #[test]
    fn test_added_track_flows_to_display_through_selected_entries() {
        let mut library = library();
        let mut pipeline = loaded(config(2), &library);

        library.insert(track(5, "A", "W", "Rock", 2));
        pipeline.add_track(&library, TrackId(5));

        assert!(names(&pipeline, 1).contains(&"W".to_string()));
        assert!(pipeline.sink().contains(TrackId(5)));
        assert!(pipeline.source().contains(&TrackId(5)));
    }

    #[test]
    fn test_removing_last_member_drops_entry_and_display_row() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        pipeline.remove_track(TrackId(3));

        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "A"]);
        assert_eq!(pipeline.entry_summaries(0)[0].member_count, 3);
        assert_eq!(displayed(&pipeline), ids(&[1, 2, 4]));
        assert!(!pipeline.source().contains(&TrackId(3)));
    }

    #[test]
    fn test_master_tracks_conserved_without_compilation_grouping() {
        let library = library();
        let mut config = config(1);
        config.sort_tabs.group_compilations = false;
        let mut pipeline = loaded(config, &library);
        pipeline.remove_track(TrackId(2));

        let state = pipeline
            .stage(0)
            .and_then(|stage| stage.categorical())
            .expect("categorical stage");
        let master: HashSet<TrackId> = state
            .master()
            .map(|master| master.members.iter().collect())
            .unwrap_or_default();
        let union: HashSet<TrackId> = state
            .entries()
            .filter(|entry| !entry.is_master)
            .flat_map(|entry| entry.members.iter())
            .collect();
        assert_eq!(master.len(), 3);
        assert_eq!(master, union);
    }

    #[test]
    fn test_rebuild_with_same_tracks_is_idempotent() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);
        let before = (pipeline.entry_summaries(0), pipeline.entry_summaries(1));

        pipeline.load_source(&library, library.ids());
        pipeline.process_pending_selections(&library);

        assert_eq!(before, (pipeline.entry_summaries(0), pipeline.entry_summaries(1)));
    }

    #[test]
    fn test_sort_enablement_is_reentrant_and_recursive() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        pipeline.set_sort_enablement(Some(0), false);
        pipeline.set_sort_enablement(Some(0), false);
        assert_eq!(pipeline.stage(0).map(|stage| stage.sort_suspend_depth), Some(2));
        assert_eq!(pipeline.stage(1).map(|stage| stage.sort_suspend_depth), Some(1));
        assert!(!pipeline.sink().sort_enabled);

        pipeline.set_sort_enablement(Some(0), true);
        assert!(!pipeline.sink().sort_enabled);
        pipeline.set_sort_enablement(Some(0), true);
        assert_eq!(pipeline.stage(1).map(|stage| stage.sort_suspend_depth), Some(0));
        assert!(pipeline.sink().sort_enabled);

        pipeline.set_sort_enablement(Some(0), true);
        assert_eq!(pipeline.stage(0).map(|stage| stage.sort_suspend_depth), Some(0));
    }

    #[test]
    fn test_bulk_load_resorts_once() {
        let library = library();
        let mut pipeline = Pipeline::new(config(1), TrackList::new());
        pipeline.load_source(&library, library.ids());

        let passes = pipeline
            .stage(0)
            .and_then(|stage| stage.categorical())
            .map(|state| state.resort_passes());
        assert_eq!(passes, Some(1));
    }

    #[test]
    fn test_stage_count_appends_and_unlinks_tail() {
        let mut pipeline = Pipeline::new(config(2), TrackList::new());

        pipeline.set_stage_count(4);
        assert_eq!(pipeline.stage_count(), 4);
        assert_eq!(pipeline.stage(2).and_then(|stage| stage.next), Some(3));
        assert_eq!(pipeline.stage(3).and_then(|stage| stage.prev), Some(2));
        assert_eq!(pipeline.stage(3).map(|stage| stage.category), Some(Category::Composer));

        pipeline.set_stage_count(1);
        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(pipeline.stage(0).and_then(|stage| stage.next), None);

        pipeline.set_stage_count(0);
        assert_eq!(pipeline.stage_count(), 1);
        pipeline.set_stage_count(99);
        assert_eq!(pipeline.stage_count(), 6);
        assert_eq!(pipeline.append_stage(), None);
    }

    #[test]
    fn test_stage_count_preference_refills_new_tail() {
        let library = library();
        let mut pipeline = loaded(config(1), &library);
        pipeline.select_entries_by_name(0, &["A".to_string()]);
        pipeline.process_pending_selections(&library);

        pipeline.apply_preference(&library, PreferenceChange::StageCount(2));
        pipeline.process_pending_selections(&library);

        assert_eq!(names(&pipeline, 1), vec!["All", "X", "Y"]);
        assert_eq!(displayed(&pipeline), ids(&[1, 2]));

        pipeline.apply_preference(&library, PreferenceChange::StageCount(1));
        pipeline.process_pending_selections(&library);
        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(displayed(&pipeline), ids(&[1, 2]));
    }

    #[test]
    fn test_set_category_regroups_stage() {
        let library = library();
        let mut pipeline = loaded(config(2), &library);

        pipeline.set_category(&library, 1, Category::Genre);
        pipeline.process_pending_selections(&library);

        assert_eq!(pipeline.stage(1).map(|stage| stage.category), Some(Category::Genre));
        assert_eq!(names(&pipeline, 1), vec!["All", "Jazz", "Pop", "Rock"]);
        assert_eq!(displayed(&pipeline), ids(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_group_compilations_toggle_reloads_source() {
        let library = library();
        let mut pipeline = loaded(config(1), &library);

        pipeline.apply_preference(&library, PreferenceChange::GroupCompilations(false));
        pipeline.process_pending_selections(&library);

        assert_eq!(names(&pipeline, 0), vec!["All", "A", "B", "Various"]);
    }

    #[test]
    fn test_descending_order_keeps_master_and_compilation_first() {
        let library = library();
        let mut pipeline = loaded(config(1), &library);

        pipeline.apply_preference(&library, PreferenceChange::SortOrder(SortOrder::Descending));
        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "B", "A"]);
    }

    #[test]
    fn test_case_sensitivity_regenerates_sort_keys() {
        let library = TrackLibrary::from_tracks([
            track(1, "abba", "", "", 0),
            track(2, "Beta", "", "", 0),
        ]);
        let mut pipeline = loaded(config(1), &library);
        assert_eq!(names(&pipeline, 0), vec!["All", "abba", "Beta"]);

        pipeline.apply_preference(&library, PreferenceChange::CaseSensitive(true));
        assert_eq!(names(&pipeline, 0), vec!["All", "Beta", "abba"]);
    }

    #[test]
    fn test_ignore_prefix_preferences_resort_entries() {
        let library = TrackLibrary::from_tracks([
            track(1, "The Cure", "", "", 0),
            track(2, "Blondie", "", "", 0),
            track(3, "Die Antwoord", "", "", 0),
        ]);
        let mut pipeline = loaded(config(1), &library);
        assert_eq!(names(&pipeline, 0), vec!["All", "Blondie", "The Cure", "Die Antwoord"]);

        pipeline.apply_preference(
            &library,
            PreferenceChange::IgnorePrefixes(vec!["die ".to_string()]),
        );
        assert_eq!(names(&pipeline, 0), vec!["All", "Die Antwoord", "Blondie", "The Cure"]);

        pipeline.apply_preference(&library, PreferenceChange::IgnoreFields(Vec::new()));
        assert_eq!(names(&pipeline, 0), vec!["All", "Blondie", "Die Antwoord", "The Cure"]);
    }

    #[test]
    fn test_rename_updates_tracks_and_folds_duplicates() {
        let mut library = library();
        let mut pipeline = loaded(config(1), &library);
        let artist_b = entry_id(&pipeline, 0, "B");
        pipeline.select_entries(0, vec![artist_b]);
        pipeline.process_pending_selections(&library);

        assert!(pipeline.rename_entry(&mut library, 0, artist_b, "C"));
        let renamed = library.get(TrackId(3)).expect("track should exist");
        assert_eq!(renamed.artist, "C");
        assert!(renamed.time_modified > 0);
        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "A", "C"]);
        assert_eq!(pipeline.sink().updated, vec![TrackId(3)]);

        assert!(pipeline.rename_entry(&mut library, 0, artist_b, "A"));
        assert_eq!(names(&pipeline, 0), vec!["All", "Compilations", "A"]);
        let artist_a = entry_id(&pipeline, 0, "A");
        assert_eq!(pipeline.entry_tracks(0, artist_a).len(), 3);
        assert!(pipeline.entry_summaries(0)[2].selected);
    }

    #[test]
    fn test_rename_fold_into_selected_entry_rebuilds_downstream() {
        let mut library = library();
        let mut pipeline = loaded(config(2), &library);
        pipeline.select_entries_by_name(0, &["B".to_string()]);
        pipeline.process_pending_selections(&library);
        assert_eq!(displayed(&pipeline), ids(&[3]));

        let artist_b = entry_id(&pipeline, 0, "B");
        assert!(pipeline.rename_entry(&mut library, 0, artist_b, "A"));
        assert!(pipeline.has_pending_selections());
        pipeline.process_pending_selections(&library);

        let mut selected = pipeline.selected_tracks(Some(0));
        selected.sort();
        assert_eq!(selected, ids(&[1, 2, 3]));
        assert_eq!(displayed(&pipeline), selected);
        assert_eq!(names(&pipeline, 1), vec!["All", "X", "Y"]);
    }

    #[test]
    fn test_rename_rejects_master() {
        let mut library = library();
        let mut pipeline = loaded(config(1), &library);
        let master = master_id(&pipeline, 0);

        assert!(!pipeline.rename_entry(&mut library, 0, master, "Everything"));
        assert_eq!(names(&pipeline, 0)[0], "All");
    }

    #[test]
    fn test_edited_track_is_not_moved_between_entries() {
        let mut library = library();
        let mut pipeline = loaded(config(1), &library);
        let artist_a = entry_id(&pipeline, 0, "A");

        if let Some(edited) = library.get_mut(TrackId(1)) {
            edited.artist = "B".to_string();
        }
        pipeline.track_changed(&library, TrackId(1));

        assert!(pipeline.entry_tracks(0, artist_a).contains(&TrackId(1)));
        assert_eq!(pipeline.sink().updated, vec![TrackId(1)]);
    }

    #[test]
    fn test_type_ahead_and_collaborator_queries() {
        let library = library();
        let pipeline = loaded(config(1), &library);

        let found = pipeline.find_entry_by_prefix(0, "b");
        assert_eq!(found, Some(entry_id(&pipeline, 0, "B")));
        assert_eq!(pipeline.selected_tracks(None), library.ids());
        let mut selected = pipeline.selected_tracks(Some(0));
        selected.sort();
        assert_eq!(selected, ids(&[1, 2, 3, 4]));
        assert!(pipeline.selected_tracks(Some(7)).is_empty());
    }

    #[test]
    fn test_invalid_stage_operations_are_ignored() {
        let library = library();
        let mut pipeline = loaded(config(1), &library);

        pipeline.select_entries(5, vec![EntryId(0)]);
        pipeline.refresh(&library, 5);
        pipeline.go(&library, 0);
        pipeline.set_category(&library, 3, Category::Genre);
        pipeline.process_pending_selections(&library);

        assert_eq!(displayed(&pipeline), ids(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_query_stage_waits_for_go() {
        let library = library();
        let mut pipeline = loaded(query_config(), &library);
        assert!(pipeline.stage(1).and_then(|stage| stage.query()).is_some());
        assert!(displayed(&pipeline).is_empty());

        pipeline.go(&library, 1);
        assert_eq!(displayed(&pipeline), ids(&[1, 3]));
        assert!(!pipeline.sink().pending);
        assert_eq!(pipeline.selected_tracks(Some(1)).len(), 2);
    }

    #[test]
    fn test_query_stage_rechecks_changed_tracks() {
        let mut library = library();
        let mut pipeline = loaded(query_config(), &library);
        pipeline.go(&library, 1);

        if let Some(edited) = library.get_mut(TrackId(1)) {
            edited.rating = 20;
        }
        pipeline.track_changed(&library, TrackId(1));
        assert_eq!(displayed(&pipeline), ids(&[3]));

        if let Some(edited) = library.get_mut(TrackId(1)) {
            edited.rating = 100;
        }
        pipeline.track_changed(&library, TrackId(1));
        assert_eq!(displayed(&pipeline), ids(&[1, 3]));
    }

    #[test]
    fn test_query_rules_change_refreshes_passing_stage() {
        let library = library();
        let mut pipeline = loaded(query_config(), &library);
        pipeline.go(&library, 1);

        let mut rules = QueryRules {
            rating_enabled: true,
            ..QueryRules::default()
        };
        rules.set_rating_star(1, true);
        pipeline.set_query_rules(&library, 1, rules);

        assert_eq!(displayed(&pipeline), ids(&[4]));
        assert!(pipeline.stage(1).and_then(|stage| stage.query()).is_some_and(|state| state.pass_on));
    }

    #[test]
    fn test_query_autodisplay_passes_new_tracks() {
        let mut library = library();
        let mut pipeline = loaded(query_config(), &library);

        pipeline.set_autodisplay(&library, 1, true);
        assert_eq!(displayed(&pipeline), ids(&[1, 3]));

        library.insert(track(5, "C", "W", "Rock", 5));
        pipeline.add_track(&library, TrackId(5));
        assert_eq!(displayed(&pipeline), ids(&[1, 3, 5]));

        pipeline.remove_track(TrackId(1));
        assert_eq!(displayed(&pipeline), ids(&[3, 5]));
        let matched = pipeline.selected_tracks(Some(1));
        assert!(!matched.contains(&TrackId(1)));
    }

    #[test]
    fn test_query_interval_error_reaches_status_messages() {
        let library = library();
        let mut config = query_config();
        config.stages[1].sp_played_cond = true;
        config.stages[1].sp_played_state = "whenever".to_string();
        let mut pipeline = loaded(config, &library);

        pipeline.go(&library, 1);
        assert_eq!(displayed(&pipeline), ids(&[1, 3]));
        assert_eq!(pipeline.sink().messages.len(), 1);
        assert!(pipeline.sink().messages[0].starts_with("'Played' condition ignored"));
    }
}
