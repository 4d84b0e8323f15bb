//! Group entries: named buckets of tracks inside a categorical stage.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use crate::sort_key::{make_sort_key, PrefixSkipper, SortOrder};
use crate::track::TrackId;

/// Display name of the synthetic entry holding every track of a stage.
pub const MASTER_ENTRY_NAME: &str = "All";
/// Display name of the entry collecting compilation tracks.
pub const COMPILATION_ENTRY_NAME: &str = "Compilations";

/// Stable handle to an entry. Never reused within a stage, even across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

/// Insertion-ordered set of track ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberList {
    order: VecDeque<TrackId>,
    index: HashSet<TrackId>,
}

impl MemberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts at the front. Returns false if already present.
    pub fn prepend(&mut self, id: TrackId) -> bool {
        if !self.index.insert(id) {
            return false;
        }
        self.order.push_front(id);
        true
    }

    /// Inserts at the back. Returns false if already present.
    pub fn append(&mut self, id: TrackId) -> bool {
        if !self.index.insert(id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    pub fn remove(&mut self, id: TrackId) -> bool {
        if !self.index.remove(&id) {
            return false;
        }
        if let Some(position) = self.order.iter().position(|member| *member == id) {
            self.order.remove(position);
        }
        true
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.index.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.order.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<TrackId> {
        self.order.iter().copied().collect()
    }
}

/// A named bucket of tracks sharing one category value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub id: EntryId,
    pub name: String,
    pub sort_key: String,
    /// Present only when prefix stripping changes the name.
    pub fuzzy_sort_key: Option<String>,
    pub is_master: bool,
    pub is_compilation: bool,
    pub members: MemberList,
}

impl GroupEntry {
    pub fn new(id: EntryId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            sort_key: String::new(),
            fuzzy_sort_key: None,
            is_master: false,
            is_compilation: false,
            members: MemberList::new(),
        }
    }

    pub fn master(id: EntryId) -> Self {
        Self {
            is_master: true,
            ..Self::new(id, MASTER_ENTRY_NAME)
        }
    }

    pub fn compilation(id: EntryId) -> Self {
        Self {
            is_compilation: true,
            ..Self::new(id, COMPILATION_ENTRY_NAME)
        }
    }

    /// Synthetic entries cannot be renamed and pin their position.
    pub fn is_special(&self) -> bool {
        self.is_master || self.is_compilation
    }

    /// Recomputes `sort_key` and `fuzzy_sort_key` from the current name.
    pub fn build_sort_keys(&mut self, case_sensitive: bool, skipper: &PrefixSkipper) {
        self.sort_key = make_sort_key(&self.name, case_sensitive);
        let stripped = skipper.skip(&self.name);
        self.fuzzy_sort_key = if stripped.len() != self.name.len() {
            Some(make_sort_key(stripped, case_sensitive))
        } else {
            None
        };
    }

    /// Key used for ordering, honouring the stage's ignore-prefix choice.
    pub fn ordering_key(&self, use_fuzzy: bool) -> &str {
        match (&self.fuzzy_sort_key, use_fuzzy) {
            (Some(fuzzy), true) => fuzzy,
            _ => &self.sort_key,
        }
    }
}

/// Entry comparator: master first, compilation second, the rest by key in `order`.
pub fn compare_entries(a: &GroupEntry, b: &GroupEntry, order: SortOrder, use_fuzzy: bool) -> Ordering {
    if a.is_master != b.is_master {
        return if a.is_master {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    if a.is_compilation != b.is_compilation {
        return if a.is_compilation {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    let by_key = a.ordering_key(use_fuzzy).cmp(b.ordering_key(use_fuzzy));
    match order {
        SortOrder::Descending => by_key.reverse(),
        SortOrder::Ascending | SortOrder::None => by_key,
    }
}
