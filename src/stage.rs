//! One link of the sort-tab chain.

use std::collections::HashMap;

use crate::categorical::CategoricalState;
use crate::category::Category;
use crate::entry::EntryId;
use crate::query::{QueryRules, QueryState};

/// Behaviour of the active category.
#[derive(Debug, Clone)]
pub enum StageKind {
    Categorical(CategoricalState),
    Query(QueryState),
}

impl StageKind {
    fn fresh(category: Category, use_fuzzy: bool) -> Self {
        if category.is_query() {
            StageKind::Query(QueryState::new())
        } else {
            StageKind::Categorical(CategoricalState::new(use_fuzzy))
        }
    }
}

/// Arena record of a stage. Links are indices into the pipeline's stage list.
#[derive(Debug, Clone)]
pub struct Stage {
    pub category: Category,
    pub kind: StageKind,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// Nested `set_sort_enablement(false)` calls still outstanding.
    pub sort_suspend_depth: u32,
    /// Upstream signalled the end of the current batch.
    pub all_items_received: bool,
    /// Latest unprocessed user selection. A newer request replaces it.
    pub pending_selection: Option<Vec<EntryId>>,
    pub rules: QueryRules,
    /// States of the categories this stage is not showing, kept so each
    /// category remembers its own selection.
    dormant: HashMap<Category, StageKind>,
}

impl Stage {
    pub fn new(category: Category, rules: QueryRules, use_fuzzy: bool) -> Self {
        Self {
            category,
            kind: StageKind::fresh(category, use_fuzzy),
            prev: None,
            next: None,
            sort_suspend_depth: 0,
            all_items_received: true,
            pending_selection: None,
            rules,
            dormant: HashMap::new(),
        }
    }

    pub fn categorical(&self) -> Option<&CategoricalState> {
        match &self.kind {
            StageKind::Categorical(state) => Some(state),
            StageKind::Query(_) => None,
        }
    }

    pub fn categorical_mut(&mut self) -> Option<&mut CategoricalState> {
        match &mut self.kind {
            StageKind::Categorical(state) => Some(state),
            StageKind::Query(_) => None,
        }
    }

    pub fn query(&self) -> Option<&QueryState> {
        match &self.kind {
            StageKind::Query(state) => Some(state),
            StageKind::Categorical(_) => None,
        }
    }

    pub fn query_mut(&mut self) -> Option<&mut QueryState> {
        match &mut self.kind {
            StageKind::Query(state) => Some(state),
            StageKind::Categorical(_) => None,
        }
    }

    pub fn sort_suspended(&self) -> bool {
        self.sort_suspend_depth > 0
    }

    /// Parks the active state and activates the one for `category`.
    pub fn switch_category(&mut self, category: Category, use_fuzzy: bool) {
        if category == self.category {
            return;
        }
        let incoming = self
            .dormant
            .remove(&category)
            .unwrap_or_else(|| StageKind::fresh(category, use_fuzzy));
        let outgoing = std::mem::replace(&mut self.kind, incoming);
        self.dormant.insert(self.category, outgoing);
        self.category = category;
        if let StageKind::Categorical(state) = &mut self.kind {
            state.use_fuzzy = use_fuzzy;
        }
    }

    /// Applies `apply` to every categorical state, active or dormant.
    pub fn for_each_categorical(&mut self, mut apply: impl FnMut(Category, &mut CategoricalState)) {
        if let StageKind::Categorical(state) = &mut self.kind {
            apply(self.category, state);
        }
        for (category, kind) in self.dormant.iter_mut() {
            if let StageKind::Categorical(state) = kind {
                apply(*category, state);
            }
        }
    }
}
