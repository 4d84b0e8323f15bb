//! Rule-evaluating stage state: rating, playcount and time-interval conditions.

use log::warn;

use crate::entry::MemberList;
use crate::interval::{parse_interval, IntervalParseError, TimeInterval};
use crate::track::{Track, TrackId, RATING_MAX, RATING_STEP};

/// How enabled conditions are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    #[default]
    And,
    Or,
}

/// Track timestamp a time condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Played,
    Modified,
    Added,
}

pub const TIME_FIELDS: [TimeField; 3] = [TimeField::Played, TimeField::Modified, TimeField::Added];

impl TimeField {
    pub fn label(self) -> &'static str {
        match self {
            TimeField::Played => "Played",
            TimeField::Modified => "Modified",
            TimeField::Added => "Added",
        }
    }

    pub fn stamp(self, track: &Track) -> i64 {
        match self {
            TimeField::Played => track.time_played,
            TimeField::Modified => track.time_modified,
            TimeField::Added => track.time_added,
        }
    }

    fn slot(self) -> usize {
        match self {
            TimeField::Played => 0,
            TimeField::Modified => 1,
            TimeField::Added => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeCondition {
    pub enabled: bool,
    pub interval: String,
}

/// Per-stage query settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRules {
    pub combine: Combine,
    /// Evaluate and forward every arriving track without waiting for `go`.
    pub autodisplay: bool,
    pub rating_enabled: bool,
    /// Bit `n` accepts tracks rated `n` stars.
    pub rating_mask: u32,
    pub playcount_enabled: bool,
    pub playcount_low: u32,
    /// `-1` means no upper bound.
    pub playcount_high: i64,
    pub played: TimeCondition,
    pub modified: TimeCondition,
    pub added: TimeCondition,
}

impl Default for QueryRules {
    fn default() -> Self {
        Self {
            combine: Combine::And,
            autodisplay: false,
            rating_enabled: false,
            rating_mask: 0,
            playcount_enabled: false,
            playcount_low: 0,
            playcount_high: -1,
            played: TimeCondition::default(),
            modified: TimeCondition::default(),
            added: TimeCondition::default(),
        }
    }
}

impl QueryRules {
    pub fn time_condition(&self, field: TimeField) -> &TimeCondition {
        match field {
            TimeField::Played => &self.played,
            TimeField::Modified => &self.modified,
            TimeField::Added => &self.added,
        }
    }

    pub fn time_condition_mut(&mut self, field: TimeField) -> &mut TimeCondition {
        match field {
            TimeField::Played => &mut self.played,
            TimeField::Modified => &mut self.modified,
            TimeField::Added => &mut self.added,
        }
    }

    /// Upper playcount bound with `-1` widened to `u32::MAX`.
    pub fn playcount_upper(&self) -> u32 {
        if self.playcount_high < 0 {
            u32::MAX
        } else {
            u32::try_from(self.playcount_high).unwrap_or(u32::MAX)
        }
    }

    pub fn set_rating_star(&mut self, stars: u32, accepted: bool) {
        if stars > RATING_MAX {
            return;
        }
        if accepted {
            self.rating_mask |= 1 << stars;
        } else {
            self.rating_mask &= !(1 << stars);
        }
    }

    fn accepts_rating(&self, rating: u32) -> bool {
        let stars = rating / RATING_STEP;
        stars <= RATING_MAX && self.rating_mask & (1 << stars) != 0
    }
}

#[derive(Debug, Clone, Default)]
struct CachedInterval {
    text: String,
    parsed: Option<Result<TimeInterval, IntervalParseError>>,
}

/// Members seen by a query stage and the subset currently forwarded.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub members: MemberList,
    pub matched: MemberList,
    /// Set by `go`; cleared by a rebuild.
    pub pass_on: bool,
    intervals: [CachedInterval; 3],
    diagnostics: Vec<String>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.matched.clear();
    }

    pub fn passing(&self, rules: &QueryRules) -> bool {
        self.pass_on || rules.autodisplay
    }

    /// Parses every enabled interval string again, even when unchanged.
    pub fn reparse_intervals(&mut self, rules: &QueryRules) {
        for field in TIME_FIELDS {
            self.intervals[field.slot()].parsed = None;
            if rules.time_condition(field).enabled {
                let _ = self.interval(field, rules);
            }
        }
    }

    /// Parse errors raised since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }

    fn interval(
        &mut self,
        field: TimeField,
        rules: &QueryRules,
    ) -> Result<TimeInterval, IntervalParseError> {
        let text = &rules.time_condition(field).interval;
        let cached = &mut self.intervals[field.slot()];
        if cached.text != *text {
            cached.text = text.clone();
            cached.parsed = None;
        }
        if let Some(parsed) = &cached.parsed {
            return parsed.clone();
        }

        let parsed = parse_interval(text);
        if let Err(error) = &parsed {
            let message = format!("'{}' condition ignored because of error: {}", field.label(), error);
            warn!("{}", message);
            self.diagnostics.push(message);
        }
        cached.parsed = Some(parsed.clone());
        parsed
    }

    /// Evaluates `rules` against `track`. Fails closed when no condition could be evaluated.
    pub fn check_track(&mut self, rules: &QueryRules, track: &Track) -> bool {
        let or = rules.combine == Combine::Or;
        let mut checked = false;

        if rules.rating_enabled {
            checked = true;
            let cond = rules.accepts_rating(track.rating);
            if or && cond {
                return true;
            }
            if !or && !cond {
                return false;
            }
        }

        if rules.playcount_enabled {
            checked = true;
            let cond =
                rules.playcount_low <= track.playcount && track.playcount <= rules.playcount_upper();
            if or && cond {
                return true;
            }
            if !or && !cond {
                return false;
            }
        }

        for field in TIME_FIELDS {
            if !rules.time_condition(field).enabled {
                continue;
            }
            let Ok(interval) = self.interval(field, rules) else {
                continue;
            };
            checked = true;
            let cond = interval.contains(field.stamp(track));
            if or && cond {
                return true;
            }
            if !or && !cond {
                return false;
            }
        }

        checked && !or
    }

    /// Records a new member; returns true when it should be forwarded.
    pub fn add_member(&mut self, rules: &QueryRules, id: TrackId, track: &Track) -> bool {
        self.members.append(id);
        if self.passing(rules) && self.check_track(rules, track) {
            self.matched.append(id);
            return true;
        }
        false
    }
}
