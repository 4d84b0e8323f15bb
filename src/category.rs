//! Grouping categories a sort tab can be switched between.

use crate::track::Track;

/// Key a stage groups on. `Query` turns the stage into a rule-evaluating stage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Artist,
    Album,
    Genre,
    Composer,
    Title,
    Year,
    Query,
}

/// Categories that group tracks into entries, in default stage order.
pub const GROUPING_CATEGORIES: [Category; 6] = [
    Category::Artist,
    Category::Album,
    Category::Genre,
    Category::Composer,
    Category::Title,
    Category::Year,
];

impl Category {
    pub fn is_query(self) -> bool {
        self == Category::Query
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Artist => "Artist",
            Category::Album => "Album",
            Category::Genre => "Genre",
            Category::Composer => "Composer",
            Category::Title => "Title",
            Category::Year => "Year",
            Category::Query => "Query",
        }
    }

    /// Grouping value of `track` for this category. `Query` has none.
    pub fn value_of(self, track: &Track) -> String {
        match self {
            Category::Artist => track.artist.clone(),
            Category::Album => track.album.clone(),
            Category::Genre => track.genre.clone(),
            Category::Composer => track.composer.clone(),
            Category::Title => track.title.clone(),
            Category::Year => track.year.to_string(),
            Category::Query => String::new(),
        }
    }

    /// Writes `text` into the field this category reads. Returns false for `Query`.
    pub fn set_value(self, track: &mut Track, text: &str) -> bool {
        match self {
            Category::Artist => track.artist = text.to_string(),
            Category::Album => track.album = text.to_string(),
            Category::Genre => track.genre = text.to_string(),
            Category::Composer => track.composer = text.to_string(),
            Category::Title => track.title = text.to_string(),
            Category::Year => track.year = parse_leading_int(text).max(0),
            Category::Query => return false,
        }
        true
    }
}

/// Leading-integer parse that stops at the first non-digit and yields 0 on garbage.
pub fn parse_leading_int(text: &str) -> i32 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        value = (value * 10 + i64::from(byte - b'0')).min(i64::from(i32::MAX) + 1);
    }
    if negative {
        value = -value;
    }
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Canonical display name of a year entry.
pub fn canonical_year_name(text: &str) -> String {
    parse_leading_int(text).to_string()
}
