//! Sort-key generation and prefix helpers shared by every categorical stage.

/// Direction sort tabs order their entries in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
    /// Insertion order, no resorting.
    None,
}

/// Default prefixes ignored by fuzzy sorting.
pub fn default_ignore_prefixes() -> Vec<String> {
    vec!["the ".to_string(), "a ".to_string(), "an ".to_string()]
}

/// Collation key for `name`. Case-insensitive keys are casefolded.
pub fn make_sort_key(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

/// Returns the rest of `text` after `prefix` when `text` starts with it, ignoring case.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut text_chars = text.char_indices();
    for prefix_char in prefix.chars() {
        let (_, text_char) = text_chars.next()?;
        if !text_char.to_lowercase().eq(prefix_char.to_lowercase()) {
            return None;
        }
    }
    match text_chars.next() {
        Some((offset, _)) => Some(&text[offset..]),
        None => Some(""),
    }
}

/// Type-ahead predicate: does `haystack` start with `needle`, ignoring case.
pub fn matches_start_case_insensitive(haystack: &str, needle: &str) -> bool {
    strip_prefix_ignore_case(haystack, needle).is_some()
}

/// Strips the first matching ignore-prefix ("the ", "a ", ...) from entry names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSkipper {
    prefixes: Vec<String>,
}

impl Default for PrefixSkipper {
    fn default() -> Self {
        Self::new(&default_ignore_prefixes())
    }
}

impl PrefixSkipper {
    pub fn new(prefixes: &[String]) -> Self {
        Self {
            prefixes: prefixes
                .iter()
                .filter(|prefix| !prefix.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Slice of `name` after the first matching prefix, or `name` itself.
    pub fn skip<'a>(&self, name: &'a str) -> &'a str {
        self.prefixes
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(name, prefix))
            .unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{make_sort_key, matches_start_case_insensitive, PrefixSkipper};

    #[test]
    fn test_sort_key_casefolds_only_when_case_insensitive() {
        assert_eq!(make_sort_key("The Beatles", false), "the beatles");
        assert_eq!(make_sort_key("The Beatles", true), "The Beatles");
        assert_eq!(make_sort_key("ÄRZTE", false), "ärzte");
    }

    #[test]
    fn test_prefix_skipper_strips_first_matching_prefix() {
        let skipper = PrefixSkipper::default();
        assert_eq!(skipper.skip("The Beatles"), "Beatles");
        assert_eq!(skipper.skip("a Tribe Called Quest"), "Tribe Called Quest");
        assert_eq!(skipper.skip("Theatre"), "Theatre");
        assert_eq!(skipper.skip("An"), "An");
    }

    #[test]
    fn test_prefix_skipper_uses_configured_list() {
        let skipper = PrefixSkipper::new(&["die ".to_string(), String::new()]);
        assert_eq!(skipper.skip("Die Ärzte"), "Ärzte");
        assert_eq!(skipper.skip("The Cure"), "The Cure");
    }

    #[test]
    fn test_type_ahead_matches_prefix_ignoring_case() {
        assert!(matches_start_case_insensitive("Radiohead", "radio"));
        assert!(matches_start_case_insensitive("Radiohead", ""));
        assert!(!matches_start_case_insensitive("Radio", "radiohead"));
        assert!(!matches_start_case_insensitive("Björk", "bjo"));
    }
}
