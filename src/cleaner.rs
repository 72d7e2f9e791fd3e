use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::store::Dataset;

static NUMERIC_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

pub const DEFAULT_EXCLUSIONS: &[&str] = &["seen live", "female vocalists", "male vocalists", "my favorite"];

/// Filters unwanted tags out of a comma-separated tag string.
#[derive(Debug, Clone)]
pub struct TagCleaner {
    excluded: HashSet<String>,
}

impl Default for TagCleaner {
    fn default() -> Self {
        TagCleaner::new(DEFAULT_EXCLUSIONS.iter().copied())
    }
}

impl TagCleaner {
    /// Matching is case-insensitive, so entries are lowercased here.
    pub fn new<I, S>(exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TagCleaner {
            excluded: exclusions
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded.extend(
            extra
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
        self
    }

    pub fn is_excluded(&self, tag: &str) -> bool {
        self.excluded.contains(&tag.to_lowercase()) || NUMERIC_TAG_RE.is_match(tag)
    }

    /// `None` and blank values come back untouched. A value whose tags are
    /// all filtered out comes back as `None`, so "had tags, all dropped" can
    /// be told apart from "never had tags".
    pub fn clean_tags(&self, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        if raw.trim().is_empty() {
            return Some(raw.to_string());
        }

        let tags: Vec<&str> = raw.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        let kept: Vec<&str> = tags.iter().copied().filter(|t| !self.is_excluded(t)).collect();
        debug!("Original tags: {:?}, cleaned tags: {:?}", tags, kept);

        if kept.is_empty() {
            None
        } else {
            Some(kept.join(", "))
        }
    }

    /// Copy of `dataset` with `column` cleaned; every other column and the
    /// row order stay as they were.
    pub fn clean_dataset(&self, dataset: &Dataset, column: &str) -> Dataset {
        let mut cleaned = dataset.clone();
        if !cleaned.map_column(column, |v| self.clean_tags(v)) {
            warn!("Column {:?} not found, nothing to clean", column);
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(raw: &str) -> Option<String> {
        TagCleaner::default().clean_tags(Some(raw))
    }

    #[test]
    fn drops_excluded_and_numeric() {
        assert_eq!(clean("Rock, 2007, Seen Live, Pop").as_deref(), Some("Rock, Pop"));
    }

    #[test]
    fn all_dropped_is_none() {
        assert_eq!(clean("2007, 1999"), None);
        assert_eq!(clean("seen live, MY FAVORITE"), None);
    }

    #[test]
    fn blank_and_missing_pass_through() {
        let cleaner = TagCleaner::default();
        assert_eq!(cleaner.clean_tags(None), None);
        assert_eq!(cleaner.clean_tags(Some("")).as_deref(), Some(""));
        assert_eq!(cleaner.clean_tags(Some("   ")).as_deref(), Some("   "));
    }

    #[test]
    fn normalizes_spacing_and_empty_tokens() {
        assert_eq!(clean(" indie ,,electronic,  ").as_deref(), Some("indie, electronic"));
    }

    #[test]
    fn numbers_inside_tags_are_kept() {
        assert_eq!(clean("80s, 2000s, 4ad").as_deref(), Some("80s, 2000s, 4ad"));
    }

    #[test]
    fn idempotent() {
        let cleaner = TagCleaner::default();
        for raw in [
            "Rock, 2007, Seen Live, Pop",
            "2007, 1999",
            "",
            "  ",
            "female vocalists,  dream pop ,shoegaze",
            "a,,b",
        ] {
            let once = cleaner.clean_tags(Some(raw));
            let twice = cleaner.clean_tags(once.as_deref());
            assert_eq!(once, twice, "input {:?}", raw);
        }
    }

    #[test]
    fn never_returns_excluded_tokens() {
        let cleaner = TagCleaner::default().with_extra(["Favourites"]);
        let out = cleaner
            .clean_tags(Some("Jazz, favourites, 1959, Male Vocalists, bebop, 42"))
            .unwrap();
        for token in out.split(", ") {
            assert!(!cleaner.is_excluded(token), "{:?} leaked", token);
        }
        assert_eq!(out, "Jazz, bebop");
    }

    #[test]
    fn clean_dataset_touches_one_column() {
        let ds = Dataset::new(
            vec!["Artist".into(), "LastFM Tags".into()],
            vec![
                vec![Some("2007".into()), Some("Rock, 2007".into())],
                vec![Some("B".into()), None],
                vec![Some("C".into()), Some("seen live".into())],
            ],
        );
        let out = TagCleaner::default().clean_dataset(&ds, "LastFM Tags");
        assert_eq!(out.headers(), ds.headers());
        assert_eq!(out.get(0, "Artist"), Some("2007"));
        assert_eq!(out.get(0, "LastFM Tags"), Some("Rock"));
        assert_eq!(out.get(1, "LastFM Tags"), None);
        assert_eq!(out.get(2, "LastFM Tags"), None);
    }

    #[test]
    fn clean_dataset_without_column_is_identity() {
        let ds = Dataset::new(vec!["Artist".into()], vec![vec![Some("A".into())]]);
        assert_eq!(TagCleaner::default().clean_dataset(&ds, "Tags"), ds);
    }
}
