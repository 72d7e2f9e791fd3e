use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::store::Row;

static TAG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.big-tags-item-name > a.link-block-target").unwrap());

/// What a flow does with one row: which URL to load and what to store from
/// the loaded page.
pub trait RowAction {
    /// Short name for log lines.
    fn label(&self) -> &'static str;

    /// A row with any of these missing or blank is skipped.
    fn required_columns(&self) -> Vec<&str>;

    fn output_column(&self) -> &str;

    /// Only called for rows that have every required column.
    fn target_url(&self, row: &Row<'_>) -> String;

    /// Value for the output column. `None` stores an empty cell.
    fn interpret(&self, url: &str, page: &str) -> Option<String>;
}

/// Builds the per-track lookup URL and records it once the page was queued.
pub struct OpenTrackPage {
    pub host: String,
    pub artist_column: String,
    pub track_column: String,
    pub url_column: String,
}

impl RowAction for OpenTrackPage {
    fn label(&self) -> &'static str {
        "open"
    }

    fn required_columns(&self) -> Vec<&str> {
        vec![self.artist_column.as_str(), self.track_column.as_str()]
    }

    fn output_column(&self) -> &str {
        &self.url_column
    }

    fn target_url(&self, row: &Row<'_>) -> String {
        track_url(
            &self.host,
            row.get(&self.artist_column).unwrap_or_default(),
            row.get(&self.track_column).unwrap_or_default(),
        )
    }

    fn interpret(&self, url: &str, _page: &str) -> Option<String> {
        Some(url.to_string())
    }
}

/// Reads the tag names off a track's tag page.
pub struct ScrapeTags {
    pub url_column: String,
    pub tags_column: String,
}

impl RowAction for ScrapeTags {
    fn label(&self) -> &'static str {
        "scrape"
    }

    fn required_columns(&self) -> Vec<&str> {
        vec![self.url_column.as_str()]
    }

    fn output_column(&self) -> &str {
        &self.tags_column
    }

    fn target_url(&self, row: &Row<'_>) -> String {
        row.get(&self.url_column).unwrap_or_default().trim().to_string()
    }

    fn interpret(&self, _url: &str, page: &str) -> Option<String> {
        let tags = extract_tags(page);
        (!tags.is_empty()).then(|| tags.join(", "))
    }
}

/// `https://{host}/music/{artist}/_/{track}/+tags`, spaces turned into `+`.
/// Nothing else is escaped, so names with `/`, `&` or `?` yield broken URLs.
pub fn track_url(host: &str, artist: &str, track: &str) -> String {
    format!(
        "https://{}/music/{}/_/{}/+tags",
        host,
        artist.replace(' ', "+"),
        track.replace(' ', "+")
    )
}

/// Text of every tag link on a tag page, in page order, blanks dropped.
pub fn extract_tags(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&TAG_SELECTOR)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
