//! HTML parsing for listing and detail pages.

mod detail;
mod listing;

pub use detail::{multiply_value_numbers, parse_detail_document};
pub use listing::{parse_listing_document, ListingPage};

use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use url::Url;

use crate::models::SpecFields;

/// Markers of a bot-check or throttling page served in place of content.
pub const BLOCK_PAGE_MARKERS: &[&str] = &[
    "Automated bot check in progress",
    "Automated bot check",
    "Too Many Requests",
    "HTTP 429",
];

/// Marker that turns an otherwise successful response into a challenge.
pub const BOT_CHECK_MARKER: &str = "Automated bot check";

static ROWS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELLS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th, td").unwrap());
static LISTS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dl").unwrap());
static TERMS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dt").unwrap());
static ITEMS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());
static LABELS: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".label").unwrap());
static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static VALUES: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".value").unwrap());

/// Case-insensitive check for any block marker in a page body.
pub fn contains_block_marker(body: &str) -> bool {
    let lowered = body.to_lowercase();
    BLOCK_PAGE_MARKERS
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Text content with each text node trimmed and concatenated.
pub(crate) fn compact_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Text content with trimmed text nodes joined by single spaces.
pub(crate) fn spaced_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased title with collapsed whitespace, used to compare headings.
pub(crate) fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve an href against the site root the way the listing links expect.
pub(crate) fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim_start_matches('/'))
        .ok()
        .map(|u| u.to_string())
}

/// Collect key/value pairs from table rows, definition lists and labelled
/// list items under `node`.
pub(crate) fn collect_key_values(node: ElementRef<'_>) -> SpecFields {
    let mut data = SpecFields::new();

    for row in node.select(&ROWS) {
        let found: Vec<ElementRef<'_>> = row.select(&CELLS).take(2).collect();
        if found.len() < 2 {
            continue;
        }
        let key = field_key(found[0]);
        let value = spaced_text(found[1]);
        if !key.is_empty() && !value.is_empty() {
            data.insert(key, value);
        }
    }

    for dl in node.select(&LISTS) {
        for term in dl.select(&TERMS) {
            let Some(dd) = term
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "dd")
            else {
                continue;
            };
            let key = field_key(term);
            let value = spaced_text(dd);
            if !key.is_empty() && !value.is_empty() {
                data.insert(key, value);
            }
        }
    }

    for item in node.select(&ITEMS) {
        let Some(label) = item
            .select(&LABELS)
            .next()
            .or_else(|| item.select(&STRONG).next())
        else {
            continue;
        };
        let value = item.select(&VALUES).next().unwrap_or(item);
        let key = field_key(label);
        let text = spaced_text(value);
        if !key.is_empty() && !text.is_empty() {
            data.insert(key, text);
        }
    }

    data
}

fn field_key(el: ElementRef<'_>) -> String {
    compact_text(el).trim_end_matches(':').to_string()
}
