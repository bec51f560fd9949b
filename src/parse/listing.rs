//! Listing query results.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use super::{absolutize, compact_text};
use crate::models::Listing;

/// Parsed listing rows plus an optional notice for the filter record.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub listings: Vec<Listing>,
    pub notice: Option<String>,
}

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table.items-desktop-table").unwrap());
static ITEM_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.items-desktop-table td div.item-name > a").unwrap());

#[derive(Deserialize)]
struct AjaxListing {
    #[serde(default)]
    list: Option<String>,
}

/// Parse a listing response. The AJAX endpoint may wrap the table HTML in a
/// JSON object `{"list": "<html>"}`; plain HTML is accepted as is.
///
/// Rows are deduplicated by raw detail URL within the page.
pub fn parse_listing_document(
    body: &str,
    manufacturer: &str,
    year: i32,
    base: &Url,
) -> ListingPage {
    let html = match serde_json::from_str::<AjaxListing>(body) {
        Ok(AjaxListing { list }) => list.unwrap_or_default(),
        Err(_) => body.to_string(),
    };

    let document = Html::parse_document(&html);
    if document.select(&TABLE).next().is_none() {
        let notice = if html.trim().is_empty() {
            "empty listing response"
        } else {
            "listing table not found"
        };
        return ListingPage {
            listings: Vec::new(),
            notice: Some(notice.to_string()),
        };
    }

    let mut seen = HashSet::new();
    let mut listings = Vec::new();
    for anchor in document.select(&ITEM_LINKS) {
        let href = anchor.value().attr("href").unwrap_or_default();
        let name = compact_text(anchor);
        let Some(detail_url) = absolutize(base, href) else {
            continue;
        };
        if name.is_empty() || href.is_empty() {
            continue;
        }
        if seen.insert(detail_url.clone()) {
            listings.push(Listing::new(manufacturer, year, name, detail_url));
        }
    }

    ListingPage {
        listings,
        notice: None,
    }
}
