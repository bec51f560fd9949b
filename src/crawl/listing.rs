//! Sequential listing queries, one per (manufacturer, year).

use tracing::{info, warn};
use url::Url;

use super::pool::StopSignal;
use crate::models::{FilterRecord, Listing};
use crate::normalize::{merge_url_query, to_human_listing_url};
use crate::parse::parse_listing_document;
use crate::scrapers::{FetchExecutor, FetchRequest};

/// Path of the filterable listing page, relative to the site root.
pub const LIST_PATH: &str = "gpu-specs/";

/// Every (manufacturer, year) pair, year-major.
pub fn combos(manufacturers: &[String], start_year: i32, end_year: i32) -> Vec<(String, i32)> {
    (start_year..=end_year)
        .flat_map(|year| manufacturers.iter().map(move |m| (m.clone(), year)))
        .collect()
}

/// Expand `{manufacturer}` and `{year}` in a filter template.
pub fn build_filter(template: &str, manufacturer: &str, year: i32) -> String {
    template
        .replace("{manufacturer}", manufacturer)
        .replace("{year}", &year.to_string())
}

/// The AJAX listing URL for one filter value.
pub fn listing_url(base_url: &Url, filter: &str) -> String {
    let list = base_url
        .join(LIST_PATH)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}/{}", base_url.as_str().trim_end_matches('/'), LIST_PATH));
    merge_url_query(&list, &[("f", filter), ("ajax", "")])
}

/// Everything the listing phase produced.
#[derive(Debug, Default)]
pub struct ListingReport {
    pub listings: Vec<Listing>,
    pub filters: Vec<FilterRecord>,
    /// Set when `max_items` cut the crawl short.
    pub truncated: bool,
}

pub struct ListingCrawler {
    executor: FetchExecutor,
    base_url: Url,
    filter_template: String,
    max_items: Option<usize>,
    stop: StopSignal,
}

impl ListingCrawler {
    pub fn new(executor: FetchExecutor, base_url: Url, filter_template: impl Into<String>) -> Self {
        Self {
            executor,
            base_url,
            filter_template: filter_template.into(),
            max_items: None,
            stop: StopSignal::new(),
        }
    }

    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Query each combination in turn. A failed query is recorded on its
    /// filter record and does not stop the crawl.
    pub async fn run(&self, manufacturers: &[String], start_year: i32, end_year: i32) -> ListingReport {
        let mut report = ListingReport::default();

        for (manufacturer, year) in combos(manufacturers, start_year, end_year) {
            if self.stop.is_stopped() {
                info!("Stop requested, skipping remaining listing queries");
                break;
            }

            let record = self.query(&manufacturer, year, &mut report.listings).await;
            if let Some(notice) = &record.notice {
                warn!("{} (manufacturer={}, year={})", notice, manufacturer, year);
            }
            info!("{} {}: {} GPUs", manufacturer, year, record.results);
            report.filters.push(record);

            if let Some(max) = self.max_items {
                if report.listings.len() >= max {
                    report.listings.truncate(max);
                    report.truncated = true;
                    info!("Reached limit of {} listings, stopping", max);
                    break;
                }
            }
        }
        report
    }

    async fn query(&self, manufacturer: &str, year: i32, sink: &mut Vec<Listing>) -> FilterRecord {
        let filter = build_filter(&self.filter_template, manufacturer, year);
        let direct = listing_url(&self.base_url, &filter);
        let request = FetchRequest::listing(direct.clone(), to_human_listing_url(&direct));

        let mut record = FilterRecord {
            manufacturer: manufacturer.to_string(),
            year,
            query: filter,
            results: 0,
            notice: None,
            error: None,
        };

        let body = match self.executor.fetch(&request).await {
            Ok(success) => success.body,
            Err(failure) => {
                warn!("Listing query {} failed: {}", direct, failure.detail);
                record.error = Some(format!("{}: {}", failure.kind, failure.detail));
                return record;
            }
        };

        let page = parse_listing_document(&body, manufacturer, year, &self.base_url);
        record.results = page.listings.len();
        record.notice = page.notice;
        sink.extend(page.listings);
        record
    }
}
