//! End-to-end runs against scripted in-process capabilities.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use gpu_ladder::crawl::StopSignal;
use gpu_ladder::error::TransportError;
use gpu_ladder::models::{FailureKind, FetchStrategy};
use gpu_ladder::normalize::normalize;
use gpu_ladder::scrapers::browser::{BrowserCookie, RefreshOptions, RenderedPage};
use gpu_ladder::scrapers::{
    BrowserCapability, Channel, FetchExecutor, HttpCapability, HttpResponse, RateLimiter, SessionManager,
};
use gpu_ladder::storage::{DatasetStore, JsonDatasetStore, MemoryDatasetStore, MemorySessionStore, SessionStore};
use gpu_ladder::{Dataset, DetailRecord, FailureEntry, Listing, RunError, RunMode, Runner, Settings, StoreError};

const BASE: &str = "https://gpu.test";

fn url(slug: &str) -> String {
    format!("{BASE}/gpu-specs/{slug}")
}

fn detail_page(name: &str) -> String {
    format!(
        "<html><body><main><h1>{name}</h1>\
         <section class=\"details\"><h2>Memory</h2>\
         <dl><dt>Memory Size</dt><dd>8 GB</dd></dl></section></main></body></html>"
    )
}

const LISTING_BODY: &str = r#"{"list": "<table class=\"items-desktop-table\"><tr><td><div class=\"item-name\"><a href=\"/gpu-specs/a.c1\">Radeon A</a></div></td></tr><tr><td><div class=\"item-name\"><a href=\"/gpu-specs/b.c2\">Radeon B</a></div></td></tr></table>"}"#;

/// HTTP capability answering from a per-URL script, then with a generic
/// success page. Records every call and the peak number in flight.
#[derive(Default)]
struct ScriptedHttp {
    script: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    calls: Mutex<Vec<String>>,
    cookie_headers: Mutex<Vec<(String, Option<String>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedHttp {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    fn script(&self, url: &str, statuses: &[u16]) {
        let queue = statuses.iter().map(|s| HttpResponse::new(*s, "")).collect();
        self.script.lock().unwrap().insert(url.to_string(), queue);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }

    fn cookie_header_sent_to(&self, url: &str) -> Option<String> {
        self.cookie_headers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .and_then(|(_, h)| h.clone())
    }
}

#[async_trait]
impl HttpCapability for ScriptedHttp {
    async fn get(&self, url: &str, cookie_header: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.cookie_headers
            .lock()
            .unwrap()
            .push((url.to_string(), cookie_header.map(str::to_string)));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| {
            if url.contains("ajax") {
                HttpResponse::new(200, LISTING_BODY)
            } else {
                HttpResponse::new(200, detail_page(url))
            }
        }))
    }
}

/// Browser capability that renders scripted page bodies (a generic detail
/// page otherwise) and counts session refreshes.
#[derive(Default)]
struct ScriptedBrowser {
    pages: Mutex<HashMap<String, VecDeque<String>>>,
    fetches: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
    page_cookies: Vec<BrowserCookie>,
}

impl ScriptedBrowser {
    fn with_page_cookies(cookies: Vec<BrowserCookie>) -> Self {
        Self {
            page_cookies: cookies,
            ..Default::default()
        }
    }

    fn script(&self, url: &str, bodies: &[&str]) {
        let queue = bodies.iter().map(|b| b.to_string()).collect();
        self.pages.lock().unwrap().insert(url.to_string(), queue);
    }

    fn fetches_of(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|u| u.as_str() == url).count()
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserCapability for ScriptedBrowser {
    async fn fetch_rendered(&self, url: &str, _cookies: &[BrowserCookie]) -> anyhow::Result<RenderedPage> {
        self.fetches.lock().unwrap().push(url.to_string());
        let scripted = self.pages.lock().unwrap().get_mut(url).and_then(|q| q.pop_front());
        Ok(RenderedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            content: scripted.unwrap_or_else(|| detail_page(url)),
            cookies: self.page_cookies.clone(),
        })
    }

    async fn refresh_session(&self, _target_url: &str, _options: &RefreshOptions) -> anyhow::Result<Vec<BrowserCookie>> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![BrowserCookie::new("cf_clearance", format!("r{n}"), "gpu.test")])
    }
}

fn settings() -> Settings {
    let mut s = Settings {
        listing_delay: Duration::ZERO,
        detail_delay: Duration::ZERO,
        rate_limit_sleep: Duration::from_secs(5),
        manufacturers: vec!["AMD".to_string()],
        start_year: 2024,
        end_year: 2024,
        ..Default::default()
    };
    s.set_base_url(BASE).unwrap();
    s
}

fn runner(http: Arc<ScriptedHttp>, settings: &Settings, store: Arc<dyn DatasetStore>) -> Runner {
    let session = Arc::new(SessionManager::new(
        settings.session_config(),
        Arc::new(MemorySessionStore::default()),
        None,
    ));
    let limiter = RateLimiter::with_config(settings.rate_limit_config());
    let executor = FetchExecutor::new(limiter, session, http, None, settings.strategy_policy(false));
    Runner::new(settings.clone(), store, executor)
}

/// Runner wired with a browser. The session store starts with a cookie so
/// no bootstrap refresh happens before the first request.
fn browser_runner(
    http: Arc<ScriptedHttp>,
    browser: Arc<ScriptedBrowser>,
    settings: &Settings,
    store: Arc<dyn DatasetStore>,
    sessions: Arc<MemorySessionStore>,
) -> (Runner, RateLimiter) {
    let browser: Arc<dyn BrowserCapability> = browser;
    let session = Arc::new(SessionManager::new(settings.session_config(), sessions, Some(browser.clone())));
    let limiter = RateLimiter::with_config(settings.rate_limit_config());
    let executor = FetchExecutor::new(
        limiter.clone(),
        session,
        http,
        Some(browser),
        settings.strategy_policy(true),
    );
    (Runner::new(settings.clone(), store, executor), limiter)
}

fn browser_settings() -> Settings {
    Settings {
        cookie_domain: "gpu.test".to_string(),
        ..settings()
    }
}

fn seeded_sessions() -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::new(vec![BrowserCookie::new("sid", "s0", "gpu.test")]))
}

fn dataset(slugs: &[&str]) -> Dataset {
    let mut d = Dataset::empty(2024, 2024, vec!["AMD".into()], "year_{year}~mfgr_{manufacturer}");
    d.listings = slugs
        .iter()
        .map(|s| Listing::new("AMD", 2024, s.to_uppercase(), url(s)))
        .collect();
    d.count = d.listings.len();
    d
}

fn stored_detail(slug: &str) -> DetailRecord {
    DetailRecord {
        url: url(slug),
        title: "stored".to_string(),
        ..Default::default()
    }
    .with_provenance(FetchStrategy::Direct, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
}

fn ledger_entry(slug: &str, attempts: u32) -> FailureEntry {
    FailureEntry::new(
        url(slug),
        FailureKind::Terminal,
        "HTTP 404",
        attempts,
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn fill_missing_fetches_only_absent_keys() {
    let mut d = dataset(&["a.c1", "b.c2", "c.c3"]);
    d.details.insert(normalize(&url("a.c1")), stored_detail("a.c1"));

    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("c.c3"), &[404]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));
    let summary = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert_eq!(http.calls_to(&url("a.c1")), 0);
    assert_eq!(http.calls_to(&url("b.c2")), 1);
    assert_eq!(summary.details_fetched, 1);
    assert_eq!(summary.details_failed, 1);

    let saved = store.snapshot().unwrap();
    assert_eq!(saved.details.len(), 2);
    assert_eq!(saved.details[&normalize(&url("a.c1"))].title, "stored");
    assert!(saved.has_detail(&normalize(&url("b.c2"))));
    assert_eq!(saved.failed_details.len(), 1);
    let failure = &saved.failed_details[0];
    assert_eq!(failure.normalized_key, normalize(&url("c.c3")));
    assert_eq!(failure.attempt_count, 1);
    assert_eq!(failure.error_kind, FailureKind::Terminal);
    assert_eq!(saved.count, 3);
}

#[tokio::test]
async fn fill_missing_repeat_failure_keeps_ledger_count() {
    let mut d = dataset(&["a.c1", "b.c2", "c.c3"]);
    d.details.insert(normalize(&url("a.c1")), stored_detail("a.c1"));
    d.failed_details = vec![ledger_entry("b.c2", 1)];

    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("b.c2"), &[404]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));
    let summary = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert_eq!(http.calls_to(&url("a.c1")), 0);
    assert_eq!(summary.details_fetched, 1);
    assert_eq!(summary.details_failed, 1);

    let saved = store.snapshot().unwrap();
    let keys: Vec<_> = saved.details.keys().cloned().collect();
    assert_eq!(keys, vec![normalize(&url("a.c1")), normalize(&url("c.c3"))]);
    assert_eq!(saved.failed_details.len(), 1);
    assert_eq!(saved.failed_details[0].normalized_key, normalize(&url("b.c2")));
    assert_eq!(saved.failed_details[0].attempt_count, 1);
}

#[tokio::test]
async fn fill_missing_with_nothing_to_do_leaves_dataset_alone() {
    let mut d = dataset(&["a.c1"]);
    d.details.insert(normalize(&url("a.c1")), stored_detail("a.c1"));
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));

    let summary = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();
    assert!(!summary.saved);
    assert!(http.calls().is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn retry_respects_max_retry() {
    let mut d = dataset(&["a.c1", "b.c2", "c.c3"]);
    d.details.insert(normalize(&url("a.c1")), stored_detail("a.c1"));
    d.failed_details = vec![ledger_entry("b.c2", 1), ledger_entry("c.c3", 2)];

    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));
    let mut s = settings();
    s.max_retry = Some(1);
    let summary = runner(http.clone(), &s, store.clone())
        .run(RunMode::Retry, None)
        .await
        .unwrap();

    assert_eq!(http.calls().len(), 1);
    assert_eq!(http.calls_to(&url("b.c2")), 1);
    assert_eq!(summary.details_fetched, 1);

    let saved = store.snapshot().unwrap();
    assert!(saved.has_detail(&normalize(&url("b.c2"))));
    assert_eq!(saved.failed_details.len(), 1);
    assert_eq!(saved.failed_details[0].normalized_key, normalize(&url("c.c3")));
    assert_eq!(saved.failed_details[0].attempt_count, 2);
}

#[tokio::test]
async fn retry_failure_increments_attempt_count() {
    let mut d = dataset(&["c.c3"]);
    d.failed_details = vec![ledger_entry("c.c3", 2)];

    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("c.c3"), &[404]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));
    runner(http, &settings(), store.clone())
        .run(RunMode::Retry, None)
        .await
        .unwrap();

    let saved = store.snapshot().unwrap();
    assert_eq!(saved.failed_details.len(), 1);
    assert_eq!(saved.failed_details[0].attempt_count, 3);
    assert!(saved.details.is_empty());
}

#[tokio::test(start_paused = true)]
async fn consecutive_rate_limits_enforce_cooldowns() {
    let d = dataset(&["a.c1"]);
    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("a.c1"), &[429, 429]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));

    let started = tokio::time::Instant::now();
    let summary = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(http.calls_to(&url("a.c1")), 3);
    assert_eq!(summary.rate_limit_hits, 2);
    assert_eq!(summary.details_fetched, 1);
    assert!(store.snapshot().unwrap().failed_details.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_errors_back_off_and_recover() {
    let d = dataset(&["a.c1"]);
    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("a.c1"), &[503, 502]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));

    let started = tokio::time::Instant::now();
    let summary = runner(http.clone(), &settings(), store)
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    // 1.5s after the first failure, 3s after the second
    assert!(started.elapsed() >= Duration::from_millis(4500));
    assert_eq!(summary.details_fetched, 1);
    assert_eq!(http.calls_to(&url("a.c1")), 3);
}

#[tokio::test]
async fn challenge_without_browser_is_recorded() {
    let d = dataset(&["a.c1"]);
    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("a.c1"), &[403]);
    let store = Arc::new(MemoryDatasetStore::new(Some(d)));

    runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert_eq!(http.calls_to(&url("a.c1")), 1);
    let saved = store.snapshot().unwrap();
    assert_eq!(saved.failed_details[0].error_kind, FailureKind::Challenge);
}

#[tokio::test(start_paused = true)]
async fn pool_width_bounds_requests_in_flight() {
    let slugs: Vec<String> = (0..12).map(|i| format!("g.c{i}")).collect();
    let refs: Vec<&str> = slugs.iter().map(String::as_str).collect();
    let http = Arc::new(ScriptedHttp::with_latency(Duration::from_millis(200)));
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&refs))));
    let mut s = settings();
    s.concurrency = 3;

    let summary = runner(http.clone(), &s, store)
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    let peak = http.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in flight was {peak}");
    assert!(peak >= 2, "workers never overlapped");
    assert_eq!(summary.details_fetched, 12);
}

#[tokio::test]
async fn max_items_caps_fill_missing() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1", "b.c2", "c.c3", "d.c4"]))));
    let mut s = settings();
    s.max_items = Some(2);

    let summary = runner(http.clone(), &s, store.clone())
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert_eq!(http.calls().len(), 2);
    assert_eq!(summary.skipped, 2);
    let saved = store.snapshot().unwrap();
    assert_eq!(saved.details.len(), 2);
    // unstarted items are not failures
    assert!(saved.failed_details.is_empty());
}

#[tokio::test]
async fn stop_before_start_saves_without_fetching() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1", "b.c2"]))));
    let stop = StopSignal::new();
    stop.stop();

    let summary = runner(http.clone(), &settings(), store.clone())
        .with_stop_signal(stop)
        .run(RunMode::FillMissing, None)
        .await
        .unwrap();

    assert!(http.calls().is_empty());
    assert!(summary.interrupted);
    assert_eq!(summary.skipped, 2);
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn missing_dataset_is_fatal_for_fill_missing() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(None));
    let result = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::FillMissing, None)
        .await;

    assert!(matches!(result, Err(RunError::Store(StoreError::NotFound(_)))));
    assert!(http.calls().is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn invalid_settings_abort_before_fetching() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1"]))));
    let mut s = settings();
    s.concurrency = 0;

    let result = runner(http.clone(), &s, store.clone()).run(RunMode::FillMissing, None).await;
    assert!(matches!(result, Err(RunError::Config(_))));
    assert!(http.calls().is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn full_scrape_crawls_listings_then_details() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(None));

    let summary = runner(http.clone(), &settings(), store.clone())
        .run(RunMode::Full, None)
        .await
        .unwrap();

    assert_eq!(summary.listings_fetched, 2);
    assert_eq!(summary.details_fetched, 2);
    let listing_call = &http.calls()[0];
    assert!(listing_call.contains("ajax="));
    assert!(listing_call.starts_with("https://gpu.test/gpu-specs/?"));

    let saved = store.snapshot().unwrap();
    assert_eq!(saved.count, 2);
    assert_eq!(saved.filters.len(), 1);
    assert_eq!(saved.filters[0].results, 2);
    assert_eq!(saved.filters[0].query, "year_2024~mfgr_AMD");
    let a = &saved.details[&normalize(&url("a.c1"))];
    assert_eq!(a.fetched_via, FetchStrategy::Direct);
    assert!(a.fetched_at.is_some());

    // a second identical run changes nothing but timestamps
    runner(http, &settings(), store.clone())
        .run(RunMode::Full, None)
        .await
        .unwrap();
    let again = store.snapshot().unwrap();
    assert_eq!(again.listings, saved.listings);
    assert_eq!(again.filters, saved.filters);
}

#[tokio::test]
async fn skip_details_crawls_listings_only() {
    let http = Arc::new(ScriptedHttp::default());
    let store = Arc::new(MemoryDatasetStore::new(None));
    let mut s = settings();
    s.skip_details = true;

    let summary = runner(http.clone(), &s, store.clone())
        .run(RunMode::Full, None)
        .await
        .unwrap();
    assert_eq!(http.calls().len(), 1);
    assert_eq!(summary.details_fetched, 0);
    assert_eq!(store.snapshot().unwrap().listings.len(), 2);
}

#[tokio::test]
async fn json_store_round_trips_a_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("gpu_specs.json");
    let seed = JsonDatasetStore::new(&path, true);
    seed.save(&dataset(&["a.c1", "b.c2"])).unwrap();

    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("b.c2"), &[404]);
    let store: Arc<dyn DatasetStore> = Arc::new(JsonDatasetStore::new(&path, true));
    runner(http, &settings(), store).run(RunMode::FillMissing, None).await.unwrap();

    let reloaded = JsonDatasetStore::new(&path, false).load().unwrap().unwrap();
    assert_eq!(reloaded.details.len(), 1);
    assert_eq!(reloaded.failed_details.len(), 1);
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["failed_details"][0]["error_kind"], "terminal");
    assert_eq!(raw["details"][url("a.c1")]["fetched_via"], "direct");
}

#[tokio::test]
async fn preferred_browser_fetches_details_without_direct_requests() {
    let http = Arc::new(ScriptedHttp::default());
    let browser = Arc::new(ScriptedBrowser::default());
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1"]))));
    let mut s = browser_settings();
    s.prefer_browser_for_details = true;

    let (runner, limiter) = browser_runner(http.clone(), browser.clone(), &s, store.clone(), seeded_sessions());
    let summary = runner.run(RunMode::FillMissing, None).await.unwrap();

    assert_eq!(summary.details_fetched, 1);
    assert!(http.calls().is_empty());
    assert_eq!(browser.fetches_of(&url("a.c1")), 1);
    assert_eq!(limiter.stats(Channel::Detail).await.total_requests, 1);
    let saved = store.snapshot().unwrap();
    let record = &saved.details[&normalize(&url("a.c1"))];
    assert_eq!(record.fetched_via, FetchStrategy::Assisted);
    assert_eq!(record.title, url("a.c1"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_direct_attempts_escalate_to_browser_once() {
    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("a.c1"), &[404]);
    let browser = Arc::new(ScriptedBrowser::with_page_cookies(vec![
        BrowserCookie::new("seen", "1", "gpu.test"),
        BrowserCookie::new("ad", "x", "tracker.example"),
    ]));
    let sessions = seeded_sessions();
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1", "b.c2"]))));
    let mut s = browser_settings();
    s.browser_fallback = true;
    s.concurrency = 1;
    s.detail_delay = Duration::from_secs(2);

    let started = tokio::time::Instant::now();
    let (runner, limiter) = browser_runner(http.clone(), browser.clone(), &s, store.clone(), sessions.clone());
    let summary = runner.run(RunMode::FillMissing, None).await.unwrap();

    assert_eq!(summary.details_fetched, 2);
    assert_eq!(http.calls_to(&url("a.c1")), 1);
    assert_eq!(browser.fetches_of(&url("a.c1")), 1);
    assert_eq!(browser.fetches_of(&url("b.c2")), 0);
    // direct a, assisted a, direct b: each admission waits out the delay
    assert_eq!(limiter.stats(Channel::Detail).await.total_requests, 3);
    assert!(started.elapsed() >= Duration::from_secs(4));

    let saved = store.snapshot().unwrap();
    assert!(saved.failed_details.is_empty());
    assert_eq!(saved.details[&normalize(&url("a.c1"))].fetched_via, FetchStrategy::Assisted);
    assert_eq!(saved.details[&normalize(&url("b.c2"))].fetched_via, FetchStrategy::Direct);

    // cookies seen by the browser ride along on later direct requests
    assert_eq!(http.cookie_header_sent_to(&url("b.c2")).as_deref(), Some("sid=s0; seen=1"));
    let stored: Vec<String> = sessions.load().unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(stored, vec!["sid", "seen"]);
}

#[tokio::test]
async fn challenge_refreshes_once_then_escalates_then_fails() {
    let http = Arc::new(ScriptedHttp::default());
    http.script(&url("a.c1"), &[403, 403]);
    let browser = Arc::new(ScriptedBrowser::default());
    browser.script(&url("a.c1"), &["<p>Automated bot check in progress</p>"]);
    let store = Arc::new(MemoryDatasetStore::new(Some(dataset(&["a.c1"]))));
    let mut s = browser_settings();
    s.auto_refresh_on_429 = true;
    s.browser_fallback = true;

    let (runner, _) = browser_runner(http.clone(), browser.clone(), &s, store.clone(), seeded_sessions());
    let summary = runner.run(RunMode::FillMissing, None).await.unwrap();

    assert_eq!(browser.refreshes(), 1);
    assert_eq!(summary.session_refreshes, 1);
    assert_eq!(http.calls_to(&url("a.c1")), 2);
    assert_eq!(browser.fetches_of(&url("a.c1")), 1);
    // the retry after the refresh carried the new cookie
    assert_eq!(http.cookie_header_sent_to(&url("a.c1")).as_deref(), Some("cf_clearance=r1"));

    let saved = store.snapshot().unwrap();
    assert!(saved.details.is_empty());
    assert_eq!(saved.failed_details.len(), 1);
    assert_eq!(saved.failed_details[0].error_kind, FailureKind::Challenge);
    assert_eq!(saved.failed_details[0].attempt_count, 1);
}
