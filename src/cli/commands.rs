//! CLI parser and command implementations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use console::style;
use tokio::sync::mpsc;

use gpu_ladder::config::seconds;
use gpu_ladder::crawl::{patch_listings, DetailEvent, StopSignal};
use gpu_ladder::storage::{DatasetStore, JsonDatasetStore};
use gpu_ladder::{RunError, RunMode, RunSummary, Runner, Settings, StoreError};

use super::helpers::{confirmation, install_interrupt_handler, load_settings, parse_combo, parse_seconds};
use super::progress::spawn_detail_progress;

#[derive(Parser)]
#[command(name = "gpu-ladder")]
#[command(about = "Mirror the TechPowerUp GPU database into a local JSON dataset")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listings for a year range, then fetch every detail page
    Scrape {
        #[command(flatten)]
        listing: ListingArgs,
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Fetch details for listed GPUs that have none yet
    FillMissing {
        /// Stop after this many detail fetches
        #[arg(long, alias = "max-gpus")]
        max_items: Option<usize>,
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Re-fetch entries recorded in failed_details
    Retry {
        /// Retry at most this many entries
        #[arg(long)]
        max_retry: Option<usize>,
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Show counts for a dataset file
    Status {
        /// Dataset file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replace the listings of selected manufacturer/year pairs from a patch file
    PatchListings {
        /// Dataset file to patch
        #[arg(long)]
        output: Option<PathBuf>,
        /// Dataset file holding the replacement listings
        #[arg(long)]
        patch: PathBuf,
        /// MANUFACTURER:YEAR pairs to replace (repeatable)
        #[arg(long = "combo", required = true, value_parser = parse_combo)]
        combos: Vec<(String, i32)>,
        /// Indent the written JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Args, Debug)]
struct ListingArgs {
    /// First year (inclusive)
    #[arg(long)]
    start_year: Option<i32>,
    /// Last year (inclusive)
    #[arg(long)]
    end_year: Option<i32>,
    /// Manufacturers to query (case-insensitive)
    #[arg(long, num_args = 1..)]
    manufacturers: Vec<String>,
    /// Listing filter, with {year} and {manufacturer} placeholders
    #[arg(long)]
    filter_template: Option<String>,
    /// Site root
    #[arg(long)]
    base_url: Option<String>,
    /// Seconds between listing requests
    #[arg(long, value_parser = parse_seconds)]
    delay: Option<f64>,
    /// Stop after this many listings
    #[arg(long, alias = "max-gpus")]
    max_items: Option<usize>,
    /// Crawl listings only
    #[arg(long)]
    skip_details: bool,
    /// Fetch listings through the browser
    #[arg(long)]
    prefer_browser_for_listings: bool,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Dataset file
    #[arg(long)]
    output: Option<PathBuf>,
    /// Indent the written JSON
    #[arg(long)]
    pretty: bool,
    /// Browser storage-state file holding session cookies
    #[arg(long)]
    storage_state: Option<PathBuf>,
    /// Concurrent detail workers
    #[arg(long)]
    concurrency: Option<usize>,
    /// Seconds between detail requests
    #[arg(long, value_parser = parse_seconds)]
    detail_delay: Option<f64>,
    /// HTTP timeout in seconds
    #[arg(long, value_parser = parse_seconds)]
    http_timeout: Option<f64>,
    /// Direct attempts per item
    #[arg(long)]
    retries: Option<u32>,
    /// Seconds to wait after a 429 without Retry-After
    #[arg(long, value_parser = parse_seconds)]
    rate_limit_sleep: Option<f64>,
    /// Minimum seconds between session refreshes
    #[arg(long, value_parser = parse_seconds)]
    refresh_cooldown: Option<f64>,
    /// Refresh the session on challenges and repeated 429s
    #[arg(long)]
    auto_refresh_on_429: bool,
    /// Use the browser when direct attempts are exhausted
    #[arg(long)]
    browser_fallback_on_fail: bool,
    /// Fetch detail pages through the browser
    #[arg(long)]
    prefer_browser_for_details: bool,
    /// Run the browser headless
    #[arg(long)]
    headless: bool,
    /// Seconds to wait for a bot check to clear
    #[arg(long)]
    wait_seconds: Option<u64>,
    /// Press Enter in the terminal once the bot check is solved
    #[arg(long)]
    manual_confirm: bool,
    /// Ignore stored cookies and bootstrap a new session
    #[arg(long)]
    refresh_cookies: bool,
    /// User agent ("random" picks one per run)
    #[arg(long)]
    user_agent: Option<String>,
    /// Print a line per detail instead of a progress bar
    #[arg(long)]
    log_detail_progress: bool,
}

impl FetchArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref output) = self.output {
            settings.output = output.clone();
        }
        if let Some(ref state) = self.storage_state {
            settings.storage_state = state.clone();
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n;
        }
        if let Some(v) = self.detail_delay {
            settings.detail_delay = seconds(v);
        }
        if let Some(v) = self.http_timeout {
            settings.http_timeout = seconds(v);
        }
        if let Some(n) = self.retries {
            settings.retries = n;
        }
        if let Some(v) = self.rate_limit_sleep {
            settings.rate_limit_sleep = seconds(v);
        }
        if let Some(v) = self.refresh_cooldown {
            settings.refresh_cooldown = seconds(v);
        }
        if let Some(v) = self.wait_seconds {
            settings.wait_seconds = v;
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        settings.pretty |= self.pretty;
        settings.auto_refresh_on_429 |= self.auto_refresh_on_429;
        settings.browser_fallback |= self.browser_fallback_on_fail;
        settings.prefer_browser_for_details |= self.prefer_browser_for_details;
        settings.headless |= self.headless;
        settings.manual_confirm |= self.manual_confirm;
        settings.refresh_cookies |= self.refresh_cookies;
        settings.log_detail_progress |= self.log_detail_progress;
    }
}

impl ListingArgs {
    fn apply(&self, settings: &mut Settings) -> anyhow::Result<()> {
        if let Some(y) = self.start_year {
            settings.start_year = y;
        }
        if let Some(y) = self.end_year {
            settings.end_year = y;
        }
        if !self.manufacturers.is_empty() {
            settings.manufacturers = gpu_ladder::config::resolve_manufacturers(&self.manufacturers);
        }
        if let Some(ref t) = self.filter_template {
            settings.filter_template = t.clone();
        }
        if let Some(ref url) = self.base_url {
            settings.set_base_url(url)?;
        }
        if let Some(v) = self.delay {
            settings.listing_delay = seconds(v);
        }
        if self.max_items.is_some() {
            settings.max_items = self.max_items;
        }
        settings.skip_details |= self.skip_details;
        settings.prefer_browser_for_listings |= self.prefer_browser_for_listings;
        Ok(())
    }
}

/// Exit code for an error returned from [`run`].
pub fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<RunError>() {
        Some(RunError::Challenge(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Scrape { listing, fetch } => {
            listing.apply(&mut settings)?;
            fetch.apply(&mut settings);
            cmd_run(settings, RunMode::Full).await
        }
        Commands::FillMissing { max_items, fetch } => {
            fetch.apply(&mut settings);
            if max_items.is_some() {
                settings.max_items = max_items;
            }
            cmd_run(settings, RunMode::FillMissing).await
        }
        Commands::Retry { max_retry, fetch } => {
            fetch.apply(&mut settings);
            settings.max_retry = max_retry;
            cmd_run(settings, RunMode::Retry).await
        }
        Commands::Status { output } => {
            let path = output.unwrap_or(settings.output);
            cmd_status(&path)
        }
        Commands::PatchListings {
            output,
            patch,
            combos,
            pretty,
        } => {
            let path = output.unwrap_or(settings.output);
            cmd_patch_listings(&path, &patch, &combos, pretty || settings.pretty)
        }
    }
}

async fn cmd_run(settings: Settings, mode: RunMode) -> anyhow::Result<ExitCode> {
    let log_lines = settings.log_detail_progress;
    let runner = Runner::from_settings(settings.clone(), confirmation(&settings))?;
    let stop = StopSignal::new();
    let runner = runner.with_stop_signal(stop.clone());
    install_interrupt_handler(stop.clone());

    println!(
        "{} {} -> {}",
        style("→").cyan(),
        mode.as_str(),
        settings.output.display()
    );

    let (event_tx, event_rx) = mpsc::channel::<DetailEvent>(100);
    let event_handler = spawn_detail_progress(event_rx, log_lines);

    let result = runner.run(mode, Some(event_tx)).await;
    let _ = event_handler.await;
    runner.shutdown().await;

    let summary = result?;
    print_summary(&summary);
    if summary.interrupted || stop.is_stopped() {
        eprintln!("{} Interrupted by user", style("!").yellow());
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    if !summary.saved {
        println!(
            "{} Nothing to fetch; {} left unchanged",
            style("✓").green(),
            summary.location
        );
        return;
    }
    if summary.mode == RunMode::Full {
        println!(
            "  {} listings fetched ({} queries failed)",
            style(summary.listings_fetched).cyan(),
            summary.filters_failed
        );
    }
    println!(
        "  {} details fetched, {} failed, {} skipped",
        style(summary.details_fetched).cyan(),
        style(summary.details_failed).yellow(),
        summary.skipped
    );
    if summary.rate_limit_hits > 0 || summary.session_refreshes > 0 {
        println!(
            "  {} rate limits, {} session refreshes",
            summary.rate_limit_hits, summary.session_refreshes
        );
    }
    if summary.remaining_failures > 0 {
        println!(
            "{} {} entries in failed_details; run 'gpu-ladder retry' to fetch them again",
            style("!").yellow(),
            summary.remaining_failures
        );
    }
    println!(
        "{} {} listings, {} details written to {}",
        style("✓").green(),
        summary.total_listings,
        summary.total_details,
        summary.location
    );
}

fn load_existing(path: &Path) -> anyhow::Result<gpu_ladder::Dataset> {
    let store = JsonDatasetStore::new(path, false);
    store
        .load()?
        .ok_or_else(|| StoreError::NotFound(path.to_path_buf()).into())
}

fn cmd_status(path: &Path) -> anyhow::Result<ExitCode> {
    let dataset = load_existing(path)?;
    let missing = gpu_ladder::crawl::merge::fill_missing_candidates(&dataset).len();

    println!("{}", style(path.display()).bold());
    println!("  Generated:    {}", dataset.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "  Range:        {}..={} ({})",
        dataset.start_year,
        dataset.end_year,
        dataset.manufacturers.join(", ")
    );
    println!("  Listings:     {}", style(dataset.listings.len()).cyan());
    println!("  Details:      {}", style(dataset.details.len()).cyan());
    println!("  Missing:      {}", style(missing).yellow());
    println!("  Failed:       {}", style(dataset.failed_details.len()).yellow());

    let failed_queries: Vec<_> = dataset
        .filters
        .iter()
        .filter(|f| f.error.is_some() || f.notice.is_some())
        .collect();
    for f in failed_queries {
        println!(
            "  {} {} {}: {}",
            style("!").yellow(),
            f.manufacturer,
            f.year,
            f.error.as_deref().or(f.notice.as_deref()).unwrap_or_default()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_patch_listings(path: &Path, patch: &Path, combos: &[(String, i32)], pretty: bool) -> anyhow::Result<ExitCode> {
    let mut dataset = load_existing(path)?;
    let patch_dataset = load_existing(patch)?;

    let report = patch_listings(&mut dataset, &patch_dataset, combos);
    JsonDatasetStore::new(path, pretty).save(&dataset)?;

    println!(
        "{} Replaced {} listings with {} from {}; {} listings total",
        style("✓").green(),
        report.removed,
        report.added,
        patch.display(),
        report.listings
    );
    if report.pruned > 0 {
        println!(
            "  {} details or failures dropped with no remaining listing",
            report.pruned
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_delays_are_rejected() {
        assert!(Cli::try_parse_from(["gpu-ladder", "fill-missing", "--detail-delay", "inf"]).is_err());
        assert!(Cli::try_parse_from(["gpu-ladder", "scrape", "--delay", "NaN"]).is_err());
        assert!(Cli::try_parse_from(["gpu-ladder", "retry", "--rate-limit-sleep", "-1"]).is_err());
    }

    #[test]
    fn finite_delays_reach_settings() {
        let cli = Cli::try_parse_from(["gpu-ladder", "fill-missing", "--detail-delay", "0.5"]).unwrap();
        let Commands::FillMissing { fetch, .. } = cli.command else {
            panic!("wrong subcommand");
        };
        let mut settings = Settings::default();
        fetch.apply(&mut settings);
        assert_eq!(settings.detail_delay, std::time::Duration::from_millis(500));
    }
}
