//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use tracing::debug;

use gpu_ladder::crawl::StopSignal;
use gpu_ladder::scrapers::ConfirmationSignal;
use gpu_ladder::{Config, Settings};

/// Load the config file (explicit path or discovered) and apply it to the
/// default settings. Relative paths resolve against the file's directory.
pub async fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };
    if let Some(path) = &config.source_path {
        debug!("Using config file {}", path.display());
    }

    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir)?;
    Ok(settings)
}

/// Waits for the operator to press Enter after solving a bot check in the
/// browser window.
pub struct StdinConfirmation;

#[async_trait]
impl ConfirmationSignal for StdinConfirmation {
    async fn wait_for_confirmation(&self, prompt: &str) {
        println!("{} {}", style("?").cyan(), prompt);
        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        })
        .await;
        if let Ok(Err(e)) = read {
            debug!("Could not read confirmation from stdin: {}", e);
        }
    }
}

pub fn confirmation(settings: &Settings) -> Option<Arc<dyn ConfirmationSignal>> {
    settings
        .manual_confirm
        .then(|| Arc::new(StdinConfirmation) as Arc<dyn ConfirmationSignal>)
}

/// First Ctrl-C raises the stop signal so in-flight work can finish and be
/// saved; a second one exits immediately.
pub fn install_interrupt_handler(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!(
            "{} Interrupted; finishing in-flight requests and saving (Ctrl-C again to abort)",
            style("!").yellow()
        );
        stop.stop();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Aborted", style("✗").red());
            std::process::exit(130);
        }
    });
}

/// Parse a `MANUFACTURER:YEAR` pair.
pub fn parse_combo(raw: &str) -> Result<(String, i32), String> {
    let (manufacturer, year) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected MANUFACTURER:YEAR, got '{}'", raw))?;
    let manufacturer = manufacturer.trim();
    if manufacturer.is_empty() {
        return Err(format!("missing manufacturer in '{}'", raw));
    }
    let year = year
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("invalid year in '{}'", raw))?;
    Ok((manufacturer.to_string(), year))
}

/// Parse a non-negative, finite number of seconds.
pub fn parse_seconds(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid number of seconds '{}'", raw))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("seconds must be a finite, non-negative number, got '{}'", raw));
    }
    Ok(value)
}
