//! gpu-ladder command-line entry point.

mod cli;

use std::process::ExitCode;

use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "gpu_ladder=info"
    } else {
        "gpu_ladder=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            cli::exit_code_for(&e)
        }
    }
}
