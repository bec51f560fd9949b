//! Detail progress display.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gpu_ladder::crawl::DetailEvent;

/// Render pool events either as a progress bar or, with `log_lines`, as one
/// line per started and finished item.
pub fn spawn_detail_progress(mut event_rx: mpsc::Receiver<DetailEvent>, log_lines: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        let mut started = 0usize;
        let mut total = 0usize;
        let mut failed = 0usize;

        while let Some(event) = event_rx.recv().await {
            match event {
                DetailEvent::Queued { total: queued, limit } => {
                    total = limit.map_or(queued, |l| l.min(queued));
                    if !log_lines {
                        let pb = ProgressBar::new(total as u64);
                        if let Ok(s) = ProgressStyle::default_bar()
                            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
                        {
                            pb.set_style(s.progress_chars("#>-"));
                        }
                        bar = Some(pb);
                    }
                }
                DetailEvent::Started { url, .. } => {
                    started += 1;
                    match &bar {
                        Some(pb) => pb.set_message(short_name(&url)),
                        None if log_lines => {
                            println!("[detail] Fetching ({}/{}): {}", started, total, url);
                        }
                        None => {}
                    }
                }
                DetailEvent::Completed { url, via, .. } => match &bar {
                    Some(pb) => pb.inc(1),
                    None if log_lines => println!("[detail] Done ({}): {}", via.as_str(), url),
                    None => {}
                },
                DetailEvent::Failed { url, kind, error, .. } => {
                    failed += 1;
                    match &bar {
                        Some(pb) => {
                            pb.inc(1);
                            pb.set_message(format!("{} failed", failed));
                        }
                        None if log_lines => println!(
                            "{} [detail] Failed ({}): {} | {}",
                            style("!").yellow(),
                            kind,
                            url,
                            error
                        ),
                        None => {}
                    }
                }
            }
        }

        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    })
}

fn short_name(url: &str) -> String {
    let tail = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    tail.chars().take(40).collect()
}
