//! Bounded worker pool for detail pages.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};
use url::Url;

use crate::models::{DetailRecord, FailureEntry, FailureKind, FetchStrategy};
use crate::normalize::NormalizedKey;
use crate::parse::parse_detail_document;
use crate::scrapers::{FetchExecutor, FetchRequest};

/// One detail page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTarget {
    pub url: String,
    pub key: NormalizedKey,
    /// Attempts recorded in the ledger by earlier runs.
    pub prior_attempts: u32,
}

impl DetailTarget {
    pub fn new(url: impl Into<String>, key: NormalizedKey, prior_attempts: u32) -> Self {
        Self {
            url: url.into(),
            key,
            prior_attempts,
        }
    }
}

/// Progress events emitted by pool workers.
#[derive(Debug, Clone)]
pub enum DetailEvent {
    /// Emitted once before any worker starts.
    Queued {
        total: usize,
        limit: Option<usize>,
    },
    Started {
        worker_id: usize,
        url: String,
    },
    Completed {
        worker_id: usize,
        url: String,
        via: FetchStrategy,
    },
    Failed {
        worker_id: usize,
        url: String,
        kind: FailureKind,
        error: String,
    },
}

/// Cooperative stop flag. Once raised, workers take no new targets; items
/// already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Results of one pool run.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub details: Vec<DetailRecord>,
    pub failures: Vec<FailureEntry>,
    /// Targets never started because of the cap or a stop.
    pub skipped: usize,
}

impl PoolReport {
    pub fn processed(&self) -> usize {
        self.details.len() + self.failures.len()
    }
}

#[derive(Default)]
struct WorkerOutput {
    details: Vec<DetailRecord>,
    failures: Vec<FailureEntry>,
}

pub struct DetailPool {
    executor: FetchExecutor,
    base_url: Url,
    workers: usize,
    limit: Option<usize>,
    stop: StopSignal,
}

impl DetailPool {
    pub fn new(executor: FetchExecutor, base_url: Url, workers: usize) -> Self {
        Self {
            executor,
            base_url,
            workers: workers.max(1),
            limit: None,
            stop: StopSignal::new(),
        }
    }

    /// Stop admitting targets after `limit` have been started.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Fetch every target with at most `workers` in flight.
    pub async fn run(&self, targets: Vec<DetailTarget>, event_tx: Option<mpsc::Sender<DetailEvent>>) -> PoolReport {
        let total = targets.len();
        if total == 0 {
            return PoolReport::default();
        }

        emit(
            &event_tx,
            DetailEvent::Queued {
                total,
                limit: self.limit,
            },
        )
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        for target in targets {
            // receiver is alive until the workers finish
            let _ = tx.send(target);
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));
        let admitted = Arc::new(AtomicUsize::new(0));
        let limit = self.limit.unwrap_or(usize::MAX);

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers.min(total) {
            let queue = queue.clone();
            let admitted = admitted.clone();
            let stop = self.stop.clone();
            let executor = self.executor.clone();
            let base_url = self.base_url.clone();
            let event_tx = event_tx.clone();

            let handle = tokio::spawn(async move {
                let mut output = WorkerOutput::default();
                loop {
                    // Claim a target
                    let target = {
                        let mut rx = queue.lock().await;
                        if stop.is_stopped() || admitted.load(Ordering::SeqCst) >= limit {
                            break;
                        }
                        match rx.recv().await {
                            Some(t) => {
                                admitted.fetch_add(1, Ordering::SeqCst);
                                t
                            }
                            None => break,
                        }
                    };

                    emit(
                        &event_tx,
                        DetailEvent::Started {
                            worker_id,
                            url: target.url.clone(),
                        },
                    )
                    .await;

                    match fetch_one(&executor, &base_url, &target).await {
                        Ok(record) => {
                            emit(
                                &event_tx,
                                DetailEvent::Completed {
                                    worker_id,
                                    url: target.url.clone(),
                                    via: record.fetched_via,
                                },
                            )
                            .await;
                            output.details.push(record);
                        }
                        Err(failure) => {
                            warn!("Detail fetch failed, skipping {}: {}", target.url, failure.error_detail);
                            emit(
                                &event_tx,
                                DetailEvent::Failed {
                                    worker_id,
                                    url: target.url.clone(),
                                    kind: failure.error_kind,
                                    error: failure.error_detail.clone(),
                                },
                            )
                            .await;
                            output.failures.push(failure);
                        }
                    }
                }
                debug!("Detail worker {} finished", worker_id);
                output
            });
            handles.push(handle);
        }

        let mut report = PoolReport::default();
        for handle in handles {
            match handle.await {
                Ok(output) => {
                    report.details.extend(output.details);
                    report.failures.extend(output.failures);
                }
                Err(e) => error!("Detail worker panicked: {}", e),
            }
        }
        report.skipped = total.saturating_sub(admitted.load(Ordering::SeqCst));
        report
    }
}

async fn emit(event_tx: &Option<mpsc::Sender<DetailEvent>>, event: DetailEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event).await;
    }
}

async fn fetch_one(executor: &FetchExecutor, base_url: &Url, target: &DetailTarget) -> Result<DetailRecord, FailureEntry> {
    let attempt = target.prior_attempts.saturating_add(1);
    let failed = |kind: FailureKind, detail: String| {
        let mut entry = FailureEntry::new(target.url.clone(), kind, detail, attempt, Utc::now());
        entry.normalized_key = target.key.clone();
        entry
    };

    let success = executor
        .fetch(&FetchRequest::detail(target.url.clone()))
        .await
        .map_err(|f| failed(f.kind, f.detail))?;

    Ok(parse_detail_document(&success.body, &target.url, base_url).with_provenance(success.via, Utc::now()))
}
