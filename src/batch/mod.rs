pub mod progress;
pub mod report;
pub mod retry;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use progress::{Progress, ProgressSnapshot};
pub use report::PerformanceReport;
pub use retry::RetryPolicy;

use crate::cnpj::{self, Cnpj};
use crate::config::EnricherConfig;
use crate::resolver::{EnrichmentRecord, EnrichmentResolver, RecordStatus};
use crate::store::{ResultLine, ResumeStore};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Re-dispatch identifiers a previous run marked as errors.
    pub retry_errors: bool,
    pub progress_interval: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &EnricherConfig, retry_errors: bool) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_pause: config.batch_pause,
            max_concurrency: config.max_concurrency.max(1),
            retry: RetryPolicy::from_config(config),
            retry_errors,
            progress_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub input_lines: usize,
    pub invalid: usize,
    /// Identifiers skipped because an earlier run already decided them.
    pub already_decided: usize,
    pub dispatched: usize,
    pub done: usize,
    pub errors: usize,
    pub left_pending: usize,
    pub interrupted: bool,
    pub duration: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerTally {
    done: usize,
    errors: usize,
}

type SharedQueue = Arc<Mutex<VecDeque<Cnpj>>>;

fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, VecDeque<Cnpj>> {
    match queue.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone)]
struct WorkerContext {
    resolver: Arc<EnrichmentResolver>,
    store: Arc<ResumeStore>,
    progress: Arc<Progress>,
    retry: RetryPolicy,
    run_id: Uuid,
}

/// Feeds pending identifiers to the resolver through a fixed pool of workers.
pub struct BatchOrchestrator {
    resolver: Arc<EnrichmentResolver>,
    store: Arc<ResumeStore>,
    progress: Arc<Progress>,
    settings: BatchSettings,
    run_id: Uuid,
}

impl BatchOrchestrator {
    pub fn new(resolver: Arc<EnrichmentResolver>, store: Arc<ResumeStore>, settings: BatchSettings) -> Self {
        Self {
            resolver,
            store,
            progress: Arc::new(Progress::new()),
            settings,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Validates and de-duplicates the input, recording invalid lines as errors.
    fn prepare_input(&self, raw_input: &[String]) -> Result<(Vec<Cnpj>, usize)> {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut invalid = 0;

        for line in raw_input.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            match cnpj::validate(line) {
                Ok(id) => {
                    if seen.insert(id.clone()) {
                        valid.push(id);
                    }
                }
                Err(e) => {
                    invalid += 1;
                    let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
                    let key = if digits.is_empty() { line.to_string() } else { digits };
                    if self.store.record_error(&key, &e.to_string())? {
                        warn!("[{}] Rejected: {}", key, e);
                        self.progress.add_decided_error();
                    }
                }
            }
        }

        Ok((valid, invalid))
    }

    pub async fn run(&self, raw_input: &[String], cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let (valid, invalid) = self.prepare_input(raw_input)?;
        let pending = self.store.pending(&valid, self.settings.retry_errors);
        let already_decided = valid.len() - pending.len();

        info!(
            "Run {}: {} valid identifiers, {} invalid, {} already decided, {} to process",
            self.run_id,
            valid.len(),
            invalid,
            already_decided,
            pending.len()
        );
        self.progress.add_pending(pending.len());

        let reporter_stop = cancel.child_token();
        let reporter = self
            .progress
            .spawn_reporter(self.settings.progress_interval, reporter_stop.clone());

        let block_count = pending.len().div_ceil(self.settings.batch_size);
        let mut totals = WorkerTally::default();

        for (index, block) in pending.chunks(self.settings.batch_size).enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let block_num = index + 1;
            info!("📦 Block {}/{}: {} identifiers", block_num, block_count, block.len());
            let tally = self.run_block(block, &cancel).await;
            totals.done += tally.done;
            totals.errors += tally.errors;
            info!(
                "Block {} complete: {} done, {} errors",
                block_num, tally.done, tally.errors
            );

            if block_num < block_count && !self.settings.batch_pause.is_zero() {
                info!("⏸️  Waiting {:?} before next block...", self.settings.batch_pause);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.batch_pause) => {}
                }
            }
        }

        reporter_stop.cancel();
        if let Err(e) = reporter.await {
            debug!("Progress reporter ended abnormally: {}", e);
        }

        let interrupted = cancel.is_cancelled();
        let snapshot = self.progress.snapshot();
        if interrupted {
            warn!("Run interrupted, {} identifiers left pending", snapshot.pending);
        }

        Ok(RunSummary {
            run_id: self.run_id,
            input_lines: raw_input.len(),
            invalid,
            already_decided,
            dispatched: pending.len(),
            done: totals.done,
            errors: totals.errors,
            left_pending: snapshot.pending,
            interrupted,
            duration: started.elapsed(),
        })
    }

    async fn run_block(&self, block: &[Cnpj], cancel: &CancellationToken) -> WorkerTally {
        let queue: SharedQueue = Arc::new(Mutex::new(block.iter().cloned().collect()));
        let ctx = WorkerContext {
            resolver: Arc::clone(&self.resolver),
            store: Arc::clone(&self.store),
            progress: Arc::clone(&self.progress),
            retry: self.settings.retry,
            run_id: self.run_id,
        };

        let workers = self.settings.max_concurrency.min(block.len());
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker(
                    worker_id,
                    ctx.clone(),
                    Arc::clone(&queue),
                    cancel.clone(),
                ))
            })
            .collect();

        let mut tally = WorkerTally::default();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(t) => {
                    tally.done += t.done;
                    tally.errors += t.errors;
                }
                Err(e) => error!("Worker task failed: {}", e),
            }
        }
        tally
    }
}

async fn worker(
    worker_id: usize,
    ctx: WorkerContext,
    queue: SharedQueue,
    cancel: CancellationToken,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = lock_queue(&queue).pop_front();
        let Some(id) = next else {
            break;
        };

        ctx.progress.start();
        debug!("Worker {} picked {}", worker_id, id);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = process_one(&ctx, id.clone()) => Some(result),
        };

        match outcome {
            None => {
                ctx.progress.abandon();
                info!("[{}] Interrupted, left pending", id);
                break;
            }
            Some(Ok(RecordStatus::Error)) => {
                ctx.progress.finish_error();
                tally.errors += 1;
            }
            Some(Ok(_)) => {
                ctx.progress.finish_done();
                tally.done += 1;
            }
            Some(Err(e)) => {
                ctx.progress.abandon();
                error!("[{}] Could not persist outcome, left pending: {:#}", id, e);
            }
        }
    }

    tally
}

/// Resolves one identifier with retries and persists the decision.
async fn process_one(ctx: &WorkerContext, id: Cnpj) -> Result<RecordStatus> {
    let mut record = EnrichmentRecord::new(id.clone());
    let mut attempt = 1;

    let resolution = loop {
        let resolution = ctx.resolver.resolve_into(record).await;
        let retryable =
            resolution.record.status() != RecordStatus::Complete && resolution.failures > 0;
        if !retryable || attempt >= ctx.retry.max_attempts {
            break resolution;
        }

        let delay = ctx.retry.jittered_delay();
        warn!(
            "[{}] Attempt {}/{} had {} failed call(s), retrying in {:.1}s",
            id,
            attempt,
            ctx.retry.max_attempts,
            resolution.failures,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        record = resolution.record;
        attempt += 1;
    };

    let status = resolution.record.status();
    if status == RecordStatus::Error {
        let reason = format!(
            "all sources failed after {} attempt(s): {}",
            attempt,
            resolution
                .last_failure
                .as_deref()
                .unwrap_or("no source answered")
        );
        error!("[{}] ❌ {}", id, reason);
        ctx.store.record_error(id.as_str(), &reason)?;
    } else {
        ctx.store
            .record_done(&ResultLine::new(&resolution.record, ctx.run_id))?;
        info!("[{}] ✓ {} after {} attempt(s)", id, status, attempt);
    }

    Ok(status)
}
