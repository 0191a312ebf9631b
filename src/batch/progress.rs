use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub errors: usize,
    pub peak_in_progress: usize,
}

/// Live counters for the current run.
#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicUsize,
    pending: AtomicUsize,
    in_progress: AtomicUsize,
    done: AtomicUsize,
    errors: AtomicUsize,
    peak_in_progress: AtomicUsize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
        self.pending.fetch_add(count, Ordering::SeqCst);
    }

    /// Counts an identifier decided without being dispatched.
    pub fn add_decided_error(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        let active = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_progress.fetch_max(active, Ordering::SeqCst);
    }

    pub fn finish_done(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish_error(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns an in-flight identifier to pending.
    pub fn abandon(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            pending: self.pending.load(Ordering::SeqCst),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            done: self.done.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            peak_in_progress: self.peak_in_progress.load(Ordering::SeqCst),
        }
    }

    /// Logs a snapshot every `every` until `stop` fires.
    pub fn spawn_reporter(self: &Arc<Self>, every: Duration, stop: CancellationToken) -> JoinHandle<()> {
        let progress = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let s = progress.snapshot();
                        info!(
                            "📊 Progress: {}/{} decided ({} done, {} errors), {} in progress, {} pending",
                            s.done + s.errors,
                            s.total,
                            s.done,
                            s.errors,
                            s.in_progress,
                            s.pending
                        );
                    }
                }
            }
        })
    }
}
