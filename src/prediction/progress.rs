use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Side channel for per-request status. Implementations must not influence
/// the prediction they observe.
pub trait ProgressSink: Send + Sync {
    fn processing(&self, _binomial_name: &str) {}

    fn retry(&self, _binomial_name: &str, _attempt: u32, _max_attempts: u32) {}

    fn finished(&self, _binomial_name: &str, _succeeded: bool) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Logs a `done/total` counter as requests complete.
pub struct TracingProgress {
    total: usize,
    done: AtomicUsize,
    failed: AtomicUsize,
}

impl TracingProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

impl ProgressSink for TracingProgress {
    fn processing(&self, binomial_name: &str) {
        debug!(binomial_name, "message" = "traitement en cours");
    }

    fn retry(&self, binomial_name: &str, attempt: u32, max_attempts: u32) {
        debug!(binomial_name, attempt, max_attempts, "message" = "nouvelle tentative");
    }

    fn finished(&self, binomial_name: &str, succeeded: bool) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        info!(done, total = self.total, binomial_name, succeeded, "message" = "progression");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_finished_and_failed() {
        let progress = TracingProgress::new(3);
        progress.processing("Escherichia coli");
        progress.finished("Escherichia coli", true);
        progress.retry("Bacillus subtilis", 1, 4);
        progress.finished("Bacillus subtilis", false);
        assert_eq!(progress.done(), 2);
        assert_eq!(progress.failed(), 1);
    }
}
