//! Bounded-concurrency batch runner.
//!
//! Every task is spawned up front and waits on a counting semaphore, so at most
//! `limit` tasks run their work at once. A task's error or panic is logged and
//! recorded as a failure; it never cancels its siblings. `run` returns only
//! after every task has settled, and the success count is folded from the
//! collected outcomes after that barrier.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use autolabel_core::Result;

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    /// Identities of the tasks that failed, in completion order.
    pub failures: Vec<String>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Runs a list of tasks with at most `limit` in flight.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    limit: usize,
}

impl BatchRunner {
    /// Create a runner. A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` over every task and wait for all of them.
    pub async fn run<T, F, Fut>(&self, tasks: Vec<T>, work: F) -> BatchSummary
    where
        T: Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let start = Instant::now();
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let work = Arc::new(work);
        let mut set = JoinSet::new();

        for task in tasks {
            let semaphore = semaphore.clone();
            let work = work.clone();
            set.spawn(async move {
                let identity = task.to_string();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!(task = %identity, "Batch limiter closed before task started");
                        return (identity, false);
                    }
                };

                // Inner spawn isolates panics so the identity is still known.
                let outcome = tokio::spawn(work(task)).await;
                let ok = match outcome {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(task = %identity, error = %e, "Batch task failed");
                        false
                    }
                    Err(join_err) => {
                        error!(task = %identity, error = %join_err, "Batch task panicked");
                        false
                    }
                };
                (identity, ok)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Batch slot aborted");
                    outcomes.push(("<unknown>".to_string(), false));
                }
            }
        }

        let success = outcomes.iter().filter(|(_, ok)| *ok).count();
        let failures: Vec<String> = outcomes
            .into_iter()
            .filter(|(_, ok)| !*ok)
            .map(|(identity, _)| identity)
            .collect();

        info!(
            subsystem = "pipeline",
            component = "batch",
            total,
            success,
            failed = failures.len(),
            concurrency = self.limit,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );

        BatchSummary {
            total,
            success,
            failures,
        }
    }
}
