//! Bounded-concurrency task runner with dispatch spacing and deadlines.
//!
//! [`WorkerPool::run`] is the only place ssokube fans work out. Concurrency
//! is capped by a semaphore, successive dispatches are spaced by
//! `dispatch_delay`, every task runs under `per_task_timeout` and the whole
//! run under `overall_timeout`. When the run deadline passes, in-flight tasks
//! are cancelled at their next await point and tasks that never started are
//! recorded as cancelled.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};

/// Identifies a task in a report independently of completion order.
pub trait TaskKey {
    /// Stable key, e.g. `account/region` or a resource id.
    fn task_key(&self) -> String;
}

/// Terminal outcome of one task.
#[derive(Debug)]
pub struct TaskOutcome<I, O> {
    /// The submitted input.
    pub input: I,
    /// Value or error, never both.
    pub result: Result<O>,
}

impl<I: TaskKey, O> TaskOutcome<I, O> {
    /// Key of the input.
    #[must_use]
    pub fn key(&self) -> String {
        self.input.task_key()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Succeeded, failed and total counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} total",
            self.succeeded, self.failed, self.total
        )
    }
}

/// Every task outcome of a run plus the overall verdict.
#[derive(Debug)]
pub struct AggregateReport<I, O> {
    outcomes: Vec<TaskOutcome<I, O>>,
    timed_out: bool,
}

impl<I: TaskKey, O> AggregateReport<I, O> {
    /// Build a report from outcomes produced elsewhere.
    #[must_use]
    pub fn from_outcomes(outcomes: Vec<TaskOutcome<I, O>>, timed_out: bool) -> Self {
        Self {
            outcomes,
            timed_out,
        }
    }

    /// Append an outcome that was decided without running a task.
    pub fn push(&mut self, outcome: TaskOutcome<I, O>) {
        self.outcomes.push(outcome);
    }

    /// Outcomes in submission order.
    #[must_use]
    pub fn outcomes(&self) -> &[TaskOutcome<I, O>] {
        &self.outcomes
    }

    #[must_use]
    pub fn into_outcomes(self) -> Vec<TaskOutcome<I, O>> {
        self.outcomes
    }

    /// Outcome for the task with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TaskOutcome<I, O>> {
        self.outcomes.iter().find(|o| o.input.task_key() == key)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// True iff at least one task was submitted and every task failed.
    #[must_use]
    pub fn overall_failure(&self) -> bool {
        !self.outcomes.is_empty() && self.succeeded() == 0
    }

    /// Whether the run deadline cut the run short.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            succeeded: self.succeeded(),
            failed: self.failed(),
            total: self.total(),
        }
    }

    /// Successful inputs and their values.
    pub fn successes(&self) -> impl Iterator<Item = (&I, &O)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (&o.input, v)))
    }

    /// Failed inputs and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&I, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.input, e)))
    }
}

/// Runs batches of identical operations under an [`OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: OrchestratorConfig,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `op` once per task and wait until every task is terminal.
    ///
    /// `op` receives the task input and a cancellation token that fires when
    /// the run is cancelled or its deadline passes. Cancelling `cancel`
    /// cancels the run.
    pub async fn run<I, O, F, Fut>(
        &self,
        tasks: Vec<I>,
        cancel: &CancellationToken,
        op: F,
    ) -> AggregateReport<I, O>
    where
        I: TaskKey + Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let total = tasks.len();
        if total == 0 {
            debug!("No tasks to run");
            return AggregateReport::from_outcomes(Vec::new(), false);
        }

        let run_token = cancel.child_token();
        let overall = self.config.overall_timeout();
        let watchdog: JoinHandle<bool> = {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => false,
                    () = sleep(overall) => {
                        warn!(timeout = ?overall, "Run deadline reached, cancelling remaining tasks");
                        token.cancel();
                        true
                    }
                }
            })
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers()));
        let per_task = self.config.per_task_timeout();
        let delay = self.config.dispatch_delay();
        let mut handles: Vec<(usize, JoinHandle<Result<O>>)> = Vec::with_capacity(total);
        let mut last_dispatch: Option<Instant> = None;

        debug!(
            tasks = total,
            max_workers = self.config.max_workers(),
            dispatch_delay = ?delay,
            "Starting run"
        );

        for (idx, input) in tasks.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = run_token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(last) = last_dispatch {
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        () = run_token.cancelled() => break,
                        () = sleep_until(last + delay) => {}
                    }
                }
            }
            last_dispatch = Some(Instant::now());

            debug!(task = %input.task_key(), "Dispatching task");
            let token = run_token.child_token();
            let fut = op(input.clone(), token.clone());
            let handle = tokio::spawn(async move {
                let _permit = permit;
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(Error::Cancelled),
                    result = timeout(per_task, fut) => {
                        result.unwrap_or_else(|_| Err(Error::Timeout(per_task)))
                    }
                }
            });
            handles.push((idx, handle));
        }

        let mut results: Vec<Option<Result<O>>> = (0..total).map(|_| None).collect();
        for (idx, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Internal(format!("task aborted: {e}"))),
            };
            results[idx] = Some(result);
        }

        watchdog.abort();
        let timed_out = matches!(watchdog.await, Ok(true));

        let outcomes: Vec<TaskOutcome<I, O>> = tasks
            .into_iter()
            .zip(results)
            .map(|(input, result)| TaskOutcome {
                input,
                result: result.unwrap_or(Err(Error::Cancelled)),
            })
            .collect();

        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                warn!(task = %outcome.key(), kind = %e.kind(), error = %e, "Task failed");
            }
        }

        let report = AggregateReport::from_outcomes(outcomes, timed_out);
        debug!(summary = %report.summary(), timed_out, "Run finished");
        report
    }
}
