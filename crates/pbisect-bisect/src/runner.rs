//! Speculative probe scheduler.
//!
//! The run loop takes a worker slot, asks the search state for the next
//! revision and spawns a probe task holding that slot. Each probe builds
//! the revision's workspace, runs the verification command in it and
//! reports the classified outcome straight back into the state. The loop
//! ends when the state emits the first bad revision, when every revision
//! has been tried, or when the caller cancels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pbisect_config::{
    log_runner_debug, log_runner_error, log_runner_info, log_runner_warn, BisectConfig,
};
use pbisect_runtime::workspace::dir_name;
use pbisect_runtime::{CommandExecutor, Materializer, Slot, WorkerPool};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    ActiveProbe, InconclusiveReason, ProbeOutcome, RevisionSequence, SearchState, Stats,
};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Interrupted")]
    Interrupted,

    #[error("Command exited with unexpected status {code} on {revision}")]
    UnexpectedExit { revision: String, code: i32 },

    #[error("A probe task panicked")]
    ProbePanicked,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BisectOutcome {
    Found { revision: String },
    /// Every revision was tried but inconclusive probes left more than one
    /// candidate.
    Unresolved {
        good: String,
        bad: String,
        /// Revisions that may still be the first bad one, `bad` included
        candidates: Vec<String>,
    },
}

/// Receives progress snapshots.
pub type ProgressSink = Arc<dyn Fn(Stats) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Probes running at once
    pub jobs: usize,
    pub seed: u64,
    pub progress_interval: Duration,
    /// Unclassifiable exit statuses end the run
    pub abort_on_unexpected: bool,
    /// Directory receiving `<revision>.log` per probe
    pub log_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&BisectConfig::default())
    }
}

impl From<&BisectConfig> for RunnerConfig {
    fn from(config: &BisectConfig) -> Self {
        Self {
            jobs: config.jobs(),
            seed: config.seed,
            progress_interval: config.progress_interval(),
            abort_on_unexpected: config.abort_on_unexpected,
            log_dir: None,
        }
    }
}

/// Result of one probe task.
struct ProbeReport {
    revision: String,
    outcome: ProbeOutcome,
}

/// Everything a probe task needs.
struct ProbeContext {
    materializer: Materializer,
    executor: Arc<dyn CommandExecutor>,
    command: Vec<String>,
    log_dir: Option<PathBuf>,
}

impl ProbeContext {
    async fn execute(&self, probe: &ActiveProbe) -> ProbeOutcome {
        let workspace = match self
            .materializer
            .build_workspace(&probe.revision, &probe.token)
            .await
        {
            Ok(workspace) => workspace,
            Err(e) if e.is_cancelled() => {
                return ProbeOutcome::Inconclusive(InconclusiveReason::Cancelled)
            }
            Err(e) => {
                log_runner_warn!(
                    "Workspace build failed",
                    revision = probe.revision.as_str(),
                    error = tracing::field::display(&e),
                );
                return ProbeOutcome::Inconclusive(InconclusiveReason::Failed(e.to_string()));
            }
        };

        let log = self
            .log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", dir_name(&probe.revision))));

        match self
            .executor
            .run(&workspace, &self.command, log.as_deref(), &probe.token)
            .await
        {
            Ok(status) => ProbeOutcome::classify(status),
            Err(e) => {
                log_runner_warn!(
                    "Command failed to run",
                    revision = probe.revision.as_str(),
                    error = tracing::field::display(&e),
                );
                ProbeOutcome::Inconclusive(InconclusiveReason::Failed(e.to_string()))
            }
        }
    }
}

async fn run_probe(
    ctx: Arc<ProbeContext>,
    state: Arc<SearchState>,
    probe: ActiveProbe,
    _slot: Slot,
) -> ProbeReport {
    log_runner_debug!(
        "Probe started",
        revision = probe.revision.as_str(),
        index = probe.index,
    );
    let mut outcome = ctx.execute(&probe).await;

    // Narrowing may have excluded this revision while it ran
    if probe.token.is_cancelled() {
        outcome = ProbeOutcome::Inconclusive(InconclusiveReason::Cancelled);
    }

    let reported = match outcome {
        ProbeOutcome::Good => Some(state.report_good(&probe.revision)),
        ProbeOutcome::Bad => Some(state.report_bad(&probe.revision)),
        _ => None,
    };
    if let Some(Err(e)) = reported {
        log_runner_warn!(
            "Result contradicts earlier results",
            revision = probe.revision.as_str(),
            error = tracing::field::display(&e),
        );
    }
    state.finish(&probe);

    log_runner_debug!(
        "Probe finished",
        revision = probe.revision.as_str(),
        outcome = tracing::field::display(&outcome),
    );
    ProbeReport {
        revision: probe.revision,
        outcome,
    }
}

/// Drives a search to completion.
pub struct Runner {
    ctx: Arc<ProbeContext>,
    config: RunnerConfig,
    progress: Option<ProgressSink>,
}

impl Runner {
    /// `command` runs once per probed revision with the workspace as its
    /// working directory.
    pub fn new(
        materializer: Materializer,
        executor: Arc<dyn CommandExecutor>,
        command: Vec<String>,
        config: RunnerConfig,
    ) -> Self {
        let ctx = ProbeContext {
            materializer,
            executor,
            command,
            log_dir: config.log_dir.clone(),
        };
        Self {
            ctx: Arc::new(ctx),
            config,
            progress: None,
        }
    }

    /// Report progress to `sink` at the configured interval.
    pub fn with_progress(mut self, sink: impl Fn(Stats) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Search `revisions` for the first bad one.
    ///
    /// Cancelling `cancel` stops dispatch, kills running probes and returns
    /// [`RunnerError::Interrupted`].
    pub async fn run(
        &self,
        revisions: RevisionSequence,
        cancel: CancellationToken,
    ) -> Result<BisectOutcome, RunnerError> {
        let run_token = cancel.child_token();
        let (state, mut done) = SearchState::new(revisions, self.config.seed, run_token.clone());
        let state = Arc::new(state);
        let pool = WorkerPool::new(self.config.jobs);

        log_runner_info!(
            "Search started",
            revisions = state.revisions().len(),
            jobs = pool.limit(),
            seed = self.config.seed,
        );

        let ticker = self.spawn_ticker(&state, &run_token);
        let mut tasks: JoinSet<ProbeReport> = JoinSet::new();
        let mut dispatching = true;

        let result = loop {
            if !dispatching && tasks.is_empty() {
                break Ok(match done.try_recv() {
                    Ok(revision) => BisectOutcome::Found { revision },
                    Err(_) => unresolved(&state),
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(RunnerError::Interrupted),
                found = &mut done => {
                    break Ok(match found {
                        Ok(revision) => BisectOutcome::Found { revision },
                        Err(_) => unresolved(&state),
                    });
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(report) => {
                        if let Err(e) = self.review(report) {
                            break Err(e);
                        }
                    }
                    Err(e) if e.is_panic() => {
                        log_runner_error!("Probe task panicked", error = tracing::field::display(&e));
                        break Err(RunnerError::ProbePanicked);
                    }
                    Err(_) => {}
                },
                slot = pool.acquire(&run_token), if dispatching => {
                    let Ok(slot) = slot else { continue };
                    match state.next() {
                        Some(probe) => {
                            tasks.spawn(run_probe(self.ctx.clone(), state.clone(), probe, slot));
                        }
                        None => {
                            log_runner_debug!("Every revision handed out", pending = tasks.len());
                            dispatching = false;
                        }
                    }
                }
            }
        };

        // Tear down stragglers
        run_token.cancel();
        tasks.shutdown().await;
        if let Some(ticker) = ticker {
            let _ = ticker.await;
        }
        if let Some(sink) = &self.progress {
            sink(state.stats());
        }

        match &result {
            Ok(BisectOutcome::Found { revision }) => {
                log_runner_info!("Search finished", first_bad = revision.as_str())
            }
            Ok(BisectOutcome::Unresolved { candidates, .. }) => {
                log_runner_warn!("Search unresolved", candidates = candidates.len())
            }
            Err(e) => log_runner_warn!("Search aborted", error = tracing::field::display(e)),
        }
        result
    }

    /// Decide whether a finished probe ends the run.
    fn review(&self, report: ProbeReport) -> Result<(), RunnerError> {
        match report.outcome {
            ProbeOutcome::Unexpected(code) if self.config.abort_on_unexpected => {
                log_runner_error!(
                    "Unexpected exit status",
                    revision = report.revision.as_str(),
                    code = code,
                );
                Err(RunnerError::UnexpectedExit {
                    revision: report.revision,
                    code,
                })
            }
            ProbeOutcome::Unexpected(code) => {
                log_runner_warn!(
                    "Ignoring unexpected exit status",
                    revision = report.revision.as_str(),
                    code = code,
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn spawn_ticker(
        &self,
        state: &Arc<SearchState>,
        token: &CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let sink = self.progress.clone()?;
        let state = state.clone();
        let token = token.clone();
        let every = self.config.progress_interval.max(Duration::from_millis(1));

        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => sink(state.stats()),
                }
            }
        }))
    }
}

fn unresolved(state: &SearchState) -> BisectOutcome {
    let (start, end) = state.interval();
    let revisions = state.revisions();
    BisectOutcome::Unresolved {
        good: revisions[start].to_string(),
        bad: revisions[end].to_string(),
        candidates: revisions.as_slice()[start + 1..=end].to_vec(),
    }
}
