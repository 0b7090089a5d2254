//! `pbisect bisect`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use console::style;
use pbisect_bisect::{BisectOutcome, RevisionSequence, Runner, RunnerConfig, RunnerError};
use pbisect_cas::{CasStore, LinkMode};
use pbisect_config::path::compute_run_id;
use pbisect_config::{log_cli_info, Config};
use pbisect_history::{GitHistory, History};
use pbisect_runtime::{Materializer, ProcessExecutor, WorkerPool};
use tokio_util::sync::CancellationToken;

use crate::progress::Progress;

/// Exit status when inconclusive probes leave several candidates.
const EXIT_UNRESOLVED: u8 = 2;

#[derive(Args, Debug)]
pub struct BisectArgs {
    /// A revision the command passes on
    #[arg(long, value_name = "REV")]
    pub good: String,

    /// A later revision the command fails on
    #[arg(long, value_name = "REV")]
    pub bad: String,

    /// Probes to run at once (default: host parallelism)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub jobs: Option<u32>,

    /// Repository to search (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub repo: Option<PathBuf>,

    /// Probe order seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// How workspace files reference the CAS: symlink or hardlink
    #[arg(long)]
    pub link_mode: Option<LinkMode>,

    /// Delete this run's workspaces afterwards
    #[arg(long)]
    pub clean: bool,

    /// Verification command, run once per probed revision inside its
    /// workspace: 0 = good, 1-127 except 125 = bad, 125 = skip
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

pub async fn run(config: Config, args: BisectArgs) -> Result<ExitCode> {
    let repo = match &args.repo {
        Some(repo) => repo.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let repo = repo
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", repo.display()))?;

    let history = GitHistory::new(&repo);
    let revisions = history
        .revisions(&args.good, &args.bad)
        .await
        .with_context(|| format!("Failed to list revisions {}..{}", args.good, args.bad))?;
    let revisions = RevisionSequence::new(revisions)?;

    let layout = config.layout();
    layout.ensure()?;
    let run_id = compute_run_id(&repo, &args.good, &args.bad);
    let run_dir = layout.run_dir(&run_id);

    let link_mode = match args.link_mode {
        Some(mode) => mode,
        None => config
            .bisect
            .link_mode
            .parse()
            .map_err(|e: String| anyhow!(e))?,
    };

    let cas = Arc::new(CasStore::new(layout.cas_dir()).context("Failed to open CAS")?);
    let materializer = Materializer::new(
        cas,
        Arc::new(history),
        &run_dir,
        WorkerPool::new(config.bisect.provisioning_jobs()),
        link_mode,
    );

    let mut runner_config = RunnerConfig::from(&config.bisect);
    if let Some(jobs) = args.jobs {
        runner_config.jobs = jobs as usize;
    }
    if let Some(seed) = args.seed {
        runner_config.seed = seed;
    }
    if config.bisect.capture_output {
        runner_config.log_dir = Some(layout.logs_dir(&run_id));
    }

    log_cli_info!(
        "Starting search",
        revisions = revisions.len(),
        jobs = runner_config.jobs,
        run_id = run_id.as_str(),
    );
    eprintln!(
        "{} {} revisions between {} and {} with {} jobs",
        style("Bisecting").cyan().bold(),
        revisions.len(),
        short(revisions.good()),
        short(revisions.bad()),
        runner_config.jobs,
    );

    let progress = Progress::new();
    let runner = Runner::new(
        materializer,
        Arc::new(ProcessExecutor),
        args.command.clone(),
        runner_config,
    )
    .with_progress(progress.sink());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = runner.run(revisions, cancel).await;
    progress.finish();

    if args.clean {
        if let Err(e) = std::fs::remove_dir_all(&run_dir) {
            eprintln!("Failed to clean {}: {}", run_dir.display(), e);
        }
    }

    match outcome {
        Ok(BisectOutcome::Found { revision }) => {
            println!("First bad revision: {revision}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(BisectOutcome::Unresolved {
            good,
            bad,
            candidates,
        }) => {
            eprintln!(
                "{} {} candidates between {} and {} could not be narrowed further:",
                style("Unresolved:").yellow().bold(),
                candidates.len(),
                short(&good),
                short(&bad),
            );
            for candidate in &candidates {
                println!("{candidate}");
            }
            Ok(ExitCode::from(EXIT_UNRESOLVED))
        }
        Err(RunnerError::Interrupted) => Err(anyhow!("Interrupted")),
        Err(e) => Err(e.into()),
    }
}

/// Abbreviate full object ids for display.
fn short(revision: &str) -> &str {
    if revision.len() == 40 && revision.bytes().all(|b| b.is_ascii_hexdigit()) {
        &revision[..12]
    } else {
        revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short() {
        assert_eq!(
            short("0123456789abcdef0123456789abcdef01234567"),
            "0123456789ab"
        );
        assert_eq!(short("v1.0"), "v1.0");
        assert_eq!(short("HEAD~3"), "HEAD~3");
    }
}
