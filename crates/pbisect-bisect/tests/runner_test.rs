//! End-to-end runs over an in-memory history.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pbisect_bisect::{BisectOutcome, RevisionSequence, Runner, RunnerConfig, RunnerError, Stats};
use pbisect_cas::{CasStore, LinkMode};
use pbisect_history::{History, MemoryHistory, Snapshot};
use pbisect_runtime::{CommandExecutor, CommandStatus, Materializer, WorkerPool};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Judges a workspace by the number in its `VERSION` file.
struct VersionJudge {
    first_bad: u32,
    skip: HashSet<u32>,
    unexpected: Option<i32>,
    delay: Duration,
    calls: AtomicUsize,
}

impl VersionJudge {
    fn new(first_bad: u32) -> Self {
        Self {
            first_bad,
            skip: HashSet::new(),
            unexpected: None,
            delay: Duration::from_millis(2),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CommandExecutor for VersionJudge {
    async fn run(
        &self,
        cwd: &Path,
        _argv: &[String],
        _output: Option<&Path>,
        cancel: &CancellationToken,
    ) -> pbisect_runtime::Result<CommandStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let version: u32 = std::fs::read_to_string(cwd.join("VERSION"))?
            .trim()
            .parse()
            .unwrap();

        tokio::select! {
            _ = cancel.cancelled() => return Ok(CommandStatus::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let code = if let Some(code) = self.unexpected {
            code
        } else if self.skip.contains(&version) {
            125
        } else if version >= self.first_bad {
            1
        } else {
            0
        };
        Ok(CommandStatus::Exited(code))
    }
}

struct Fixture {
    _temp: TempDir,
    history: Arc<MemoryHistory>,
    cas: Arc<CasStore>,
    run_dir: std::path::PathBuf,
}

fn fixture(n: u32, tweak: impl Fn(u32, Snapshot) -> Snapshot) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let mut history = MemoryHistory::new();
    for i in 0..n {
        let snapshot = Snapshot::new()
            .file("README.md", "shared by every revision")
            .file("VERSION", format!("{i}\n"))
            .executable("bin/check", "#!/bin/sh\n");
        history.push(format!("c{i}"), tweak(i, snapshot)).unwrap();
    }
    Fixture {
        cas: Arc::new(CasStore::new(temp.path().join("cas")).unwrap()),
        run_dir: temp.path().join("bisect/run"),
        history: Arc::new(history),
        _temp: temp,
    }
}

impl Fixture {
    fn materializer(&self) -> Materializer {
        Materializer::new(
            self.cas.clone(),
            self.history.clone() as Arc<dyn History>,
            self.run_dir.clone(),
            WorkerPool::new(8),
            LinkMode::Symlink,
        )
    }

    async fn sequence(&self, good: &str, bad: &str) -> RevisionSequence {
        RevisionSequence::new(self.history.revisions(good, bad).await.unwrap()).unwrap()
    }
}

fn config(jobs: usize) -> RunnerConfig {
    RunnerConfig {
        jobs,
        seed: 1,
        progress_interval: Duration::from_millis(5),
        abort_on_unexpected: true,
        log_dir: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finds_first_bad_revision() {
    for (n, first_bad, jobs) in [(2, 1, 4), (10, 7, 1), (10, 7, 4), (33, 1, 8), (33, 32, 8), (50, 25, 6)] {
        let fx = fixture(n, |_, s| s);
        let judge = Arc::new(VersionJudge::new(first_bad));
        let runner = Runner::new(fx.materializer(), judge.clone(), vec!["judge".into()], config(jobs));

        let seq = fx.sequence("c0", &format!("c{}", n - 1)).await;
        let outcome = runner.run(seq, CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            BisectOutcome::Found {
                revision: format!("c{first_bad}")
            },
            "n={n} first_bad={first_bad} jobs={jobs}"
        );
        assert!(judge.calls.load(Ordering::SeqCst) <= n as usize);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workspaces_share_cas_blobs() {
    let fx = fixture(16, |_, s| s);
    let judge = Arc::new(VersionJudge::new(9));
    let runner = Runner::new(fx.materializer(), judge.clone(), vec!["judge".into()], config(4));

    let seq = fx.sequence("c0", "c15").await;
    runner.run(seq, CancellationToken::new()).await.unwrap();

    // README and bin/check once, plus at most one VERSION per revision
    assert!(fx.cas.fetch_count() <= 16 + 2);
}

#[tokio::test]
async fn test_skipped_revision_leaves_search_unresolved() {
    let fx = fixture(6, |_, s| s);
    let mut judge = VersionJudge::new(3);
    judge.skip.insert(2);
    let runner = Runner::new(fx.materializer(), Arc::new(judge), vec!["judge".into()], config(3));

    let seq = fx.sequence("c0", "c5").await;
    let outcome = runner.run(seq, CancellationToken::new()).await.unwrap();

    assert_eq!(
        outcome,
        BisectOutcome::Unresolved {
            good: "c1".into(),
            bad: "c3".into(),
            candidates: vec!["c2".into(), "c3".into()],
        }
    );
}

#[tokio::test]
async fn test_materialization_failure_is_inconclusive() {
    let fx = {
        let mut fx = fixture(6, |i, s| if i == 3 { s.file("broken.txt", "x") } else { s });
        Arc::get_mut(&mut fx.history).unwrap().fail_reads_for("broken.txt");
        fx
    };
    let runner = Runner::new(
        fx.materializer(),
        Arc::new(VersionJudge::new(3)),
        vec!["judge".into()],
        config(2),
    );

    let seq = fx.sequence("c0", "c5").await;
    let outcome = runner.run(seq, CancellationToken::new()).await.unwrap();

    assert_eq!(
        outcome,
        BisectOutcome::Unresolved {
            good: "c2".into(),
            bad: "c4".into(),
            candidates: vec!["c3".into(), "c4".into()],
        }
    );
}

#[tokio::test]
async fn test_unexpected_exit_aborts_run() {
    let fx = fixture(5, |_, s| s);
    let mut judge = VersionJudge::new(2);
    judge.unexpected = Some(200);
    let runner = Runner::new(fx.materializer(), Arc::new(judge), vec!["judge".into()], config(2));

    let seq = fx.sequence("c0", "c4").await;
    let err = runner.run(seq, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RunnerError::UnexpectedExit { code: 200, .. }));
}

#[tokio::test]
async fn test_unexpected_exit_can_be_ignored() {
    let fx = fixture(5, |_, s| s);
    let mut judge = VersionJudge::new(2);
    judge.unexpected = Some(200);
    let mut cfg = config(2);
    cfg.abort_on_unexpected = false;
    let runner = Runner::new(fx.materializer(), Arc::new(judge), vec!["judge".into()], cfg);

    let seq = fx.sequence("c0", "c4").await;
    let outcome = runner.run(seq, CancellationToken::new()).await.unwrap();
    assert!(matches!(
        outcome,
        BisectOutcome::Unresolved { ref candidates, .. } if candidates.len() == 4
    ));
}

#[tokio::test]
async fn test_interrupt_tears_down_probes() {
    let fx = fixture(20, |_, s| s);
    let mut judge = VersionJudge::new(10);
    judge.delay = Duration::from_secs(30);
    let runner = Runner::new(fx.materializer(), Arc::new(judge), vec!["judge".into()], config(4));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let seq = fx.sequence("c0", "c19").await;
    let err = runner.run(seq, cancel).await.unwrap_err();

    assert!(matches!(err, RunnerError::Interrupted));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_progress_reaches_sink() {
    let fx = fixture(12, |_, s| s);
    let mut judge = VersionJudge::new(5);
    judge.delay = Duration::from_millis(20);
    let seen: Arc<Mutex<Vec<Stats>>> = Arc::default();
    let sink = seen.clone();
    let runner = Runner::new(fx.materializer(), Arc::new(judge), vec!["judge".into()], config(2))
        .with_progress(move |stats| sink.lock().unwrap().push(stats));

    let seq = fx.sequence("c0", "c11").await;
    runner.run(seq, CancellationToken::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|s| s.total == 12));
    assert_eq!(seen.last().unwrap().width, 1);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_real_command_with_captured_output() {
    use pbisect_runtime::ProcessExecutor;

    let fx = fixture(24, |_, s| s);
    let log_dir = fx.run_dir.join("logs");
    let mut cfg = config(4);
    cfg.log_dir = Some(log_dir.clone());

    let script = r#"v=$(cat VERSION); echo "probing $v"; [ "$v" -lt 17 ]"#;
    let runner = Runner::new(
        fx.materializer(),
        Arc::new(ProcessExecutor),
        vec!["sh".into(), "-c".into(), script.into()],
        cfg,
    );

    let seq = fx.sequence("c0", "c23").await;
    let outcome = runner.run(seq, CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        BisectOutcome::Found {
            revision: "c17".into()
        }
    );

    let logs: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
    assert!(!logs.is_empty());
}
