//! Executor tests driven by fake processes.

use super::*;
use crate::model::TargetId;
use crate::plan::{CommandLine, StepKind};
use crate::status::SilentReporter;
use camino::Utf8PathBuf;
use rstest::rstest;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Succeeds unless the program's first argument is listed in `failing`, and
/// remembers every first argument it was asked to run.
#[derive(Default)]
struct FakeProcess {
    failing: Vec<&'static str>,
    seen: Mutex<Vec<String>>,
}

impl FakeProcess {
    fn failing(names: &[&'static str]) -> Self {
        Self {
            failing: names.to_vec(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        let mut seen = self.seen.lock().expect("seen lock").clone();
        seen.sort();
        seen
    }
}

impl Process for FakeProcess {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let name = invocation.args.first().cloned().unwrap_or_default();
        self.seen.lock().expect("seen lock").push(name.clone());
        if self.failing.contains(&name.as_str()) {
            return Ok(ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{name}: error"),
            });
        }
        Ok(ProcessOutput::exited(0))
    }
}

/// Sleeps briefly in every run and remembers the most runs seen at once.
#[derive(Default)]
struct OverlapProcess {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Process for OverlapProcess {
    fn run(&self, _invocation: &Invocation) -> io::Result<ProcessOutput> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ProcessOutput::exited(0))
    }
}

fn step(id: usize, name: &str, deps: &[usize]) -> Step {
    Step {
        id: StepId::new(id),
        kind: StepKind::Compile,
        target: name.trim_end_matches(|c: char| c.is_ascii_digit()).to_owned(),
        target_id: TargetId::new(0),
        inputs: Vec::new(),
        outputs: Vec::new(),
        deps: deps.iter().copied().map(StepId::new).collect(),
        command: Some(CommandLine {
            argv: vec!["tool".into(), name.into()],
            display: format!("tool {name}"),
        }),
        label: name.into(),
        fresh: false,
        prune_outputs: false,
    }
}

fn ids(raw: &[usize]) -> Vec<StepId> {
    raw.iter().copied().map(StepId::new).collect()
}

fn config(jobs: usize) -> BuildConfig {
    BuildConfig::new(".").with_jobs(NonZeroUsize::new(jobs).expect("non-zero jobs"))
}

/// `a` and `b` are independent chains feeding `app`.
fn diamond() -> BuildPlan {
    BuildPlan::new(vec![
        step(0, "a1", &[]),
        step(1, "a2", &[0]),
        step(2, "b1", &[]),
        step(3, "b2", &[2]),
        step(4, "app", &[1, 3]),
    ])
}

#[rstest]
#[case(1)]
#[case(4)]
fn all_steps_run_when_nothing_fails(#[case] jobs: usize) {
    let process = FakeProcess::default();
    let config = config(jobs);
    let report = Executor::new(&config, &process, &SilentReporter).run(&diamond());
    assert!(report.success());
    assert_eq!(report.completed, ids(&[0, 1, 2, 3, 4]));
    assert_eq!(process.seen(), vec!["a1", "a2", "app", "b1", "b2"]);
}

#[rstest]
#[case(1)]
#[case(3)]
fn failure_halts_only_dependents(#[case] jobs: usize) {
    let process = FakeProcess::failing(&["a1"]);
    let config = config(jobs);
    let report = Executor::new(&config, &process, &SilentReporter).run(&diamond());
    assert!(!report.success());
    assert_eq!(report.completed, ids(&[2, 3]));
    assert_eq!(report.blocked, ids(&[1, 4]));
    assert!(report.cancelled.is_empty());
    let [failure] = report.failures.as_slice() else {
        panic!("expected one failure, got {:?}", report.failures);
    };
    assert_eq!(failure.step, StepId::new(0));
    assert_eq!(failure.cause, FailureCause::Exit(Some(1)));
    assert_eq!(failure.stderr, "a1: error");
    assert_eq!(report.failed_targets(), vec!["a"]);
    assert!(!process.seen().contains(&"a2".to_owned()));
}

#[test]
fn fail_fast_drains_and_cancels_the_rest() {
    let process = FakeProcess::failing(&["a1"]);
    let config = config(1).with_policy(FailurePolicy::FailFast);
    let report = Executor::new(&config, &process, &SilentReporter).run(&diamond());
    assert_eq!(report.failures.len(), 1);
    assert!(report.completed.is_empty());
    assert_eq!(report.blocked, ids(&[1, 4]));
    assert_eq!(report.cancelled, ids(&[2, 3]));
    assert_eq!(process.seen(), vec!["a1"]);
}

#[test]
fn spawn_failure_is_fatal() {
    let mut process = MockProcess::new();
    process
        .expect_run()
        .times(1)
        .returning(|_| Err(io::Error::new(ErrorKind::NotFound, "no such tool")));
    let config = config(1);
    let plan = BuildPlan::new(vec![step(0, "a", &[]), step(1, "b", &[])]);
    let report = Executor::new(&config, &process, &SilentReporter).run(&plan);
    let [failure] = report.failures.as_slice() else {
        panic!("expected one failure, got {:?}", report.failures);
    };
    assert!(matches!(failure.cause, FailureCause::Spawn(_)));
    assert!(failure.is_fatal(FailurePolicy::KeepGoing));
    assert_eq!(report.cancelled, ids(&[1]));
}

#[test]
fn fresh_and_extract_steps_skip_the_process() {
    let mut process = MockProcess::new();
    process
        .expect_run()
        .withf(|invocation| invocation.args == ["link"])
        .times(1)
        .returning(|_| Ok(ProcessOutput::exited(0)));
    let mut fresh = step(0, "compile", &[]);
    fresh.fresh = true;
    let mut extract = step(1, "extract", &[0]);
    extract.kind = StepKind::Extract;
    extract.command = None;
    let plan = BuildPlan::new(vec![fresh, extract, step(2, "link", &[0, 1])]);
    let config = config(2);
    let report = Executor::new(&config, &process, &SilentReporter).run(&plan);
    assert!(report.success());
    assert_eq!(report.up_to_date, ids(&[0]));
    assert_eq!(report.completed, ids(&[1, 2]));
}

#[test]
fn archives_are_pruned_and_directories_created() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let stale = root.join("out/libm.a");
    std::fs::create_dir_all(root.join("out")).expect("mkdir");
    std::fs::write(&stale, "old archive").expect("write");

    let mut archive = step(0, "archive", &[]);
    archive.outputs = vec!["out/libm.a".into(), "deep/nested/x.o".into()];
    archive.prune_outputs = true;
    let plan = BuildPlan::new(vec![archive]);

    let expected_cwd = root.clone();
    let mut process = MockProcess::new();
    process
        .expect_run()
        .times(1)
        .returning(move |invocation| {
            assert_eq!(invocation.cwd, expected_cwd);
            assert!(!invocation.cwd.join("out/libm.a").exists());
            assert!(invocation.cwd.join("deep/nested").is_dir());
            Ok(ProcessOutput::exited(0))
        });
    let config = BuildConfig::new(root);
    let report = Executor::new(&config, &process, &SilentReporter).run(&plan);
    assert!(report.success(), "{report:?}");
}

#[test]
fn empty_plan_reports_success() {
    let process = FakeProcess::default();
    let config = config(2);
    let report = Executor::new(&config, &process, &SilentReporter).run(&BuildPlan::default());
    assert!(report.success());
    assert!(report.completed.is_empty());
}

fn independent(count: usize) -> BuildPlan {
    BuildPlan::new((0..count).map(|id| step(id, &format!("s{id}"), &[])).collect())
}

#[rstest]
#[case(0)]
#[case(2)]
fn jobserver_tokens_bound_the_pool(#[case] tokens: usize) {
    let client = jobserver::Client::new(tokens).expect("jobserver pipe");
    let process = OverlapProcess::default();
    let config = config(8);
    let report = Executor::new(&config, &process, &SilentReporter)
        .with_jobserver(&client)
        .run(&independent(8));
    assert!(report.success(), "{report:?}");
    assert_eq!(report.completed.len(), 8);
    // One step may always run on the implicit slot.
    let peak = process.peak.load(Ordering::SeqCst);
    assert!(peak <= tokens + 1, "{peak} steps overlapped with {tokens} token(s)");
    assert_eq!(client.available().expect("token count"), tokens, "tokens leaked");
}

#[test]
fn jobserver_failure_blocks_dependents_and_returns_tokens() {
    let client = jobserver::Client::new(1).expect("jobserver pipe");
    let process = FakeProcess::failing(&["a1"]);
    let config = config(4);
    let report = Executor::new(&config, &process, &SilentReporter)
        .with_jobserver(&client)
        .run(&diamond());
    assert_eq!(report.completed, ids(&[2, 3]));
    assert_eq!(report.blocked, ids(&[1, 4]));
    assert_eq!(client.available().expect("token count"), 1);
}
