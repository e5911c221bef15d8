//! Parallel plan execution.
//!
//! [`Executor::run`] walks a [`BuildPlan`] with a pool of scoped worker
//! threads. The coordinating thread owns the scheduling state: it hands ready
//! steps to the workers over a job channel and receives their results on a
//! second channel. A step is only dispatched once every step it depends on
//! has succeeded. Workers share nothing but the plan, the [`Process`]
//! implementation and the append-only [`Ledger`].
//!
//! When the build runs under GNU make, [`Executor::with_jobserver`] makes
//! the pool share make's job slots: the first running step uses the
//! process's implicit slot and every further concurrent step holds a token
//! read from the jobserver until it finishes.
//!
//! A failing step blocks its transitive dependents while independent
//! branches keep building. Fatal failures (a tool that cannot be started,
//! or any failure under [`FailurePolicy::FailFast`]) stop dispatch; steps
//! already running drain and everything else is cancelled.

mod ledger;
mod process;

pub use ledger::{Ledger, LedgerEntry, Outcome};
pub use process::{Invocation, Process, ProcessOutput, SystemProcess};

#[cfg(test)]
pub use process::MockProcess;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::sync::{Mutex, PoisonError, mpsc};

use jobserver::{Acquired, Client, HelperThread};
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BuildConfig, FailurePolicy};
use crate::plan::{BuildPlan, Step, StepId};
use crate::status::StatusReporter;

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The command exited unsuccessfully; `None` when killed by a signal.
    Exit(Option<i32>),
    /// The command could not be started.
    Spawn(String),
    /// Output directories could not be prepared.
    Prepare(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(Some(code)) => write!(f, "exited with status {code}"),
            Self::Exit(None) => f.write_str("was terminated by a signal"),
            Self::Spawn(err) => write!(f, "could not be started: {err}"),
            Self::Prepare(err) => write!(f, "could not prepare its outputs: {err}"),
        }
    }
}

/// A failed step together with what its command printed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("step '{label}' of target '{target}' {cause}")]
#[diagnostic(code(kumiki::exec::step_failed))]
pub struct StepExecutionError {
    /// Failed step.
    pub step: StepId,
    /// Target the step belongs to.
    pub target: String,
    /// Step label.
    pub label: String,
    /// What went wrong.
    pub cause: FailureCause,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl StepExecutionError {
    fn new(step: &Step, cause: FailureCause) -> Self {
        Self {
            step: step.id,
            target: step.target.clone(),
            label: step.label.clone(),
            cause,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A step whose command exited with `code` and printed nothing.
    #[cfg(test)]
    pub(crate) fn exited(step: StepId, target: &str, label: &str, code: Option<i32>) -> Self {
        Self {
            step,
            target: target.to_owned(),
            label: label.to_owned(),
            cause: FailureCause::Exit(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the failure stops all further dispatch under `policy`.
    #[must_use]
    pub const fn is_fatal(&self, policy: FailurePolicy) -> bool {
        match self.cause {
            FailureCause::Spawn(_) | FailureCause::Prepare(_) => true,
            FailureCause::Exit(_) => matches!(policy, FailurePolicy::FailFast),
        }
    }
}

/// Aggregate result of running a plan.
///
/// Step lists are sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Steps that ran, or completed in-process, successfully.
    pub completed: Vec<StepId>,
    /// Steps skipped because they were fresh.
    pub up_to_date: Vec<StepId>,
    /// Every failed step.
    pub failures: Vec<StepExecutionError>,
    /// Steps not run because a prerequisite failed.
    pub blocked: Vec<StepId>,
    /// Steps not run because dispatch stopped.
    pub cancelled: Vec<StepId>,
}

impl BuildReport {
    /// Whether every step succeeded or was up to date.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failures.is_empty() && self.blocked.is_empty() && self.cancelled.is_empty()
    }

    /// Names of targets with at least one failed step, in step order.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !names.contains(&failure.target.as_str()) {
                names.push(&failure.target);
            }
        }
        names
    }

    fn from_ledger(entries: Vec<LedgerEntry>, mut failures: Vec<StepExecutionError>) -> Self {
        let mut report = Self::default();
        for entry in entries {
            let list = match entry.outcome {
                Outcome::Succeeded => &mut report.completed,
                Outcome::UpToDate => &mut report.up_to_date,
                Outcome::Blocked => &mut report.blocked,
                Outcome::Cancelled => &mut report.cancelled,
                Outcome::Failed => continue,
            };
            list.push(entry.step);
        }
        for list in [
            &mut report.completed,
            &mut report.up_to_date,
            &mut report.blocked,
            &mut report.cancelled,
        ] {
            list.sort_unstable();
        }
        failures.sort_by_key(|f| f.step);
        report.failures = failures;
        report
    }
}

/// Runs plans with a bounded worker pool.
pub struct Executor<'a> {
    config: &'a BuildConfig,
    process: &'a dyn Process,
    reporter: &'a dyn StatusReporter,
    jobserver: Option<&'a Client>,
}

impl<'a> Executor<'a> {
    /// Executor spawning commands through `process` and announcing progress
    /// to `reporter`.
    #[must_use]
    pub fn new(
        config: &'a BuildConfig,
        process: &'a dyn Process,
        reporter: &'a dyn StatusReporter,
    ) -> Self {
        Self {
            config,
            process,
            reporter,
            jobserver: None,
        }
    }

    /// Limit concurrency further by the tokens of a make jobserver.
    ///
    /// `--jobs` still caps the pool; the jobserver can only lower it.
    #[must_use]
    pub const fn with_jobserver(mut self, client: &'a Client) -> Self {
        self.jobserver = Some(client);
        self
    }

    /// Run every step of `plan` that is not fresh.
    #[must_use]
    pub fn run(&self, plan: &BuildPlan) -> BuildReport {
        let commands = plan
            .pending()
            .filter(|step| step.command.is_some())
            .count();
        self.reporter.build_started(commands);
        let workers = self.config.jobs.get().min(commands.max(1));
        debug!(steps = plan.len(), commands, workers, "starting build");

        let ledger = Ledger::new();
        let (job_tx, job_queue) = mpsc::channel::<Job>();
        let (event_tx, event_rx) = mpsc::channel::<Event>();
        let job_rx = Mutex::new(job_queue);
        let config = self.config;
        let process = self.process;

        let failures = std::thread::scope(|s| {
            for _ in 0..workers {
                let tx = event_tx.clone();
                let jobs = &job_rx;
                let entries = &ledger;
                s.spawn(move || {
                    loop {
                        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
                        let Ok(Job { id, slot }) = next else {
                            break;
                        };
                        let result = plan
                            .step(id)
                            .map_or(Ok(()), |step| run_step(step, config, process));
                        // Hand the token back before reporting so the
                        // coordinator can reuse it straight away.
                        let implicit = match slot {
                            Slot::Implicit => true,
                            Slot::Local => false,
                            Slot::Token(token) => {
                                drop(token);
                                false
                            }
                        };
                        let outcome = if result.is_ok() {
                            Outcome::Succeeded
                        } else {
                            Outcome::Failed
                        };
                        entries.record(id, outcome);
                        let finished = StepResult {
                            id,
                            result,
                            implicit,
                        };
                        if tx.send(Event::Finished(finished)).is_err() {
                            break;
                        }
                    }
                });
            }
            let tokens = self
                .jobserver
                .and_then(|client| TokenSource::start(client, event_tx.clone()));
            drop(event_tx);
            let mut coordinator = Coordinator::new(plan, &ledger, self.reporter, workers, tokens);
            coordinator.drive(&job_tx, &event_rx, config.policy);
            drop(job_tx);
            coordinator.finish()
        });

        let report = BuildReport::from_ledger(ledger.into_entries(), failures);
        self.reporter.build_finished(&report);
        report
    }
}

/// Job slot held by a running step.
enum Slot {
    /// No jobserver; `--jobs` alone bounds the pool.
    Local,
    /// The slot every jobserver client owns without reading a token.
    Implicit,
    /// A token read from the jobserver, returned when dropped.
    Token(Acquired),
}

struct Job {
    id: StepId,
    slot: Slot,
}

struct StepResult {
    id: StepId,
    result: Result<(), StepExecutionError>,
    implicit: bool,
}

/// Everything the coordinator waits for.
enum Event {
    /// A worker finished a step.
    Finished(StepResult),
    /// The jobserver helper read a token, or failed to.
    Token(io::Result<Acquired>),
}

/// Jobserver tokens read by a helper thread, so the coordinator never
/// blocks on the jobserver pipe while steps are finishing.
struct TokenSource {
    helper: HelperThread,
    spare: Vec<Acquired>,
    requested: bool,
}

impl TokenSource {
    fn start(client: &Client, events: mpsc::Sender<Event>) -> Option<Self> {
        client
            .clone()
            .into_helper_thread(move |token| drop(events.send(Event::Token(token))))
            .inspect_err(|err| warn!("cannot read jobserver tokens, using --jobs only: {err}"))
            .ok()
            .map(|helper| {
                debug!("sharing job slots with the make jobserver");
                Self {
                    helper,
                    spare: Vec::new(),
                    requested: false,
                }
            })
    }
}

/// Scheduling state owned by the coordinating thread.
struct Coordinator<'p> {
    plan: &'p BuildPlan,
    ledger: &'p Ledger,
    reporter: &'p dyn StatusReporter,
    workers: usize,
    tokens: Option<TokenSource>,
    implicit_free: bool,
    waiting_on: Vec<usize>,
    dependents: Vec<Vec<StepId>>,
    resolved: Vec<bool>,
    ready: BTreeSet<StepId>,
    failures: Vec<StepExecutionError>,
}

impl<'p> Coordinator<'p> {
    fn new(
        plan: &'p BuildPlan,
        ledger: &'p Ledger,
        reporter: &'p dyn StatusReporter,
        workers: usize,
        tokens: Option<TokenSource>,
    ) -> Self {
        let mut dependents = vec![Vec::new(); plan.len()];
        let mut waiting_on = Vec::with_capacity(plan.len());
        let mut ready = BTreeSet::new();
        for step in plan.steps() {
            for dep in &step.deps {
                if let Some(list) = dependents.get_mut(dep.index()) {
                    list.push(step.id);
                }
            }
            waiting_on.push(step.deps.len());
            if step.deps.is_empty() {
                ready.insert(step.id);
            }
        }
        Self {
            plan,
            ledger,
            reporter,
            workers,
            tokens,
            implicit_free: true,
            waiting_on,
            dependents,
            resolved: vec![false; plan.len()],
            ready,
            failures: Vec::new(),
        }
    }

    fn drive(
        &mut self,
        jobs: &mpsc::Sender<Job>,
        events: &mpsc::Receiver<Event>,
        policy: FailurePolicy,
    ) {
        let mut in_flight = 0_usize;
        let mut halted = false;
        loop {
            if !halted && !self.dispatch(jobs, &mut in_flight) {
                halted = true;
            }
            if in_flight == 0 {
                break;
            }
            match events.recv() {
                Ok(Event::Finished(finished)) => {
                    in_flight -= 1;
                    if self.finished(finished, policy) {
                        halted = true;
                    }
                }
                Ok(Event::Token(delivered)) => self.token_arrived(delivered),
                Err(_) => {
                    warn!("worker pool stopped unexpectedly");
                    break;
                }
            }
        }
    }

    /// Hand ready steps to idle workers while job slots last. Returns
    /// `false` once the workers are gone.
    fn dispatch(&mut self, jobs: &mpsc::Sender<Job>, in_flight: &mut usize) -> bool {
        let plan = self.plan;
        while *in_flight < self.workers {
            let Some(id) = self.ready.first().copied() else {
                break;
            };
            let Some(step) = plan.step(id) else {
                self.ready.remove(&id);
                continue;
            };
            if step.fresh || step.command.is_none() {
                self.ready.remove(&id);
                let outcome = if step.fresh {
                    Outcome::UpToDate
                } else {
                    Outcome::Succeeded
                };
                self.settle(step, outcome);
                continue;
            }
            let Some(slot) = self.claim_slot() else {
                break;
            };
            self.ready.remove(&id);
            self.reporter.step_started(step);
            if jobs.send(Job { id, slot }).is_err() {
                warn!("worker pool stopped unexpectedly");
                return false;
            }
            *in_flight += 1;
        }
        if self.ready.is_empty()
            && let Some(tokens) = self.tokens.as_mut()
        {
            tokens.spare.clear();
        }
        true
    }

    /// Take a job slot for one more running step. With a jobserver and the
    /// implicit slot busy this asks the helper for a token and returns
    /// `None` until one arrives.
    fn claim_slot(&mut self) -> Option<Slot> {
        let Some(tokens) = self.tokens.as_mut() else {
            return Some(Slot::Local);
        };
        if self.implicit_free {
            self.implicit_free = false;
            return Some(Slot::Implicit);
        }
        if let Some(token) = tokens.spare.pop() {
            return Some(Slot::Token(token));
        }
        if !tokens.requested {
            tokens.helper.request_token();
            tokens.requested = true;
        }
        None
    }

    fn token_arrived(&mut self, delivered: io::Result<Acquired>) {
        let Some(tokens) = self.tokens.as_mut() else {
            return;
        };
        tokens.requested = false;
        match delivered {
            Ok(token) => tokens.spare.push(token),
            Err(err) => {
                warn!("jobserver unavailable, continuing with --jobs only: {err}");
                self.tokens = None;
            }
        }
    }

    /// Record a worker's result, returning whether it stops dispatch.
    fn finished(&mut self, done: StepResult, policy: FailurePolicy) -> bool {
        if done.implicit {
            self.implicit_free = true;
        }
        let plan = self.plan;
        let Some(step) = plan.step(done.id) else {
            return false;
        };
        match done.result {
            Ok(()) => {
                self.reporter.step_finished(step, Outcome::Succeeded);
                self.resolve(done.id, true);
                false
            }
            Err(err) => {
                warn!(step = %done.id, "{err}");
                self.reporter.step_finished(step, Outcome::Failed);
                let fatal = err.is_fatal(policy);
                self.failures.push(err);
                self.resolve(done.id, false);
                fatal
            }
        }
    }

    /// Record an outcome decided without a worker.
    fn settle(&mut self, step: &Step, outcome: Outcome) {
        self.ledger.record(step.id, outcome);
        if step.command.is_some() {
            self.reporter.step_finished(step, outcome);
        }
        self.resolve(step.id, outcome.is_success());
    }

    fn resolve(&mut self, id: StepId, success: bool) {
        if let Some(flag) = self.resolved.get_mut(id.index()) {
            *flag = true;
        }
        let dependents = self.dependents.get(id.index()).cloned().unwrap_or_default();
        if success {
            for dependent in dependents {
                let Some(count) = self.waiting_on.get_mut(dependent.index()) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 && !self.is_resolved(dependent) {
                    self.ready.insert(dependent);
                }
            }
            return;
        }
        let mut stack = dependents;
        while let Some(dependent) = stack.pop() {
            if self.is_resolved(dependent) {
                continue;
            }
            if let Some(flag) = self.resolved.get_mut(dependent.index()) {
                *flag = true;
            }
            self.ready.remove(&dependent);
            self.ledger.record(dependent, Outcome::Blocked);
            if let Some(step) = self.plan.step(dependent) {
                self.reporter.step_finished(step, Outcome::Blocked);
            }
            if let Some(next) = self.dependents.get(dependent.index()) {
                stack.extend(next.iter().copied());
            }
        }
    }

    fn is_resolved(&self, id: StepId) -> bool {
        self.resolved.get(id.index()).copied().unwrap_or(true)
    }

    fn finish(self) -> Vec<StepExecutionError> {
        for step in self.plan.steps() {
            if !self.is_resolved(step.id) {
                self.ledger.record(step.id, Outcome::Cancelled);
                self.reporter.step_finished(step, Outcome::Cancelled);
            }
        }
        self.failures
    }
}

fn run_step(
    step: &Step,
    config: &BuildConfig,
    process: &dyn Process,
) -> Result<(), StepExecutionError> {
    let Some(command) = &step.command else {
        return Ok(());
    };
    prepare_outputs(step, config)
        .map_err(|err| StepExecutionError::new(step, FailureCause::Prepare(err.to_string())))?;
    let invocation = Invocation {
        program: command.program().to_owned(),
        args: command.args().to_vec(),
        cwd: config.root.clone(),
    };
    let output = process
        .run(&invocation)
        .map_err(|err| StepExecutionError::new(step, FailureCause::Spawn(err.to_string())))?;
    if output.success() {
        if !output.stdout.is_empty() {
            debug!(step = %step.id, "{}", output.stdout.trim_end());
        }
        return Ok(());
    }
    let mut err = StepExecutionError::new(step, FailureCause::Exit(output.code));
    err.stdout = output.stdout;
    err.stderr = output.stderr;
    Err(err)
}

/// Create output directories and remove outputs that must be rebuilt from
/// scratch.
fn prepare_outputs(step: &Step, config: &BuildConfig) -> io::Result<()> {
    for output in &step.outputs {
        let path = config.resolve(output);
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        if step.prune_outputs {
            match fs::remove_file(&path) {
                Err(err) if err.kind() != ErrorKind::NotFound => return Err(err),
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
