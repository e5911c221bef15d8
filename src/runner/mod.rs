//! CLI execution and command dispatch logic.
//!
//! This keeps `main` minimal: every subcommand loads the description, builds
//! the target graph and derives a plan the same way, then either prints,
//! executes or cleans up after it.

mod error;

pub use error::{EXIT_INVALID_DESCRIPTION, EXIT_STEP_FAILURE, RunnerError};

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use jobserver::Client;
use tracing::{debug, info};

use crate::cli::{BuildArgs, Cli, Commands, DescriptionArgs, PlanArgs, StatusMode};
use crate::config::{BuildConfig, FailurePolicy};
use crate::description;
use crate::dot;
use crate::exec::{BuildReport, Executor, SystemProcess};
use crate::graph::BuildGraph;
use crate::plan::{BuildLog, BuildPlan, Planner, SystemFiles, mark_stale};
use crate::status::{IndicatifReporter, LineReporter, SilentReporter, StatusReporter};

/// Execute the parsed [`Cli`] command.
///
/// `jobserver` is the make jobserver inherited from the environment, if any;
/// builds then share its job slots.
///
/// # Errors
///
/// Returns [`RunnerError`] when the description is invalid, a step fails or
/// build state cannot be read or written. [`RunnerError::exit_code`] gives
/// the matching process exit code.
pub fn run(cli: &Cli, jobserver: Option<&Client>) -> Result<(), RunnerError> {
    match &cli.command {
        Commands::Build(args) => handle_build(cli, args, jobserver),
        Commands::Plan(args) => handle_plan(cli, args),
        Commands::Graph(_) => handle_graph(cli),
        Commands::Clean(_) => handle_clean(cli),
    }
}

/// A loaded description with its configuration and graph.
struct Workspace {
    config: BuildConfig,
    graph: BuildGraph,
}

impl Workspace {
    /// Load the description named by the subcommand, honouring
    /// `-C/--directory`.
    ///
    /// Paths inside the description, including the build directory, are
    /// relative to the directory holding the description file.
    fn load(cli: &Cli) -> Result<Self, RunnerError> {
        let args = cli.command.description();
        let path = resolve_description_path(cli, args)?;
        info!(path = %path, "loading build description");
        let loaded = description::from_path(&path)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let ast_json = serde_json::to_string_pretty(&loaded)
                .context("serialising the build description for debug output")?;
            debug!("AST:\n{ast_json}");
        }

        let mut config = BuildConfig::for_description(description_root(&path), &loaded);
        if let Some(dir) = args.build_dir.as_deref() {
            config = config.with_build_dir(utf8(dir)?);
        }
        let graph = BuildGraph::from_description(&loaded, &config.build_dir)?;
        Ok(Self { config, graph })
    }

    fn plan(&self, selection: &[String]) -> Result<BuildPlan, RunnerError> {
        Ok(Planner::new(&self.graph, &self.config).plan(selection)?)
    }

    /// Plan `selection` and mark fresh steps using the build log.
    fn plan_with_freshness(
        &self,
        selection: &[String],
    ) -> Result<(BuildPlan, BuildLog), RunnerError> {
        let mut plan = self.plan(selection)?;
        let log_path = self.config.log_path();
        let log = BuildLog::load(&log_path)
            .with_context(|| format!("reading build log {log_path}"))?;
        let probe = SystemFiles::new(self.config.root.clone());
        mark_stale(&mut plan, &log, &probe, self.config.force);
        Ok((plan, log))
    }
}

/// Join the description path onto `-C/--directory` when one was given.
fn resolve_description_path(cli: &Cli, args: &DescriptionArgs) -> Result<Utf8PathBuf, RunnerError> {
    let base = cli.directory.as_deref().map(utf8).transpose()?.unwrap_or_default();
    Ok(base.join(utf8(&args.file)?))
}

/// Directory the description's relative paths are resolved against.
fn description_root(path: &Utf8Path) -> Utf8PathBuf {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf)
}

fn utf8(path: &Path) -> Result<Utf8PathBuf, RunnerError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|rejected| RunnerError::InvalidPath { path: rejected })
}

fn make_reporter(mode: StatusMode) -> Box<dyn StatusReporter> {
    match mode {
        StatusMode::Lines => Box::new(LineReporter::new()),
        StatusMode::Progress => Box::new(IndicatifReporter::new()),
        StatusMode::Silent => Box::new(SilentReporter),
    }
}

/// Plan, run the stale steps and update the build log.
fn handle_build(
    cli: &Cli,
    args: &BuildArgs,
    jobserver: Option<&Client>,
) -> Result<(), RunnerError> {
    let mut workspace = Workspace::load(cli)?;
    let mut config = workspace.config.with_force(args.force);
    if let Some(jobs) = args.jobs.and_then(NonZeroUsize::new) {
        config = config.with_jobs(jobs);
    }
    if args.fail_fast {
        config = config.with_policy(FailurePolicy::FailFast);
    }
    workspace.config = config;

    let (plan, mut log) = workspace.plan_with_freshness(&args.targets)?;
    let reporter = make_reporter(args.status);
    let mut executor = Executor::new(&workspace.config, &SystemProcess, reporter.as_ref());
    if let Some(client) = jobserver {
        executor = executor.with_jobserver(client);
    }
    let report = executor.run(&plan);

    record_outcomes(&mut log, &plan, &report);
    let log_path = workspace.config.log_path();
    log.save(&log_path)
        .with_context(|| format!("writing build log {log_path}"))?;

    print_failures(&report);
    if report.success() {
        return Ok(());
    }
    Err(RunnerError::StepsFailed {
        count: report.failures.len(),
        targets: report.failed_targets().join(", "),
    })
}

/// Store digests for steps that ran and drop them for steps that failed, so
/// the next build reruns exactly the failed work.
fn record_outcomes(log: &mut BuildLog, plan: &BuildPlan, report: &BuildReport) {
    for step in report.completed.iter().filter_map(|id| plan.step(*id)) {
        log.record(step);
    }
    for step in report.failures.iter().filter_map(|f| plan.step(f.step)) {
        log.forget(step);
    }
}

/// Write each failure with the captured output of its command to stderr.
fn print_failures(report: &BuildReport) {
    let mut stderr = io::stderr().lock();
    for failure in &report.failures {
        drop(writeln!(stderr, "error: {failure}"));
        for stream in [&failure.stdout, &failure.stderr] {
            let trimmed = stream.trim_end();
            if !trimmed.is_empty() {
                drop(writeln!(stderr, "{trimmed}"));
            }
        }
    }
}

/// Print the plan, with freshness, without running anything.
fn handle_plan(cli: &Cli, args: &PlanArgs) -> Result<(), RunnerError> {
    let workspace = Workspace::load(cli)?;
    let (plan, _log) = workspace.plan_with_freshness(&args.targets)?;
    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &plan).context("writing plan as JSON")?;
        writeln!(stdout).context("writing plan")?;
    } else {
        write_plan_listing(&mut stdout, &plan).context("writing plan")?;
    }
    Ok(())
}

/// One line per step: id, freshness, label and prerequisite step ids.
fn write_plan_listing(out: &mut impl Write, plan: &BuildPlan) -> io::Result<()> {
    for step in plan.steps() {
        let state = if step.fresh { "fresh" } else { "stale" };
        write!(out, "{:>4}  {state}  {}", step.id.index(), step.label)?;
        if step.deps.is_empty() {
            writeln!(out)?;
        } else {
            writeln!(out, "  <- {}", step.deps.iter().join(", "))?;
        }
    }
    Ok(())
}

/// Print the target graph as DOT.
fn handle_graph(cli: &Cli) -> Result<(), RunnerError> {
    let workspace = Workspace::load(cli)?;
    write!(io::stdout().lock(), "{}", dot::generate(&workspace.graph)).context("writing graph")?;
    Ok(())
}

/// Remove every output inside the build directory, then the build log.
fn handle_clean(cli: &Cli) -> Result<(), RunnerError> {
    let workspace = Workspace::load(cli)?;
    let everything: Vec<String> = workspace
        .graph
        .targets()
        .iter()
        .map(|target| target.name.clone())
        .collect();
    let plan = workspace.plan(&everything)?;
    let removed = remove_outputs(&workspace.config, &plan)?;
    remove_if_present(&workspace.config.log_path())?;
    writeln!(io::stdout().lock(), "removed {removed} file(s)").context("writing clean summary")?;
    Ok(())
}

/// Delete the plan's outputs that live under the build directory, returning
/// how many existed.
fn remove_outputs(config: &BuildConfig, plan: &BuildPlan) -> Result<usize, RunnerError> {
    let mut removed = 0;
    let outputs = plan
        .steps()
        .iter()
        .flat_map(|step| &step.outputs)
        .filter(|output| output.starts_with(&config.build_dir))
        .unique();
    for output in outputs {
        if remove_if_present(&config.resolve(output))? {
            removed += 1;
        }
    }
    Ok(removed)
}

fn remove_if_present(path: &Utf8Path) -> Result<bool, RunnerError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path, "removed");
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("removing {path}"))
            .into()),
    }
}
