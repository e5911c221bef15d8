//! Freshness checks against the build log and file timestamps.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::{BuildPlan, Step, StepKind};
use crate::hasher::StepHasher;

const LOG_VERSION: u32 = 1;

/// Digests of the steps that last produced each output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLog {
    version: u32,
    entries: BTreeMap<Utf8PathBuf, String>,
}

impl Default for BuildLog {
    fn default() -> Self {
        Self {
            version: LOG_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl BuildLog {
    /// Read the log at `path`.
    ///
    /// A missing file yields an empty log. An unreadable or outdated log is
    /// discarded with a warning so the next build simply reruns every step.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than [`ErrorKind::NotFound`].
    pub fn load(path: &Utf8Path) -> io::Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(log) if log.version == LOG_VERSION => Ok(log),
            Ok(log) => {
                tracing::warn!(
                    %path,
                    version = log.version,
                    "ignoring build log with unknown version"
                );
                Ok(Self::default())
            }
            Err(err) => {
                tracing::warn!(%path, error = %err, "ignoring unreadable build log");
                Ok(Self::default())
            }
        }
    }

    /// Write the log to `path`, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while writing.
    pub fn save(&self, path: &Utf8Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, json)
    }

    /// Digest recorded for `output`.
    #[must_use]
    pub fn digest(&self, output: &Utf8Path) -> Option<&str> {
        self.entries.get(output).map(String::as_str)
    }

    /// Record that `step` produced its outputs.
    pub fn record(&mut self, step: &Step) {
        let digest = StepHasher::hash(step);
        for output in &step.outputs {
            self.entries.insert(output.clone(), digest.clone());
        }
    }

    /// Drop entries for the outputs of `step`.
    pub fn forget(&mut self, step: &Step) {
        for output in &step.outputs {
            self.entries.remove(output);
        }
    }

    /// Number of recorded outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of file modification times.
#[cfg_attr(test, mockall::automock)]
pub trait FileProbe {
    /// Modification time of `path`, or `None` when it does not exist.
    fn modified(&self, path: &Utf8Path) -> Option<SystemTime>;
}

/// [`FileProbe`] reading the real file system relative to `root`.
#[derive(Debug, Clone)]
pub struct SystemFiles {
    root: Utf8PathBuf,
}

impl SystemFiles {
    /// Probe resolving relative paths against `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileProbe for SystemFiles {
    fn modified(&self, path: &Utf8Path) -> Option<SystemTime> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        fs::metadata(full).and_then(|m| m.modified()).ok()
    }
}

/// Set [`Step::fresh`] on every step of `plan`.
///
/// A step is fresh when all of its dependencies are fresh and, for steps
/// producing files, every output exists, the log holds the step's current
/// digest for it and no input is newer than the oldest output. `force`
/// marks every step stale.
pub fn mark_stale<P: FileProbe + ?Sized>(
    plan: &mut BuildPlan,
    log: &BuildLog,
    probe: &P,
    force: bool,
) {
    let mut fresh = Vec::with_capacity(plan.len());
    for step in plan.steps_mut() {
        let deps_fresh = step
            .deps
            .iter()
            .all(|dep| fresh.get(dep.index()).copied().unwrap_or(false));
        step.fresh = !force && deps_fresh && is_current(step, log, probe);
        fresh.push(step.fresh);
    }
    let stale = fresh.iter().filter(|f| !**f).count();
    tracing::debug!(steps = fresh.len(), stale, "checked step freshness");
}

fn is_current<P: FileProbe + ?Sized>(step: &Step, log: &BuildLog, probe: &P) -> bool {
    if step.kind == StepKind::Extract {
        return true;
    }
    let digest = StepHasher::hash(step);
    let mut oldest_output: Option<SystemTime> = None;
    for output in &step.outputs {
        if log.digest(output) != Some(digest.as_str()) {
            return false;
        }
        let Some(time) = probe.modified(output) else {
            return false;
        };
        oldest_output = Some(oldest_output.map_or(time, |t| t.min(time)));
    }
    let Some(deadline) = oldest_output else {
        return false;
    };
    step.inputs
        .iter()
        .all(|input| probe.modified(input).is_some_and(|time| time <= deadline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TargetId;
    use crate::plan::{CommandLine, StepId};
    use rstest::{fixture, rstest};
    use std::time::Duration;

    fn step(id: usize, kind: StepKind, input: &str, output: Option<&str>, deps: &[usize]) -> Step {
        Step {
            id: StepId::new(id),
            kind,
            target: "t".into(),
            target_id: TargetId::new(0),
            inputs: vec![input.into()],
            outputs: output.into_iter().map(Utf8PathBuf::from).collect(),
            deps: deps.iter().copied().map(StepId::new).collect(),
            command: (kind != StepKind::Extract).then(|| CommandLine {
                argv: vec!["tool".into(), input.into()],
                display: format!("tool {input}"),
            }),
            label: kind.label().into(),
            fresh: false,
            prune_outputs: false,
        }
    }

    #[fixture]
    fn plan() -> BuildPlan {
        BuildPlan::new(vec![
            step(0, StepKind::Compile, "a.c", Some("a.o"), &[]),
            step(1, StepKind::Extract, "a.o", None, &[0]),
            step(2, StepKind::Link, "a.o", Some("app"), &[0, 1]),
        ])
    }

    fn logged(plan: &BuildPlan) -> BuildLog {
        let mut log = BuildLog::default();
        for step in plan.steps() {
            log.record(step);
        }
        log
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn probe(times: &'static [(&'static str, u64)]) -> MockFileProbe {
        let mut probe = MockFileProbe::new();
        probe.expect_modified().returning(move |path| {
            times
                .iter()
                .find(|(name, _)| *name == path.as_str())
                .map(|(_, secs)| at(*secs))
        });
        probe
    }

    fn freshness(plan: &BuildPlan) -> Vec<bool> {
        plan.steps().iter().map(|s| s.fresh).collect()
    }

    #[rstest]
    fn up_to_date_plan_is_fresh(mut plan: BuildPlan) {
        let log = logged(&plan);
        mark_stale(&mut plan, &log, &probe(&[("a.c", 1), ("a.o", 2), ("app", 3)]), false);
        assert_eq!(freshness(&plan), vec![true, true, true]);
    }

    #[rstest]
    fn newer_source_propagates_to_dependents(mut plan: BuildPlan) {
        let log = logged(&plan);
        mark_stale(&mut plan, &log, &probe(&[("a.c", 5), ("a.o", 2), ("app", 3)]), false);
        assert_eq!(freshness(&plan), vec![false, false, false]);
    }

    #[rstest]
    fn missing_output_is_stale(mut plan: BuildPlan) {
        let log = logged(&plan);
        mark_stale(&mut plan, &log, &probe(&[("a.c", 1), ("a.o", 2)]), false);
        assert_eq!(freshness(&plan), vec![true, true, false]);
    }

    #[rstest]
    fn changed_command_is_stale(mut plan: BuildPlan) {
        let log = logged(&plan);
        if let Some(command) = plan.steps_mut().first_mut().and_then(|s| s.command.as_mut()) {
            command.argv.push("-O2".into());
        }
        mark_stale(&mut plan, &log, &probe(&[("a.c", 1), ("a.o", 2), ("app", 3)]), false);
        assert_eq!(freshness(&plan), vec![false, false, false]);
    }

    #[rstest]
    fn force_marks_everything_stale(mut plan: BuildPlan) {
        let log = logged(&plan);
        mark_stale(&mut plan, &log, &probe(&[("a.c", 1), ("a.o", 2), ("app", 3)]), true);
        assert_eq!(freshness(&plan), vec![false, false, false]);
    }

    #[rstest]
    fn log_round_trips_through_disk(plan: BuildPlan) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("build/.kumiki_log"))
            .expect("utf8 path");
        let mut log = logged(&plan);
        log.save(&path).expect("save");
        assert_eq!(BuildLog::load(&path).expect("load"), log);
        if let Some(step) = plan.steps().first() {
            log.forget(step);
        }
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn corrupt_log_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("log")).expect("utf8 path");
        fs::write(&path, "{not json").expect("write");
        assert!(BuildLog::load(&path).expect("load").is_empty());
    }
}
