//! Ordered build plans.
//!
//! A [`BuildPlan`] lists every [`Step`] needed to produce the selected
//! targets. Steps are stored in a topological order: each step only depends
//! on steps with a smaller [`StepId`]. The executor may run steps in any
//! order that respects those dependencies.

mod command;
mod scheduler;
mod staleness;

pub use command::CommandLine;
pub use scheduler::{Planner, topological_order};
pub use staleness::{BuildLog, FileProbe, SystemFiles, mark_stale};

use std::fmt;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::graph::GraphError;
use crate::model::TargetId;

/// File name of the build log inside the build directory.
pub const BUILD_LOG_NAME: &str = ".kumiki_log";

/// Dense index of a step within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StepId(usize);

impl StepId {
    /// Wrap a plan index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the step in the plan.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Compile one source into one object.
    Compile,
    /// Gather objects of another target; runs no command.
    Extract,
    /// Archive or link a target's artefact.
    Link,
}

impl StepKind {
    /// Lower-case name of the kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Extract => "extract",
            Self::Link => "link",
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Position in the plan.
    pub id: StepId,
    /// Kind of work.
    pub kind: StepKind,
    /// Name of the target the step belongs to.
    pub target: String,
    /// Id of the target the step belongs to.
    #[serde(skip)]
    pub target_id: TargetId,
    /// Files read by the step.
    pub inputs: Vec<Utf8PathBuf>,
    /// Files written by the step.
    pub outputs: Vec<Utf8PathBuf>,
    /// Steps that must succeed first.
    pub deps: Vec<StepId>,
    /// Command to run; `None` for steps completed without a subprocess.
    pub command: Option<CommandLine>,
    /// Short description for status output.
    pub label: String,
    /// Whether the step can be skipped because its outputs are current.
    pub fresh: bool,
    /// Remove existing outputs before running.
    pub prune_outputs: bool,
}

/// Topologically ordered steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    steps: Vec<Step>,
}

impl BuildPlan {
    /// Wrap steps that are already in topological order with dense ids.
    #[must_use]
    pub const fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// All steps in order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Mutable access for freshness marking.
    pub(crate) fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    /// The step with id `id`.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.index())
    }


    /// Steps that will run a command or complete in-process.
    pub fn pending(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| !s.fresh)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Errors raised while planning.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    /// The target graph is invalid.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// An object request cannot be satisfied.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    /// A toolchain template rendered to something that cannot be split into
    /// arguments.
    #[error("invalid command for target '{target}': {snippet}")]
    #[diagnostic(
        code(kumiki::plan::invalid_command),
        help("Check quoting in the toolchain template.")
    )]
    InvalidCommand {
        /// Target whose step failed to render.
        target: String,
        /// Full rendered command.
        command: String,
        /// Leading part of the command for display.
        snippet: String,
    },

    /// A target has neither objects nor libraries to link.
    #[error("target '{target}' has nothing to link")]
    #[diagnostic(
        code(kumiki::plan::empty_target),
        help("Give the target at least one compiled source or object.")
    )]
    EmptyTarget {
        /// Offending target.
        target: String,
    },

    /// A requested target does not exist.
    #[error("unknown target '{name}'")]
    #[diagnostic(code(kumiki::plan::unknown_target))]
    UnknownTarget {
        /// Name given on the command line.
        name: String,
    },
}
