//! Error types for the runner module.
//!
//! This submodule isolates derive-macro-affected code to scope lint suppressions
//! narrowly. The `unused_assignments` lint fires in some Rust versions due to
//! thiserror/miette derive macro expansion.

// Scoped suppression for version-dependent lint false positives from
// miette/thiserror derive macros. The unused_assignments lint fires in some
// Rust versions but not others, and `#[expect]` fails when it does not fire.
// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use crate::description::DescriptionError;
use crate::graph::GraphError;
use crate::plan::PlanError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a build whose steps failed, or an I/O failure.
pub const EXIT_STEP_FAILURE: u8 = 1;

/// Exit code for a description that cannot be turned into a plan.
pub const EXIT_INVALID_DESCRIPTION: u8 = 2;

/// Errors raised during command execution.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// A command line path is not valid UTF-8.
    #[error("path {} is not valid UTF-8", path.display())]
    #[diagnostic(code(kumiki::runner::path))]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
    },

    /// The description could not be read or parsed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Description(#[from] DescriptionError),

    /// The targets do not form a valid graph.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// No plan could be derived from the graph.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(#[from] PlanError),

    /// One or more steps failed.
    #[error("{count} step(s) failed; affected targets: {targets}")]
    #[diagnostic(
        code(kumiki::runner::steps_failed),
        help("Fix the errors above and run the build again.")
    )]
    StepsFailed {
        /// Number of failed steps.
        count: usize,
        /// Comma separated names of the failed targets.
        targets: String,
    },

    /// Reading or writing build state failed.
    #[error(transparent)]
    #[diagnostic(code(kumiki::runner::io))]
    Io(#[from] anyhow::Error),
}

impl RunnerError {
    /// Process exit code for this error.
    ///
    /// Anything that prevents a plan from being formed exits with
    /// [`EXIT_INVALID_DESCRIPTION`]; failures while running exit with
    /// [`EXIT_STEP_FAILURE`].
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidPath { .. } | Self::Description(_) | Self::Graph(_) | Self::Plan(_) => {
                EXIT_INVALID_DESCRIPTION
            }
            Self::StepsFailed { .. } | Self::Io(_) => EXIT_STEP_FAILURE,
        }
    }
}
