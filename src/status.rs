//! Build status reporting.
//!
//! The executor announces every step through a [`StatusReporter`]. Reporters
//! are only called from the coordinating thread. [`LineReporter`] writes
//! static numbered lines, [`IndicatifReporter`] draws a progress bar and
//! [`SilentReporter`] stays quiet.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::exec::{BuildReport, Outcome};
use crate::plan::Step;

/// Receives build progress events.
pub trait StatusReporter {
    /// The build is about to run `total` steps.
    fn build_started(&self, total: usize);

    /// `step` was dispatched.
    fn step_started(&self, step: &Step);

    /// `step` reached its final `outcome`.
    fn step_finished(&self, step: &Step, outcome: Outcome);

    /// Every step has been resolved.
    fn build_finished(&self, report: &BuildReport);
}

/// One-line summary of a finished build.
#[must_use]
pub fn summary(report: &BuildReport) -> String {
    let mut line = format!(
        "{} step(s) run, {} up to date",
        report.completed.len(),
        report.up_to_date.len()
    );
    for (count, what) in [
        (report.failures.len(), "failed"),
        (report.blocked.len(), "blocked"),
        (report.cancelled.len(), "cancelled"),
    ] {
        if count > 0 {
            line.push_str(&format!(", {count} {what}"));
        }
    }
    line
}

/// Silent reporter: emits nothing.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl StatusReporter for SilentReporter {
    fn build_started(&self, _total: usize) {}
    fn step_started(&self, _step: &Step) {}
    fn step_finished(&self, _step: &Step, _outcome: Outcome) {}
    fn build_finished(&self, _report: &BuildReport) {}
}

/// Writes `[n/total] label` lines to stderr.
#[derive(Debug, Default)]
pub struct LineReporter {
    total: AtomicUsize,
    started: AtomicUsize,
}

impl LineReporter {
    /// Reporter with nothing counted yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn line(message: &str) {
        // Status output failures must not abort the build.
        drop(writeln!(io::stderr(), "{message}"));
    }
}

impl StatusReporter for LineReporter {
    fn build_started(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn step_started(&self, step: &Step) {
        let current = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        Self::line(&format!("[{current}/{total}] {}", step.label));
    }

    fn step_finished(&self, step: &Step, outcome: Outcome) {
        if outcome == Outcome::Failed {
            Self::line(&format!("FAILED: {}", step.label));
        }
    }

    fn build_finished(&self, report: &BuildReport) {
        Self::line(&summary(report));
    }
}

/// Progress bar reporter backed by `indicatif`.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
}

impl IndicatifReporter {
    /// Reporter drawing to stderr.
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(12));
        let style = ProgressStyle::with_template("[{pos}/{len}] {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for IndicatifReporter {
    fn build_started(&self, total: usize) {
        self.bar.set_length(u64::try_from(total).unwrap_or(u64::MAX));
    }

    fn step_started(&self, step: &Step) {
        self.bar.set_message(step.label.clone());
    }

    fn step_finished(&self, step: &Step, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.bar.inc(1),
            Outcome::Failed => {
                self.bar.inc(1);
                self.bar.println(format!("FAILED: {}", step.label));
            }
            Outcome::UpToDate | Outcome::Blocked | Outcome::Cancelled => {}
        }
    }

    fn build_finished(&self, report: &BuildReport) {
        let message = summary(report);
        if self.bar.is_hidden() {
            drop(writeln!(io::stderr(), "{message}"));
        }
        self.bar.finish_with_message(message);
    }
}
