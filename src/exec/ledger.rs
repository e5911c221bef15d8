//! Append-only record of finished steps.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::plan::StepId;

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The step ran and succeeded, or completed without a command.
    Succeeded,
    /// The step was skipped because its outputs are current.
    UpToDate,
    /// The step ran and failed.
    Failed,
    /// A prerequisite failed, so the step never ran.
    Blocked,
    /// Dispatch stopped before the step could run.
    Cancelled,
}

impl Outcome {
    /// Whether dependents may proceed.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::UpToDate)
    }
}

/// One ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Finished step.
    pub step: StepId,
    /// How it finished.
    pub outcome: Outcome,
}

/// Completed-step ledger shared between the coordinator and the workers.
///
/// Entries are only ever appended, in completion order.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl Ledger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the outcome of `step`.
    pub fn record(&self, step: StepId, outcome: Outcome) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LedgerEntry { step, outcome });
    }

    /// Consume the ledger, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_appends_are_all_kept() {
        let ledger = Ledger::new();
        std::thread::scope(|s| {
            for worker in 0..4 {
                let ledger = &ledger;
                s.spawn(move || {
                    for n in 0..25 {
                        ledger.record(StepId::new(worker * 25 + n), Outcome::Succeeded);
                    }
                });
            }
        });
        let mut steps: Vec<usize> = ledger.into_entries().iter().map(|e| e.step.index()).collect();
        steps.sort_unstable();
        assert_eq!(steps, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn poisoned_ledger_still_records() {
        let ledger = Ledger::new();
        let poisoned = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = ledger.entries.lock();
                panic!("poison the ledger");
            })
            .join()
        });
        assert!(poisoned.is_err());
        ledger.record(StepId::new(0), Outcome::Failed);
        assert_eq!(
            ledger.into_entries(),
            vec![LedgerEntry {
                step: StepId::new(0),
                outcome: Outcome::Failed,
            }]
        );
    }
}
