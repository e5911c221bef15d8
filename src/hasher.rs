//! Step hashing utilities.
//!
//! This module provides the [`StepHasher`] type used to compute a stable
//! SHA-256 digest for a [`Step`]. The build log stores the digest per output
//! so a changed command or input list makes the step stale even when file
//! timestamps look current.
//!
//! # Examples
//!
//! ```
//! use kumiki::hasher::StepHasher;
//! use kumiki::model::TargetId;
//! use kumiki::plan::{Step, StepId, StepKind};
//!
//! let step = Step {
//!     id: StepId::new(0),
//!     kind: StepKind::Extract,
//!     target: "app".into(),
//!     target_id: TargetId::new(0),
//!     inputs: vec!["build/m.p/m.c.o".into()],
//!     outputs: Vec::new(),
//!     deps: Vec::new(),
//!     command: None,
//!     label: "extract".into(),
//!     fresh: false,
//!     prune_outputs: false,
//! };
//! let hash = StepHasher::hash(&step);
//! assert_eq!(hash.len(), 64);
//! ```

use camino::Utf8PathBuf;
use sha2::{Digest, Sha256};

use crate::plan::Step;

/// Computes stable digests for [`Step`] definitions.
pub struct StepHasher;

impl StepHasher {
    /// Calculate the hash of a [`Step`].
    ///
    /// Only the kind, command and file lists contribute; ids, labels and
    /// freshness do not.
    #[must_use]
    pub fn hash(step: &Step) -> String {
        let mut hasher = Sha256::new();
        Self::update_with_len(&mut hasher, step.kind.label().as_bytes());
        match &step.command {
            Some(command) => {
                hasher.update(b"1");
                Self::hash_list(&mut hasher, command.argv.iter().map(String::as_bytes));
            }
            None => hasher.update(b"0"),
        }
        Self::hash_paths(&mut hasher, &step.inputs);
        Self::hash_paths(&mut hasher, &step.outputs);
        format!("{:x}", hasher.finalize())
    }

    fn hash_paths(hasher: &mut Sha256, paths: &[Utf8PathBuf]) {
        Self::hash_list(hasher, paths.iter().map(|p| p.as_str().as_bytes()));
    }

    fn hash_list<'a>(hasher: &mut Sha256, items: impl ExactSizeIterator<Item = &'a [u8]>) {
        let len = items.len();
        hasher.update(format!("[{len}]").as_bytes());
        for item in items {
            Self::update_with_len(hasher, item);
        }
    }

    fn update_with_len(hasher: &mut Sha256, bytes: &[u8]) {
        let len = bytes.len();
        hasher.update(format!("{len}:").as_bytes());
        hasher.update(bytes);
    }
}
