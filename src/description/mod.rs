//! Build description loading helpers.
//!
//! A description is parsed from YAML straight into [`BuildDescription`] and
//! then checked for the structural rules serde cannot express: a supported
//! format version and well-formed target names. Name resolution is left to
//! [`crate::graph`], which needs every target declared before it can link
//! anything.

use crate::ast::BuildDescription;
use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use semver::{Version, VersionReq};
use std::fs;
use thiserror::Error;

mod diagnostics;
mod hints;

pub use diagnostics::{DescriptionSource, map_yaml_error};

/// Description format versions accepted by this release.
pub const SUPPORTED_VERSIONS: &str = "^1";

/// Errors raised while reading or validating a description.
#[derive(Debug, Error, Diagnostic)]
pub enum DescriptionError {
    /// The file could not be read.
    #[error("failed to read build description {path}")]
    #[diagnostic(code(kumiki::description::read))]
    Read {
        /// Path that was attempted.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The YAML did not match the schema.
    #[error("build description parse error")]
    #[diagnostic(code(kumiki::description::parse))]
    Parse {
        /// Source-annotated YAML diagnostic.
        #[source]
        #[diagnostic_source]
        source: Box<dyn Diagnostic + Send + Sync + 'static>,
    },

    /// The declared format version is not supported.
    #[error("unsupported kumiki_version {found}; expected ^1")]
    #[diagnostic(
        code(kumiki::description::version),
        help("Set kumiki_version to a 1.x release, e.g. \"1.0.0\".")
    )]
    UnsupportedVersion {
        /// Version found in the file.
        found: Version,
    },

    /// A target name is empty or contains forbidden characters.
    #[error("target #{index} has invalid name {name:?}")]
    #[diagnostic(
        code(kumiki::description::target_name),
        help("Target names must be non-empty and free of '/', '\\' and whitespace.")
    )]
    InvalidTargetName {
        /// Zero-based position of the target in the file.
        index: usize,
        /// The offending name.
        name: String,
    },
}

/// Parse and validate a description held in memory.
///
/// # Errors
///
/// Returns [`DescriptionError`] when the YAML is malformed or violates the
/// structural rules.
///
/// # Examples
/// ```rust
/// let description = kumiki::description::from_str(
///     "kumiki_version: \"1.0.0\"\ntargets:\n  - name: app\n    kind: executable\n    sources: main.c\n",
/// )
/// .expect("valid description");
/// assert_eq!(description.targets.len(), 1);
/// ```
pub fn from_str(yaml: &str) -> Result<BuildDescription, DescriptionError> {
    from_str_named(yaml, "build description")
}

/// Load and validate a description from `path`.
///
/// # Errors
///
/// Returns [`DescriptionError::Read`] when the file is unreadable, otherwise
/// as [`from_str`].
pub fn from_path(path: impl AsRef<Utf8Path>) -> Result<BuildDescription, DescriptionError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|source| DescriptionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_str_named(&data, path.as_str())
}

fn from_str_named(yaml: &str, name: &str) -> Result<BuildDescription, DescriptionError> {
    let description: BuildDescription =
        serde_saphyr::from_str(yaml).map_err(|e| DescriptionError::Parse {
            source: map_yaml_error(e, &DescriptionSource::from(yaml), name),
        })?;
    validate(&description)?;
    tracing::debug!(
        name,
        targets = description.targets.len(),
        "loaded build description"
    );
    Ok(description)
}

fn validate(description: &BuildDescription) -> Result<(), DescriptionError> {
    let supported = VersionReq::parse(SUPPORTED_VERSIONS).unwrap_or(VersionReq::STAR);
    if !supported.matches(&description.kumiki_version) {
        return Err(DescriptionError::UnsupportedVersion {
            found: description.kumiki_version.clone(),
        });
    }
    for (index, target) in description.targets.iter().enumerate() {
        if !is_valid_target_name(&target.name) {
            return Err(DescriptionError::InvalidTargetName {
                index,
                name: target.name.clone(),
            });
        }
    }
    Ok(())
}

fn is_valid_target_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace())
}
