//! Build description Abstract Syntax Tree structures.
//!
//! This module defines the data structures used to represent a parsed build
//! description. They mirror the YAML schema one-to-one and are deserialised
//! with `serde-saphyr`; resolution of names into a graph happens later in
//! [`crate::graph`].
//!
//! ```rust
//! use kumiki::ast::{BuildDescription, TargetKind};
//!
//! let yaml = "kumiki_version: \"1.0.0\"\ntargets:\n  - name: hello\n    kind: executable\n    sources: hello.c";
//! let description: BuildDescription = serde_saphyr::from_str(yaml).expect("parse");
//! assert_eq!(description.targets[0].kind, TargetKind::Executable);
//! ```

use semver::Version;
use serde::{Deserialize, Serialize, de::Deserializer};

/// Top-level structure parsed from a build description file.
///
/// ```yaml
/// kumiki_version: "1.0.0"
/// targets:
///   - name: util
///     kind: static_library
///     sources: [util.c]
///   - name: app
///     kind: executable
///     sources: main.c
///     link_with: util
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDescription {
    /// Semantic version of the description format.
    pub kumiki_version: Version,

    /// Directory receiving objects and artefacts, relative to the description.
    #[serde(default)]
    pub build_dir: Option<String>,

    /// Command templates overriding the built-in toolchain.
    #[serde(default)]
    pub toolchain: ToolchainDecl,

    /// Declared targets in declaration order.
    pub targets: Vec<TargetDecl>,

    /// Names of targets built when no command line target is supplied.
    #[serde(default)]
    pub defaults: Vec<String>,
}

/// Optional command templates; `$in` and `$out` are substituted per step.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolchainDecl {
    /// Compile a C or assembly source into one object.
    pub cc: Option<String>,
    /// Compile a C++ source into one object.
    pub cxx: Option<String>,
    /// Archive objects into a static library.
    pub ar: Option<String>,
    /// Link objects and libraries into an executable.
    pub link: Option<String>,
    /// Link objects and libraries into a shared library.
    pub shared: Option<String>,
}

/// The kind of artefact a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// An `ar` archive of objects.
    #[serde(alias = "static-lib", alias = "static_lib")]
    StaticLibrary,
    /// A dynamically linked library.
    #[serde(alias = "shared-lib", alias = "shared_lib")]
    SharedLibrary,
    /// A linked program.
    Executable,
}

impl TargetKind {
    /// Whether other targets may name this one in `link_with`.
    #[must_use]
    pub const fn is_linkable(self) -> bool {
        matches!(self, Self::StaticLibrary | Self::SharedLibrary)
    }

    /// Short label used in plan listings and graph exports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StaticLibrary => "static-lib",
            Self::SharedLibrary => "shared-lib",
            Self::Executable => "executable",
        }
    }
}

/// A single declared target.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDecl {
    /// Unique target name.
    pub name: String,

    /// Artefact kind.
    pub kind: TargetKind,

    /// Source files relative to the description.
    #[serde(default)]
    pub sources: StringOrList,

    /// Libraries linked into this target, in link order.
    #[serde(default)]
    pub link_with: StringOrList,

    /// Objects extracted from other targets and linked in directly.
    #[serde(default)]
    pub objects: Vec<ObjectsDecl>,

    /// Plain target dependencies or dependency bundles.
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
}

/// An object extraction request.
///
/// Exactly one of `extract_all_objects` or `extract_objects` must be present;
/// the remaining keys are validated against the chosen form.
///
/// ```yaml
/// objects:
///   - extract_all_objects: util
///     recursive: false
///   - extract_objects: util
///     sources: [util/fast.c]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ObjectsDecl {
    /// Every object of `target`, optionally including transitive objects.
    ExtractAll {
        /// Target whose objects are extracted.
        target: String,
        /// Include objects the target itself pulls in.
        recursive: bool,
    },
    /// Only the objects compiled from the named sources of `target`.
    ExtractSources {
        /// Target whose objects are extracted.
        target: String,
        /// Sources selecting the objects.
        sources: Vec<String>,
    },
}

impl ObjectsDecl {
    /// Name of the target the request reads from.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::ExtractAll { target, .. } | Self::ExtractSources { target, .. } => target,
        }
    }
}

impl<'de> Deserialize<'de> for ObjectsDecl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawObjects {
            extract_all_objects: Option<String>,
            extract_objects: Option<String>,
            recursive: Option<bool>,
            sources: Option<StringOrList>,
        }

        let raw = RawObjects::deserialize(deserializer)?;
        match (raw.extract_all_objects, raw.extract_objects) {
            (Some(target), None) => {
                if raw.sources.is_some() {
                    return Err(serde::de::Error::custom(
                        "`sources` is only valid with extract_objects",
                    ));
                }
                Ok(Self::ExtractAll {
                    target,
                    // Matches the usual build-tool default.
                    recursive: raw.recursive.unwrap_or(true),
                })
            }
            (None, Some(target)) => {
                if raw.recursive.is_some() {
                    return Err(serde::de::Error::custom(
                        "`recursive` is only valid with extract_all_objects",
                    ));
                }
                let sources = raw.sources.unwrap_or_default().into_vec();
                if sources.is_empty() {
                    return Err(serde::de::Error::custom(
                        "extract_objects requires at least one entry in `sources`",
                    ));
                }
                Ok(Self::ExtractSources { target, sources })
            }
            (None, None) => Err(serde::de::Error::custom(
                "missing one of extract_all_objects or extract_objects",
            )),
            (Some(_), Some(_)) => Err(serde::de::Error::custom(
                "fields extract_all_objects, extract_objects are mutually exclusive",
            )),
        }
    }
}

/// An entry in a target's `dependencies` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    /// A target that must be built first but is not linked.
    Target(String),
    /// A dependency object wrapping libraries and extracted objects.
    Bundle(DependencyBundle),
}

/// Libraries and objects carried by a declared dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyBundle {
    /// Libraries linked into the consumer.
    #[serde(default)]
    pub link_with: StringOrList,
    /// Objects extracted into the consumer.
    #[serde(default)]
    pub objects: Vec<ObjectsDecl>,
}

/// A helper for fields that accept either a single string or a list of
/// strings.
///
/// Empty values deserialize to `StringOrList::Empty`.
///
/// ```yaml
/// sources: main.c
/// sources:
///   - main.c
///   - util.c
/// ```
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrList {
    /// No value provided.
    #[default]
    Empty,
    /// A single string item.
    String(String),
    /// A list of string items.
    List(Vec<String>),
}

impl StringOrList {
    /// Borrow the items as a vector of string slices.
    #[must_use]
    pub fn as_slice_vec(&self) -> Vec<&str> {
        match self {
            Self::Empty => Vec::new(),
            Self::String(s) => vec![s.as_str()],
            Self::List(v) => v.iter().map(String::as_str).collect(),
        }
    }

    /// Consume the value, returning the items in order.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Empty => Vec::new(),
            Self::String(s) => vec![s],
            Self::List(v) => v,
        }
    }
}
