//! Dependency graph of resolved targets.
//!
//! [`BuildGraph`] owns every [`Target`] in declaration order plus the tagged
//! edges between them. Edges point from producer to consumer, so a valid
//! schedule visits every edge's `producer` before its `consumer`. A graph is
//! only ever handed out after cycle detection succeeds.
//!
//! # Examples
//!
//! ```
//! use camino::Utf8Path;
//! use kumiki::{description, graph::BuildGraph};
//!
//! let yaml = "kumiki_version: \"1.0.0\"\ntargets:\n  - name: m\n    kind: static_library\n    sources: m.c\n  - name: app\n    kind: executable\n    sources: main.c\n    link_with: m\n";
//! let description = description::from_str(yaml).expect("description");
//! let graph = BuildGraph::from_description(&description, Utf8Path::new("build")).expect("graph");
//! assert_eq!(graph.edges().len(), 1);
//! ```

mod builder;
pub(crate) mod cycle;
mod relation;

pub use relation::{Relation, RelationKind};

use camino::Utf8PathBuf;
use crate::model::{Target, TargetId};
use indexmap::IndexMap;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// Why one target depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The consumer links the producer's artefact.
    Link,
    /// The consumer reuses some of the producer's objects.
    ObjectExtraction,
    /// A declared dependency, optionally wrapping libraries and objects.
    DeclaredDependency,
}

impl EdgeKind {
    /// Label used in graph exports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::ObjectExtraction => "objects",
            Self::DeclaredDependency => "dependency",
        }
    }
}

/// A directed producer → consumer relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    /// Target that must be handled first.
    pub producer: TargetId,
    /// Target depending on the producer.
    pub consumer: TargetId,
    /// Relation tag.
    pub kind: EdgeKind,
}

/// Errors raised while turning a description into a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum GraphError {
    /// Two targets share a name.
    #[error("target '{name}' is declared more than once")]
    #[diagnostic(code(kumiki::graph::duplicate_target))]
    DuplicateTarget {
        /// Repeated name.
        name: String,
    },

    /// A relation names a target that does not exist.
    #[error("target '{referrer}' references unknown target '{name}' in {relation}")]
    #[diagnostic(
        code(kumiki::graph::unresolved_target),
        help("Declare the target or fix the spelling of the reference.")
    )]
    UnresolvedTarget {
        /// Target holding the reference, or `defaults`.
        referrer: String,
        /// Name that failed to resolve.
        name: String,
        /// Relation the reference appeared in.
        relation: RelationKind,
    },

    /// Two sources of one target would write the same object file.
    #[error("target '{target}' compiles '{first}' and '{second}' into the same object {object}")]
    #[diagnostic(
        code(kumiki::graph::object_collision),
        help("Rename one of the sources or move it into another target.")
    )]
    ObjectCollision {
        /// Target declaring both sources.
        target: String,
        /// Source declared first.
        first: Utf8PathBuf,
        /// Source declared later.
        second: Utf8PathBuf,
        /// Object path both map to.
        object: Utf8PathBuf,
    },

    /// The relations form a cycle.
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(kumiki::graph::cycle),
        help("Break the cycle by removing one of the listed relations.")
    )]
    Cycle {
        /// The closed cycle path, starting and ending at the same target.
        cycle: Vec<String>,
    },

    /// `link_with` names a target that cannot be linked.
    #[error("target '{consumer}' cannot link with {kind} '{producer}'")]
    #[diagnostic(
        code(kumiki::graph::not_linkable),
        help("Only static and shared libraries can appear in link_with.")
    )]
    NotLinkable {
        /// Target holding the `link_with`.
        consumer: String,
        /// Offending target.
        producer: String,
        /// Kind label of the offending target.
        kind: &'static str,
    },
}

/// The resolved, acyclic target graph.
#[derive(Debug, Clone, Serialize)]
pub struct BuildGraph {
    targets: Vec<Target>,
    #[serde(skip)]
    index: IndexMap<String, TargetId>,
    edges: Vec<Edge>,
    defaults: Vec<TargetId>,
}

impl BuildGraph {
    /// All targets in declaration order.
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// The target with id `id`.
    ///
    /// Ids are only minted by the graph itself, so lookups cannot miss for
    /// ids obtained from this graph.
    #[must_use]
    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id.index())
    }

    /// Resolve a target name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TargetId> {
        self.index.get(name).copied()
    }

    /// Name of `id`, or an empty string for a foreign id.
    #[must_use]
    pub fn name(&self, id: TargetId) -> &str {
        self.target(id).map_or("", |t| t.name.as_str())
    }

    /// Every edge, in the order relations were declared.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges whose consumer is `id`.
    pub fn producers_of(&self, id: TargetId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.consumer == id)
    }

    /// Edges whose producer is `id`.
    pub fn consumers_of(&self, id: TargetId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.producer == id)
    }

    /// Targets listed in the description's `defaults`.
    #[must_use]
    pub fn defaults(&self) -> &[TargetId] {
        &self.defaults
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the graph has no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
