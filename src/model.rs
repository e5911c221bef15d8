//! Target model.
//!
//! In-memory representation of buildable entities after their names have been
//! resolved: each [`Target`] owns its classified sources, the objects those
//! sources compile to, and resolved references to the targets it links with
//! or extracts objects from. Targets are immutable once the graph is built.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

pub use crate::ast::TargetKind;

/// Dense index of a target in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetId(usize);

impl TargetId {
    /// Wrap a declaration index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Declaration index of the target.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source language of a compiled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// C, compiled with the `cc` template.
    C,
    /// C++, compiled with the `cxx` template.
    Cxx,
    /// Assembly, compiled with the `cc` template.
    Assembly,
}

/// What a source file contributes to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// Compiled into one object.
    Compiled(Language),
    /// Already an object file; joins the object set as-is.
    Prebuilt,
    /// Never compiled (headers and other auxiliary files).
    Auxiliary,
}

impl SourceRole {
    /// Classify `path` by its extension.
    ///
    /// # Examples
    /// ```
    /// use camino::Utf8Path;
    /// use kumiki::model::{Language, SourceRole};
    /// assert_eq!(SourceRole::classify(Utf8Path::new("a.cpp")), SourceRole::Compiled(Language::Cxx));
    /// assert_eq!(SourceRole::classify(Utf8Path::new("a.h")), SourceRole::Auxiliary);
    /// ```
    #[must_use]
    pub fn classify(path: &Utf8Path) -> Self {
        match path.extension() {
            Some("c") => Self::Compiled(Language::C),
            Some("cc" | "cpp" | "cxx" | "c++" | "C") => Self::Compiled(Language::Cxx),
            Some("s" | "S" | "asm") => Self::Compiled(Language::Assembly),
            Some("o" | "obj") => Self::Prebuilt,
            _ => Self::Auxiliary,
        }
    }
}

/// One declared source of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    /// Path relative to the description root.
    pub path: Utf8PathBuf,
    /// Contribution to the target.
    pub role: SourceRole,
    /// Object produced or supplied by this source, if any.
    pub object: Option<Utf8PathBuf>,
}

/// A single object file and the target it belongs to.
///
/// Ordering is by owner, then source, so object sets iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectRef {
    /// Name of the target whose source yields the object.
    pub owner: String,
    /// Source the object comes from.
    pub source: Utf8PathBuf,
    /// Object file path.
    pub path: Utf8PathBuf,
}

/// A deduplicated, ordered set of objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ObjectSet(BTreeSet<ObjectRef>);

impl ObjectSet {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Insert one object, returning whether it was new.
    pub fn insert(&mut self, object: ObjectRef) -> bool {
        self.0.insert(object)
    }

    /// Add every object of `other`.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every object of `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Iterate objects in order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectRef> {
        self.0.iter()
    }

    /// Object file paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.0.iter().map(|o| o.path.clone()).collect()
    }
}

impl FromIterator<ObjectRef> for ObjectSet {
    fn from_iter<I: IntoIterator<Item = ObjectRef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ObjectSet {
    type Item = &'a ObjectRef;
    type IntoIter = std::collections::btree_set::Iter<'a, ObjectRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which objects of a target a request selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectSelection {
    /// Every object; `recursive` adds objects the target pulls in.
    All {
        /// Include the transitive union.
        recursive: bool,
    },
    /// Objects compiled from the listed sources only.
    Sources(Vec<Utf8PathBuf>),
}

/// Where an object request was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// The target's own `objects` list.
    Objects,
    /// An `objects` list inside a dependency bundle.
    Dependency,
}

/// A resolved request to reuse another target's objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRequest {
    /// Target supplying the objects.
    pub from: TargetId,
    /// Objects selected.
    pub selection: ObjectSelection,
    /// Declaration site.
    pub origin: RequestOrigin,
}

/// A resolved buildable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Declaration index.
    pub id: TargetId,
    /// Unique name.
    pub name: String,
    /// Artefact kind.
    pub kind: TargetKind,
    /// Declared sources, in order.
    pub sources: Vec<SourceFile>,
    /// Libraries linked in, in link order (including dependency bundles).
    pub link_with: Vec<TargetId>,
    /// Object extraction requests, in declaration order.
    pub object_requests: Vec<ObjectRequest>,
    /// Targets that must be built first without being linked.
    pub order_deps: Vec<TargetId>,
    /// Artefact path relative to the description root.
    pub output: Utf8PathBuf,
}

impl Target {
    /// Objects compiled from, or supplied by, this target's own sources.
    #[must_use]
    pub fn own_objects(&self) -> ObjectSet {
        self.sources
            .iter()
            .filter_map(|source| self.object_ref(source))
            .collect()
    }

    /// The object contributed by `source`, if it contributes one.
    #[must_use]
    pub fn object_ref(&self, source: &SourceFile) -> Option<ObjectRef> {
        source.object.as_ref().map(|path| ObjectRef {
            owner: self.name.clone(),
            source: source.path.clone(),
            path: path.clone(),
        })
    }

    /// Look up a declared source by path.
    #[must_use]
    pub fn source(&self, path: &Utf8Path) -> Option<&SourceFile> {
        self.sources.iter().find(|s| s.path == path)
    }
}

/// Path of the artefact built for a target named `name`.
#[must_use]
pub fn output_path(build_dir: &Utf8Path, name: &str, kind: TargetKind) -> Utf8PathBuf {
    let file = match kind {
        TargetKind::StaticLibrary => format!("lib{name}.a"),
        TargetKind::SharedLibrary => format!("lib{name}.so"),
        TargetKind::Executable => name.to_owned(),
    };
    build_dir.join(file)
}

/// Path of the object compiled from `source` for target `name`.
///
/// Objects live in a per-target private directory so two targets may compile
/// the same source without clashing.
#[must_use]
pub fn object_path(build_dir: &Utf8Path, name: &str, source: &Utf8Path) -> Utf8PathBuf {
    let flattened: String = source
        .as_str()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    build_dir.join(format!("{name}.p")).join(format!("{flattened}.o"))
}

/// Classify `path` and compute its object for target `name`.
#[must_use]
pub fn source_file(build_dir: &Utf8Path, name: &str, path: Utf8PathBuf) -> SourceFile {
    let role = SourceRole::classify(&path);
    let object = match role {
        SourceRole::Compiled(_) => Some(object_path(build_dir, name, &path)),
        SourceRole::Prebuilt => Some(path.clone()),
        SourceRole::Auxiliary => None,
    };
    SourceFile { path, role, object }
}
