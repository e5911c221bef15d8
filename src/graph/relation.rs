//! Tagged relation nodes collected during the declare pass.
//!
//! Relations are gathered verbatim from each [`TargetDecl`] before any name is
//! resolved, so targets may reference one another in any order. The link pass
//! then resolves each relation into edges and model references.

use crate::ast::{DependencyDecl, ObjectsDecl, TargetDecl};
use serde::Serialize;
use std::fmt;

/// The description field a relation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `link_with`.
    LinkWith,
    /// `objects`.
    Objects,
    /// `dependencies`.
    Dependencies,
    /// Top-level `defaults`.
    Defaults,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LinkWith => "link_with",
            Self::Objects => "objects",
            Self::Dependencies => "dependencies",
            Self::Defaults => "defaults",
        })
    }
}

/// One unresolved relation of a declared target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation<'a> {
    /// Link with the named library.
    Link(&'a str),
    /// Reuse objects of another target.
    Objects(&'a ObjectsDecl),
    /// A declared dependency: a bare target or a bundle of libraries and
    /// objects.
    Dependency(&'a DependencyDecl),
}

impl<'a> Relation<'a> {
    /// Collect the relations of `decl` in declaration order: `link_with`,
    /// then `objects`, then `dependencies`.
    #[must_use]
    pub fn collect(decl: &'a TargetDecl) -> Vec<Self> {
        let links = decl.link_with.as_slice_vec().into_iter().map(Self::Link);
        let objects = decl.objects.iter().map(Self::Objects);
        let deps = decl.dependencies.iter().map(Self::Dependency);
        links.chain(objects).chain(deps).collect()
    }

    /// Field the relation was declared in.
    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        match self {
            Self::Link(_) => RelationKind::LinkWith,
            Self::Objects(_) => RelationKind::Objects,
            Self::Dependency(_) => RelationKind::Dependencies,
        }
    }
}
