//! Object extraction.
//!
//! Answers which object files a target contributes when another target asks
//! for them. Results are [`ObjectSet`]s, so they are independent of request
//! order and diamond-shared objects appear once.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use thiserror::Error;

use crate::graph::BuildGraph;
use crate::model::{ObjectRequest, ObjectSelection, ObjectSet, Target, TargetId};

/// Errors raised while resolving object requests.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ExtractError {
    /// The selection yields no objects.
    #[error("target '{target}' has no objects to extract")]
    #[diagnostic(
        code(kumiki::extract::empty_object_set),
        help("Add a compiled source to the target or drop the request.")
    )]
    EmptyObjectSet {
        /// Target the objects were requested from.
        target: String,
    },

    /// `extract_objects` names a source the target does not declare.
    #[error("source '{path}' does not belong to target '{target}'")]
    #[diagnostic(code(kumiki::extract::source_not_in_target))]
    SourceNotInTarget {
        /// Target the objects were requested from.
        target: String,
        /// Offending source path.
        path: Utf8PathBuf,
    },
}

/// Resolves object requests against a [`BuildGraph`].
#[derive(Debug, Clone, Copy)]
pub struct ObjectExtractor<'g> {
    graph: &'g BuildGraph,
}

impl<'g> ObjectExtractor<'g> {
    /// Extractor reading from `graph`.
    #[must_use]
    pub const fn new(graph: &'g BuildGraph) -> Self {
        Self { graph }
    }

    /// Objects of `id`.
    ///
    /// Without `recursive` only objects of the target's own sources are
    /// returned. With it, the result also holds every object the target
    /// pulls in through its object requests and, recursively, everything of
    /// the libraries it links with.
    ///
    /// # Errors
    ///
    /// [`ExtractError::EmptyObjectSet`] when the result is empty, and
    /// [`ExtractError::SourceNotInTarget`] when a nested request names a
    /// foreign source.
    pub fn extract(&self, id: TargetId, recursive: bool) -> Result<ObjectSet, ExtractError> {
        let objects = if recursive {
            let mut objects = ObjectSet::new();
            self.collect(id, &mut HashSet::new(), &mut objects)?;
            objects
        } else {
            self.target(id).map(Target::own_objects).unwrap_or_default()
        };
        self.non_empty(id, objects)
    }

    /// Objects compiled from `sources` of target `id`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::SourceNotInTarget`] for any source not declared by
    /// the target and [`ExtractError::EmptyObjectSet`] when none of the
    /// sources yields an object.
    pub fn extract_sources(
        &self,
        id: TargetId,
        sources: &[Utf8PathBuf],
    ) -> Result<ObjectSet, ExtractError> {
        let objects = self.select(id, sources)?;
        self.non_empty(id, objects)
    }

    /// Resolve a single request.
    ///
    /// # Errors
    ///
    /// As [`Self::extract`] and [`Self::extract_sources`].
    pub fn resolve(&self, request: &ObjectRequest) -> Result<ObjectSet, ExtractError> {
        match &request.selection {
            ObjectSelection::All { recursive } => self.extract(request.from, *recursive),
            ObjectSelection::Sources(sources) => self.extract_sources(request.from, sources),
        }
    }

    /// Objects linked into target `id`: its own objects plus those of every
    /// request it declares.
    ///
    /// The result may be empty; callers decide whether that is an error.
    ///
    /// # Errors
    ///
    /// Propagates failures of the individual requests.
    pub fn objects_for(&self, id: TargetId) -> Result<ObjectSet, ExtractError> {
        let Some(target) = self.target(id) else {
            return Ok(ObjectSet::new());
        };
        let mut objects = target.own_objects();
        for request in &target.object_requests {
            objects.extend(self.resolve(request)?);
        }
        Ok(objects)
    }

    fn collect(
        &self,
        id: TargetId,
        visited: &mut HashSet<TargetId>,
        objects: &mut ObjectSet,
    ) -> Result<(), ExtractError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let Some(target) = self.target(id) else {
            return Ok(());
        };
        objects.extend(target.own_objects());
        for request in &target.object_requests {
            match &request.selection {
                ObjectSelection::All { recursive: true } => {
                    self.collect(request.from, visited, objects)?;
                }
                ObjectSelection::All { recursive: false } => {
                    if let Some(from) = self.target(request.from) {
                        objects.extend(from.own_objects());
                    }
                }
                ObjectSelection::Sources(sources) => {
                    objects.extend(self.select(request.from, sources)?);
                }
            }
        }
        for linked in &target.link_with {
            self.collect(*linked, visited, objects)?;
        }
        Ok(())
    }

    fn select(&self, id: TargetId, sources: &[Utf8PathBuf]) -> Result<ObjectSet, ExtractError> {
        let Some(target) = self.target(id) else {
            return Ok(ObjectSet::new());
        };
        let mut objects = ObjectSet::new();
        for path in sources {
            let source = target
                .source(normalise(path))
                .ok_or_else(|| ExtractError::SourceNotInTarget {
                    target: target.name.clone(),
                    path: path.clone(),
                })?;
            if let Some(object) = target.object_ref(source) {
                objects.insert(object);
            }
        }
        Ok(objects)
    }

    fn non_empty(&self, id: TargetId, objects: ObjectSet) -> Result<ObjectSet, ExtractError> {
        if objects.is_empty() {
            return Err(ExtractError::EmptyObjectSet {
                target: self.graph.name(id).to_owned(),
            });
        }
        Ok(objects)
    }

    fn target(&self, id: TargetId) -> Option<&'g Target> {
        self.graph.target(id)
    }
}

fn normalise(path: &Utf8Path) -> &Utf8Path {
    path.strip_prefix("./").unwrap_or(path)
}
