//! Two-pass construction of [`BuildGraph`] from a description.
//!
//! The *declare* pass allocates a [`TargetId`] for every target in
//! declaration order and classifies its sources. The *link* pass resolves the
//! tagged [`Relation`]s gathered in the first pass into edges and model
//! references, so forward references need no special handling.

use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use super::cycle;
use super::relation::{Relation, RelationKind};
use super::{BuildGraph, Edge, EdgeKind, GraphError};
use crate::ast::{BuildDescription, DependencyDecl, ObjectsDecl, TargetDecl};
use crate::model::{
    self, ObjectRequest, ObjectSelection, RequestOrigin, Target, TargetId,
};

impl BuildGraph {
    /// Resolve `description` into an acyclic graph whose artefacts live under
    /// `build_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] for duplicate names, sources of one target
    /// sharing an object path, unresolved references, cycles (including a
    /// target linking itself) and `link_with` entries naming an executable.
    pub fn from_description(
        description: &BuildDescription,
        build_dir: &Utf8Path,
    ) -> Result<Self, GraphError> {
        let mut builder = GraphBuilder::declare(description, build_dir)?;
        builder.link(description)?;
        builder.finish(description)
    }
}

struct GraphBuilder<'d> {
    targets: Vec<Target>,
    index: IndexMap<String, TargetId>,
    relations: Vec<Vec<Relation<'d>>>,
    edges: Vec<Edge>,
    seen_edges: HashSet<Edge>,
}

impl<'d> GraphBuilder<'d> {
    fn declare(description: &'d BuildDescription, build_dir: &Utf8Path) -> Result<Self, GraphError> {
        let mut index = IndexMap::with_capacity(description.targets.len());
        let mut targets = Vec::with_capacity(description.targets.len());
        let mut relations = Vec::with_capacity(description.targets.len());
        for (position, decl) in description.targets.iter().enumerate() {
            let id = TargetId::new(position);
            if index.insert(decl.name.clone(), id).is_some() {
                return Err(GraphError::DuplicateTarget {
                    name: decl.name.clone(),
                });
            }
            targets.push(declare_target(id, decl, build_dir)?);
            relations.push(Relation::collect(decl));
        }
        tracing::debug!(targets = targets.len(), "declared targets");
        Ok(Self {
            targets,
            index,
            relations,
            edges: Vec::new(),
            seen_edges: HashSet::new(),
        })
    }

    fn link(&mut self, description: &'d BuildDescription) -> Result<(), GraphError> {
        let relations = std::mem::take(&mut self.relations);
        for (position, (decl, target_relations)) in
            description.targets.iter().zip(relations).enumerate()
        {
            let consumer = TargetId::new(position);
            for relation in target_relations {
                self.link_relation(consumer, &decl.name, relation)?;
            }
        }
        Ok(())
    }

    fn link_relation(
        &mut self,
        consumer: TargetId,
        referrer: &str,
        relation: Relation<'d>,
    ) -> Result<(), GraphError> {
        match relation {
            Relation::Link(name) => {
                let producer = self.resolve(name, referrer, RelationKind::LinkWith)?;
                self.add_edge(producer, consumer, EdgeKind::Link);
                self.push_link(consumer, producer);
            }
            Relation::Objects(decl) => {
                let request = self.resolve_request(decl, referrer, RequestOrigin::Objects)?;
                self.add_edge(request.from, consumer, EdgeKind::ObjectExtraction);
                self.push_request(consumer, request);
            }
            Relation::Dependency(DependencyDecl::Target(name)) => {
                let producer = self.resolve(name, referrer, RelationKind::Dependencies)?;
                self.add_edge(producer, consumer, EdgeKind::DeclaredDependency);
                if let Some(target) = self.targets.get_mut(consumer.index())
                    && !target.order_deps.contains(&producer)
                {
                    target.order_deps.push(producer);
                }
            }
            Relation::Dependency(DependencyDecl::Bundle(bundle)) => {
                for name in bundle.link_with.as_slice_vec() {
                    let producer = self.resolve(name, referrer, RelationKind::Dependencies)?;
                    self.add_edge(producer, consumer, EdgeKind::DeclaredDependency);
                    self.push_link(consumer, producer);
                }
                for decl in &bundle.objects {
                    let request =
                        self.resolve_request(decl, referrer, RequestOrigin::Dependency)?;
                    self.add_edge(request.from, consumer, EdgeKind::DeclaredDependency);
                    self.push_request(consumer, request);
                }
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        name: &str,
        referrer: &str,
        relation: RelationKind,
    ) -> Result<TargetId, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnresolvedTarget {
                referrer: referrer.to_owned(),
                name: name.to_owned(),
                relation,
            })
    }

    fn resolve_request(
        &self,
        decl: &ObjectsDecl,
        referrer: &str,
        origin: RequestOrigin,
    ) -> Result<ObjectRequest, GraphError> {
        let relation = match origin {
            RequestOrigin::Objects => RelationKind::Objects,
            RequestOrigin::Dependency => RelationKind::Dependencies,
        };
        let from = self.resolve(decl.target(), referrer, relation)?;
        let selection = match decl {
            ObjectsDecl::ExtractAll { recursive, .. } => ObjectSelection::All {
                recursive: *recursive,
            },
            ObjectsDecl::ExtractSources { sources, .. } => {
                ObjectSelection::Sources(sources.iter().map(Utf8PathBuf::from).collect())
            }
        };
        Ok(ObjectRequest {
            from,
            selection,
            origin,
        })
    }

    fn add_edge(&mut self, producer: TargetId, consumer: TargetId, kind: EdgeKind) {
        let edge = Edge {
            producer,
            consumer,
            kind,
        };
        if self.seen_edges.insert(edge) {
            self.edges.push(edge);
        }
    }

    fn push_link(&mut self, consumer: TargetId, producer: TargetId) {
        if let Some(target) = self.targets.get_mut(consumer.index())
            && !target.link_with.contains(&producer)
        {
            target.link_with.push(producer);
        }
    }

    fn push_request(&mut self, consumer: TargetId, request: ObjectRequest) {
        if let Some(target) = self.targets.get_mut(consumer.index())
            && !target.object_requests.contains(&request)
        {
            target.object_requests.push(request);
        }
    }

    fn finish(self, description: &BuildDescription) -> Result<BuildGraph, GraphError> {
        self.detect_cycles()?;
        self.check_linkable()?;
        let defaults = description
            .defaults
            .iter()
            .map(|name| self.resolve(name, "defaults", RelationKind::Defaults))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            targets = self.targets.len(),
            edges = self.edges.len(),
            "built dependency graph"
        );
        Ok(BuildGraph {
            targets: self.targets,
            index: self.index,
            edges: self.edges,
            defaults,
        })
    }

    fn detect_cycles(&self) -> Result<(), GraphError> {
        let name = |id: TargetId| self.targets.get(id.index()).map_or("", |t| t.name.as_str());
        cycle::check_edges(self.targets.len(), &self.edges, name)
    }

    fn check_linkable(&self) -> Result<(), GraphError> {
        for target in &self.targets {
            for producer in &target.link_with {
                let Some(linked) = self.targets.get(producer.index()) else {
                    continue;
                };
                if !linked.kind.is_linkable() {
                    return Err(GraphError::NotLinkable {
                        consumer: target.name.clone(),
                        producer: linked.name.clone(),
                        kind: linked.kind.label(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn declare_target(
    id: TargetId,
    decl: &TargetDecl,
    build_dir: &Utf8Path,
) -> Result<Target, GraphError> {
    let sources: Vec<_> = decl
        .sources
        .as_slice_vec()
        .into_iter()
        .map(|path| model::source_file(build_dir, &decl.name, Utf8PathBuf::from(path)))
        .collect();
    let mut producers: HashMap<&Utf8Path, &Utf8Path> = HashMap::new();
    for source in &sources {
        let Some(object) = source.object.as_deref() else {
            continue;
        };
        if let Some(first) = producers.insert(object, &source.path) {
            return Err(GraphError::ObjectCollision {
                target: decl.name.clone(),
                first: first.to_owned(),
                second: source.path.clone(),
                object: object.to_owned(),
            });
        }
    }
    Ok(Target {
        id,
        name: decl.name.clone(),
        kind: decl.kind,
        sources,
        link_with: Vec::new(),
        object_requests: Vec::new(),
        order_deps: Vec::new(),
        output: model::output_path(build_dir, &decl.name, decl.kind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description;
    use rstest::rstest;

    fn graph(targets: &str) -> Result<BuildGraph, GraphError> {
        let yaml = format!("kumiki_version: \"1.0.0\"\ntargets:\n{targets}");
        let description = description::from_str(&yaml).expect("description");
        BuildGraph::from_description(&description, Utf8Path::new("build"))
    }

    #[test]
    fn forward_references_resolve() {
        let graph = graph(concat!(
            "  - name: app\n    kind: executable\n    sources: main.c\n    link_with: util\n",
            "  - name: util\n    kind: static_library\n    sources: util.c\n",
        ))
        .expect("graph");
        let app = graph.lookup("app").expect("app");
        let util = graph.lookup("util").expect("util");
        assert_eq!(
            graph.edges(),
            &[Edge {
                producer: util,
                consumer: app,
                kind: EdgeKind::Link,
            }]
        );
        assert_eq!(graph.target(app).map(|t| t.link_with.clone()), Some(vec![util]));
    }

    #[test]
    fn self_link_is_a_cycle() {
        let err = graph("  - name: a\n    kind: static_library\n    sources: a.c\n    link_with: a\n")
            .expect_err("cycle");
        assert_eq!(
            err,
            GraphError::Cycle {
                cycle: vec!["a".into(), "a".into()],
            }
        );
    }

    #[test]
    fn transitive_cycle_reports_full_path() {
        let err = graph(concat!(
            "  - name: b\n    kind: static_library\n    sources: b.c\n    link_with: c\n",
            "  - name: c\n    kind: static_library\n    sources: c.c\n    dependencies: [a]\n",
            "  - name: a\n    kind: static_library\n    sources: a.c\n",
            "    objects:\n      - extract_all_objects: b\n",
        ))
        .expect_err("cycle");
        assert_eq!(
            err,
            GraphError::Cycle {
                cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            }
        );
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
    }

    #[rstest]
    #[case("    link_with: ghost\n", RelationKind::LinkWith)]
    #[case("    objects:\n      - extract_all_objects: ghost\n", RelationKind::Objects)]
    #[case("    dependencies: [ghost]\n", RelationKind::Dependencies)]
    #[case(
        "    dependencies:\n      - objects:\n          - extract_all_objects: ghost\n",
        RelationKind::Dependencies
    )]
    fn unresolved_references_name_relation(#[case] relation: &str, #[case] kind: RelationKind) {
        let err = graph(&format!(
            "  - name: app\n    kind: executable\n    sources: main.c\n{relation}"
        ))
        .expect_err("unresolved");
        assert_eq!(
            err,
            GraphError::UnresolvedTarget {
                referrer: "app".into(),
                name: "ghost".into(),
                relation: kind,
            }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = graph(concat!(
            "  - name: a\n    kind: executable\n    sources: a.c\n",
            "  - name: a\n    kind: executable\n    sources: b.c\n",
        ))
        .expect_err("duplicate");
        assert_eq!(err, GraphError::DuplicateTarget { name: "a".into() });
    }

    #[rstest]
    #[case("[src/a.c, src_a.c]", "src/a.c", "src_a.c", "build/t.p/src_a.c.o")]
    #[case("[a.c, a.c]", "a.c", "a.c", "build/t.p/a.c.o")]
    #[case("[blob.o, blob.o]", "blob.o", "blob.o", "blob.o")]
    fn sources_sharing_an_object_are_rejected(
        #[case] sources: &str,
        #[case] first: &str,
        #[case] second: &str,
        #[case] object: &str,
    ) {
        let err = graph(&format!(
            "  - name: t\n    kind: static_library\n    sources: {sources}\n"
        ))
        .expect_err("collision");
        assert_eq!(
            err,
            GraphError::ObjectCollision {
                target: "t".into(),
                first: first.into(),
                second: second.into(),
                object: object.into(),
            }
        );
    }

    #[test]
    fn same_source_in_two_targets_is_fine() {
        let graph = graph(concat!(
            "  - name: a\n    kind: static_library\n    sources: src/x.c\n",
            "  - name: b\n    kind: static_library\n    sources: src/x.c\n",
        ))
        .expect("graph");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn linking_an_executable_is_rejected() {
        let err = graph(concat!(
            "  - name: tool\n    kind: executable\n    sources: tool.c\n",
            "  - name: app\n    kind: executable\n    sources: app.c\n    link_with: tool\n",
        ))
        .expect_err("not linkable");
        assert!(matches!(err, GraphError::NotLinkable { .. }), "{err:?}");
    }

    #[test]
    fn dependency_bundles_become_links_and_requests() {
        let graph = graph(concat!(
            "  - name: m\n    kind: static_library\n    sources: m.c\n",
            "  - name: o\n    kind: static_library\n    sources: [o1.c, o2.c]\n",
            "  - name: app\n    kind: executable\n    sources: main.c\n",
            "    dependencies:\n",
            "      - link_with: m\n",
            "        objects:\n",
            "          - extract_objects: o\n",
            "            sources: o2.c\n",
        ))
        .expect("graph");
        let app = graph.lookup("app").and_then(|id| graph.target(id)).expect("app");
        let m = graph.lookup("m").expect("m");
        let o = graph.lookup("o").expect("o");
        assert_eq!(app.link_with, vec![m]);
        assert_eq!(
            app.object_requests,
            vec![ObjectRequest {
                from: o,
                selection: ObjectSelection::Sources(vec!["o2.c".into()]),
                origin: RequestOrigin::Dependency,
            }]
        );
        assert!(
            graph
                .producers_of(app.id)
                .all(|e| e.kind == EdgeKind::DeclaredDependency)
        );
    }

    #[test]
    fn defaults_must_resolve() {
        let yaml = "kumiki_version: \"1.0.0\"\ntargets: []\ndefaults: [nope]\n";
        let description = description::from_str(yaml).expect("description");
        let err = BuildGraph::from_description(&description, Utf8Path::new("build"))
            .expect_err("defaults");
        assert!(matches!(
            err,
            GraphError::UnresolvedTarget { relation: RelationKind::Defaults, .. }
        ));
    }
}
