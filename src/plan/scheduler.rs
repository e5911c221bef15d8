//! Turns a [`BuildGraph`] into an ordered [`BuildPlan`].

use std::collections::{BTreeSet, HashMap, HashSet};

use camino::Utf8PathBuf;

use super::command::{self, CommandLine};
use super::{BuildPlan, PlanError, Step, StepId, StepKind};
use crate::config::BuildConfig;
use crate::extract::ObjectExtractor;
use crate::graph::{BuildGraph, GraphError, cycle};
use crate::model::{Language, SourceRole, Target, TargetId, TargetKind};

/// Order targets so every edge's producer precedes its consumer.
///
/// Among targets that are ready at the same time the one declared first
/// wins, so the order is stable across runs.
///
/// # Errors
///
/// Returns [`GraphError::Cycle`] if no such order exists.
pub fn topological_order(graph: &BuildGraph) -> Result<Vec<TargetId>, GraphError> {
    let mut indegree = vec![0_usize; graph.len()];
    let mut consumers: Vec<Vec<TargetId>> = vec![Vec::new(); graph.len()];
    for edge in graph.edges() {
        if let Some(count) = indegree.get_mut(edge.consumer.index()) {
            *count += 1;
        }
        if let Some(list) = consumers.get_mut(edge.producer.index()) {
            list.push(edge.consumer);
        }
    }
    let mut ready: BTreeSet<TargetId> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| TargetId::new(index))
        .collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for consumer in consumers.get(id.index()).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(consumer.index()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*consumer);
                }
            }
        }
    }
    if order.len() < graph.len() {
        cycle::check_edges(graph.len(), graph.edges(), |id| graph.name(id))?;
    }
    Ok(order)
}

/// Builds the steps for a graph under a given configuration.
#[derive(Debug)]
pub struct Planner<'a> {
    graph: &'a BuildGraph,
    config: &'a BuildConfig,
    extractor: ObjectExtractor<'a>,
    steps: Vec<Step>,
    compiled: HashMap<Utf8PathBuf, StepId>,
    link_steps: HashMap<TargetId, StepId>,
}

impl<'a> Planner<'a> {
    /// Planner for `graph` using the templates of `config`.
    #[must_use]
    pub fn new(graph: &'a BuildGraph, config: &'a BuildConfig) -> Self {
        Self {
            graph,
            config,
            extractor: ObjectExtractor::new(graph),
            steps: Vec::new(),
            compiled: HashMap::new(),
            link_steps: HashMap::new(),
        }
    }

    /// Plan the steps needed for `selection`.
    ///
    /// An empty selection falls back to the description's defaults, and to
    /// every target when there are none. Only steps the selected link steps
    /// transitively need are kept.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] for unknown targets, failed object requests,
    /// targets with nothing to link and templates that do not render.
    pub fn plan(mut self, selection: &[String]) -> Result<BuildPlan, PlanError> {
        let roots = self.roots(selection)?;
        let wanted = self.prerequisite_targets(&roots);
        for id in topological_order(self.graph)? {
            if wanted.contains(&id) {
                self.plan_target(id)?;
            }
        }
        let plan = self.keep_needed(&roots);
        tracing::debug!(steps = plan.len(), targets = roots.len(), "planned build");
        Ok(plan)
    }

    fn roots(&self, selection: &[String]) -> Result<Vec<TargetId>, PlanError> {
        if !selection.is_empty() {
            return selection
                .iter()
                .map(|name| {
                    self.graph
                        .lookup(name)
                        .ok_or_else(|| PlanError::UnknownTarget { name: name.clone() })
                })
                .collect();
        }
        if !self.graph.defaults().is_empty() {
            return Ok(self.graph.defaults().to_vec());
        }
        Ok(self.graph.targets().iter().map(|t| t.id).collect())
    }

    fn prerequisite_targets(&self, roots: &[TargetId]) -> HashSet<TargetId> {
        let mut wanted = HashSet::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            if wanted.insert(id) {
                stack.extend(self.graph.producers_of(id).map(|e| e.producer));
            }
        }
        wanted
    }

    fn plan_target(&mut self, id: TargetId) -> Result<(), PlanError> {
        let graph = self.graph;
        let Some(target) = graph.target(id) else {
            return Ok(());
        };
        let order_links: Vec<StepId> = target
            .order_deps
            .iter()
            .filter_map(|dep| self.link_steps.get(dep).copied())
            .collect();

        // Headers are read by every compile of the target, so they are
        // inputs even though they never appear in `$in`.
        let auxiliary: Vec<Utf8PathBuf> = target
            .sources
            .iter()
            .filter(|source| source.role == SourceRole::Auxiliary)
            .map(|source| source.path.clone())
            .collect();
        let mut deps = BTreeSet::new();
        for source in &target.sources {
            let (SourceRole::Compiled(language), Some(object)) = (source.role, &source.object)
            else {
                continue;
            };
            let template = match language {
                Language::C | Language::Assembly => &self.config.toolchain.cc,
                Language::Cxx => &self.config.toolchain.cxx,
            };
            let outputs = vec![object.clone()];
            let command = render(target, template, &[source.path.clone()], &outputs)?;
            let mut inputs = Vec::with_capacity(auxiliary.len() + 1);
            inputs.push(source.path.clone());
            inputs.extend(auxiliary.iter().cloned());
            let step = self.push(Step {
                id: StepId::new(0),
                kind: StepKind::Compile,
                target: target.name.clone(),
                target_id: id,
                inputs,
                outputs,
                deps: order_links.clone(),
                command: Some(command),
                label: format!("compile {}", source.path),
                fresh: false,
                prune_outputs: false,
            });
            self.compiled.insert(object.clone(), step);
            deps.insert(step);
        }

        for request in &target.object_requests {
            let objects = self.extractor.resolve(request)?;
            let producers: BTreeSet<StepId> = objects
                .iter()
                .filter_map(|o| self.compiled.get(&o.path).copied())
                .collect();
            let step = self.push(Step {
                id: StepId::new(0),
                kind: StepKind::Extract,
                target: target.name.clone(),
                target_id: id,
                inputs: objects.paths(),
                outputs: Vec::new(),
                deps: producers.into_iter().collect(),
                command: None,
                label: format!(
                    "extract {} object(s) of {} for {}",
                    objects.len(),
                    graph.name(request.from),
                    target.name
                ),
                fresh: false,
                prune_outputs: false,
            });
            deps.insert(step);
        }

        self.plan_link(target, deps, &order_links)
    }

    fn plan_link(
        &mut self,
        target: &Target,
        mut deps: BTreeSet<StepId>,
        order_links: &[StepId],
    ) -> Result<(), PlanError> {
        let objects = self.extractor.objects_for(target.id)?;
        let libraries = self.link_libraries(target);
        let archive = target.kind == TargetKind::StaticLibrary;
        if objects.is_empty() && (archive || libraries.is_empty()) {
            return Err(PlanError::EmptyTarget {
                target: target.name.clone(),
            });
        }
        let mut inputs = objects.paths();
        if !archive {
            inputs.extend(libraries);
        }
        deps.extend(
            target
                .link_with
                .iter()
                .filter_map(|lib| self.link_steps.get(lib).copied()),
        );
        deps.extend(order_links.iter().copied());

        let toolchain = &self.config.toolchain;
        let (template, verb) = match target.kind {
            TargetKind::StaticLibrary => (&toolchain.ar, "archive"),
            TargetKind::SharedLibrary => (&toolchain.shared, "link shared"),
            TargetKind::Executable => (&toolchain.link, "link"),
        };
        let outputs = vec![target.output.clone()];
        let command = render(target, template, &inputs, &outputs)?;
        let step = self.push(Step {
            id: StepId::new(0),
            kind: StepKind::Link,
            target: target.name.clone(),
            target_id: target.id,
            inputs,
            outputs,
            deps: deps.into_iter().collect(),
            command: Some(command),
            label: format!("{verb} {}", target.output),
            fresh: false,
            prune_outputs: archive,
        });
        self.link_steps.insert(target.id, step);
        Ok(())
    }

    /// Artefacts to pass to the linker: the direct libraries in order, each
    /// followed by the libraries a static archive still needs.
    fn link_libraries(&self, target: &Target) -> Vec<Utf8PathBuf> {
        let mut seen = HashSet::new();
        let mut libraries = Vec::new();
        let mut stack: Vec<TargetId> = target.link_with.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(library) = self.graph.target(id) else {
                continue;
            };
            libraries.push(library.output.clone());
            if library.kind == TargetKind::StaticLibrary {
                stack.extend(library.link_with.iter().rev().copied());
            }
        }
        libraries
    }

    fn push(&mut self, mut step: Step) -> StepId {
        let id = StepId::new(self.steps.len());
        step.id = id;
        self.steps.push(step);
        id
    }

    fn keep_needed(self, roots: &[TargetId]) -> BuildPlan {
        let mut keep = vec![false; self.steps.len()];
        let mut stack: Vec<StepId> = roots
            .iter()
            .filter_map(|id| self.link_steps.get(id).copied())
            .collect();
        while let Some(id) = stack.pop() {
            let Some(slot) = keep.get_mut(id.index()) else {
                continue;
            };
            if *slot {
                continue;
            }
            *slot = true;
            if let Some(step) = self.steps.get(id.index()) {
                stack.extend(step.deps.iter().copied());
            }
        }

        let mut renumbered: HashMap<StepId, StepId> = HashMap::new();
        let mut steps = Vec::new();
        for (mut step, kept) in self.steps.into_iter().zip(keep) {
            if !kept {
                continue;
            }
            let id = StepId::new(steps.len());
            renumbered.insert(step.id, id);
            step.id = id;
            step.deps = step
                .deps
                .iter()
                .filter_map(|dep| renumbered.get(dep).copied())
                .collect();
            steps.push(step);
        }
        BuildPlan::new(steps)
    }
}

fn render(
    target: &Target,
    template: &str,
    inputs: &[Utf8PathBuf],
    outputs: &[Utf8PathBuf],
) -> Result<CommandLine, PlanError> {
    command::render(template, inputs, outputs).map_err(|err| PlanError::InvalidCommand {
        target: target.name.clone(),
        command: err.command,
        snippet: err.snippet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description;
    use camino::Utf8Path;
    use rstest::rstest;

    const HEADER: &str = "kumiki_version: \"1.0.0\"\ntargets:\n";

    fn graph(targets: &str) -> BuildGraph {
        let description = description::from_str(&format!("{HEADER}{targets}")).expect("description");
        BuildGraph::from_description(&description, Utf8Path::new("build")).expect("graph")
    }

    fn plan(graph: &BuildGraph, selection: &[&str]) -> Result<BuildPlan, PlanError> {
        let config = BuildConfig::new(".");
        let selection: Vec<String> = selection.iter().map(|s| (*s).to_owned()).collect();
        Planner::new(graph, &config).plan(&selection)
    }

    fn labels(plan: &BuildPlan, ids: &[StepId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| plan.step(*id))
            .map(|s| s.label.clone())
            .collect()
    }

    fn find<'p>(plan: &'p BuildPlan, label: &str) -> &'p Step {
        plan.steps()
            .iter()
            .find(|s| s.label == label)
            .unwrap_or_else(|| panic!("no step labelled {label}"))
    }

    const CHAIN: &str = concat!(
        "  - name: app\n    kind: executable\n    sources: main.c\n    link_with: mid\n",
        "  - name: mid\n    kind: static_library\n    sources: mid.cpp\n    link_with: base\n",
        "  - name: base\n    kind: static_library\n    sources: [b.c, b.h]\n",
        "  - name: lone\n    kind: executable\n    sources: lone.c\n",
    );

    #[test]
    fn topological_order_respects_edges_and_declaration() {
        let graph = graph(CHAIN);
        let order = topological_order(&graph).expect("order");
        let names: Vec<&str> = order.iter().map(|id| graph.name(*id)).collect();
        assert_eq!(names, vec!["base", "mid", "app", "lone"]);
        for edge in graph.edges() {
            let position = |id| order.iter().position(|o| *o == id);
            assert!(position(edge.producer) < position(edge.consumer));
        }
    }

    #[test]
    fn steps_only_depend_on_earlier_steps() {
        let graph = graph(CHAIN);
        let plan = plan(&graph, &[]).expect("plan");
        assert_eq!(plan.len(), 8);
        for step in plan.steps() {
            assert!(step.deps.iter().all(|dep| *dep < step.id), "{step:?}");
        }
    }

    #[test]
    fn executables_link_static_libraries_transitively() {
        let graph = graph(CHAIN);
        let plan = plan(&graph, &["app"]).expect("plan");
        let link = find(&plan, "link build/app");
        assert_eq!(
            link.inputs,
            vec![
                Utf8PathBuf::from("build/app.p/main.c.o"),
                Utf8PathBuf::from("build/libmid.a"),
                Utf8PathBuf::from("build/libbase.a"),
            ]
        );
        assert_eq!(
            labels(&plan, &link.deps),
            vec!["archive build/libmid.a", "compile main.c"]
        );
        let archive = find(&plan, "archive build/libmid.a");
        assert!(archive.prune_outputs);
        assert_eq!(archive.inputs, vec![Utf8PathBuf::from("build/mid.p/mid.cpp.o")]);
        let compile = find(&plan, "compile mid.cpp");
        assert_eq!(compile.command.as_ref().map(CommandLine::program), Some("c++"));
    }

    #[test]
    fn selection_keeps_only_prerequisites() {
        let graph = graph(CHAIN);
        let plan = plan(&graph, &["lone"]).expect("plan");
        let labels: Vec<&str> = plan.steps().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["compile lone.c", "link build/lone"]);
        assert_eq!(plan.step(StepId::new(1)).map(|s| s.deps.clone()), Some(vec![StepId::new(0)]));
    }

    #[test]
    fn headers_are_inputs_of_every_compile_step_but_not_of_the_command() {
        let graph = graph(concat!(
            "  - name: t\n    kind: static_library\n",
            "    sources: [a.c, api.h, b.c, notes.txt]\n",
        ));
        let plan = plan(&graph, &[]).expect("plan");
        for (label, source) in [("compile a.c", "a.c"), ("compile b.c", "b.c")] {
            let compile = find(&plan, label);
            assert_eq!(
                compile.inputs,
                vec![
                    Utf8PathBuf::from(source),
                    Utf8PathBuf::from("api.h"),
                    Utf8PathBuf::from("notes.txt"),
                ]
            );
            let argv = compile.command.as_ref().map(|c| c.argv.clone()).unwrap_or_default();
            assert!(!argv.iter().any(|arg| arg == "api.h"), "{argv:?}");
        }
        let archive = find(&plan, "archive build/libt.a");
        assert!(archive.inputs.iter().all(|input| input.as_str().ends_with(".o")));
    }

    #[test]
    fn unknown_selection_is_rejected() {
        let graph = graph(CHAIN);
        let err = plan(&graph, &["nope"]).expect_err("unknown");
        assert!(matches!(err, PlanError::UnknownTarget { name } if name == "nope"));
    }

    #[test]
    fn non_recursive_extraction_depends_only_on_compile_steps() {
        let graph = graph(concat!(
            "  - name: dep\n    kind: static_library\n    sources: d.c\n",
            "  - name: a\n    kind: static_library\n    sources: [a1.c, a2.c]\n    link_with: dep\n",
            "  - name: b\n    kind: executable\n    sources: b.c\n",
            "    objects:\n      - extract_all_objects: a\n        recursive: false\n",
        ));
        let plan = plan(&graph, &["b"]).expect("plan");
        let extract = plan
            .steps()
            .iter()
            .find(|s| s.kind == StepKind::Extract)
            .expect("extract step");
        assert_eq!(labels(&plan, &extract.deps), vec!["compile a1.c", "compile a2.c"]);
        assert!(extract.command.is_none());
        let link = find(&plan, "link build/b");
        assert!(link.deps.iter().all(|dep| {
            plan.step(*dep)
                .is_some_and(|s| s.target == "b" || s.kind == StepKind::Extract)
        }));
        assert!(plan.steps().iter().all(|s| s.target != "dep"));
    }

    #[test]
    fn plain_dependency_orders_without_linking() {
        let graph = graph(concat!(
            "  - name: gen\n    kind: executable\n    sources: gen.c\n",
            "  - name: app\n    kind: executable\n    sources: main.c\n    dependencies: [gen]\n",
        ));
        let plan = plan(&graph, &["app"]).expect("plan");
        let compile = find(&plan, "compile main.c");
        assert_eq!(labels(&plan, &compile.deps), vec!["link build/gen"]);
        let link = find(&plan, "link build/app");
        assert_eq!(link.inputs, vec![Utf8PathBuf::from("build/app.p/main.c.o")]);
    }

    #[rstest]
    #[case("  - name: h\n    kind: static_library\n    sources: h.h\n")]
    #[case("  - name: e\n    kind: executable\n")]
    fn targets_without_inputs_are_empty(#[case] targets: &str) {
        let graph = graph(targets);
        let err = plan(&graph, &[]).expect_err("empty");
        assert!(matches!(err, PlanError::EmptyTarget { .. }), "{err:?}");
    }

    #[test]
    fn broken_template_is_reported() {
        let graph = graph("  - name: e\n    kind: executable\n    sources: e.c\n");
        let mut config = BuildConfig::new(".");
        config.toolchain.cc = "cc \"$in".into();
        let err = Planner::new(&graph, &config).plan(&[]).expect_err("invalid");
        assert!(matches!(err, PlanError::InvalidCommand { target, .. } if target == "e"));
    }

    #[test]
    fn failed_extraction_surfaces_as_plan_error() {
        let graph = graph(concat!(
            "  - name: h\n    kind: static_library\n    sources: [h.c, h.h]\n",
            "  - name: app\n    kind: executable\n    sources: main.c\n",
            "    objects:\n      - extract_objects: h\n        sources: h.h\n",
        ));
        let err = plan(&graph, &[]).expect_err("empty extraction");
        assert!(matches!(err, PlanError::Extract(_)), "{err:?}");
    }
}
