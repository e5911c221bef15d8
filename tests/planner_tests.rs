//! Integration tests for step planning over a layered graph.

mod common;

use common::{config, layered};
use kumiki::config::BuildConfig;
use kumiki::graph::BuildGraph;
use kumiki::plan::{BuildPlan, PlanError, Planner, Step, StepKind};
use rstest::rstest;

fn plan_for(graph: &BuildGraph, config: &BuildConfig, targets: &[&str]) -> BuildPlan {
    let selection: Vec<String> = targets.iter().map(|t| (*t).to_owned()).collect();
    Planner::new(graph, config).plan(&selection).expect("plan")
}

fn step<'p>(plan: &'p BuildPlan, label: &str) -> &'p Step {
    plan.steps()
        .iter()
        .find(|s| s.label == label)
        .unwrap_or_else(|| panic!("no step labelled {label}"))
}

fn dep_labels(plan: &BuildPlan, step: &Step) -> Vec<String> {
    step.deps
        .iter()
        .filter_map(|id| plan.step(*id))
        .map(|s| s.label.clone())
        .collect()
}

#[rstest]
fn flat_extraction_depends_only_on_the_producer_compiles(
    layered: BuildGraph,
    config: BuildConfig,
) {
    let plan = plan_for(&layered, &config, &["probe"]);
    let extract = step(&plan, "extract 2 object(s) of net for probe");
    assert_eq!(extract.kind, StepKind::Extract);
    assert_eq!(
        dep_labels(&plan, extract),
        ["compile net/socket.c", "compile net/http.cpp"]
    );

    let link = step(&plan, "link build/probe");
    assert!(link.inputs.iter().all(|input| !input.as_str().ends_with(".a")));
    assert!(plan.steps().iter().all(|s| s.target != "core"));
    let links = plan.steps().iter().filter(|s| s.kind == StepKind::Link).count();
    assert_eq!(links, 1, "probe must not wait for any archive");
}

#[rstest]
fn default_selection_builds_the_default_target(layered: BuildGraph, config: BuildConfig) {
    let plan = plan_for(&layered, &config, &[]);
    let labels: Vec<&str> = plan.steps().iter().map(|s| s.label.as_str()).collect();
    assert_eq!(
        labels,
        [
            "compile core/alloc.c",
            "compile core/log.c",
            "archive build/libcore.a",
            "compile net/socket.c",
            "compile net/http.cpp",
            "archive build/libnet.a",
            "compile server/main.c",
            "link build/server",
        ]
    );
    let server = step(&plan, "link build/server");
    assert_eq!(
        server.inputs,
        [
            "build/server.p/server_main.c.o",
            "build/libnet.a",
            "build/libcore.a",
        ]
    );
}

#[rstest]
fn every_step_follows_its_prerequisites(layered: BuildGraph, config: BuildConfig) {
    let all: Vec<&str> = layered.targets().iter().map(|t| t.name.as_str()).collect();
    let plan = plan_for(&layered, &config, &all);
    for step in plan.steps() {
        assert!(step.deps.iter().all(|dep| *dep < step.id), "{}", step.label);
    }
    let cxx = step(&plan, "compile net/http.cpp");
    assert_eq!(cxx.command.as_ref().map(|c| c.program()), Some("c++"));
}

#[rstest]
fn unknown_selection_is_rejected(layered: BuildGraph, config: BuildConfig) {
    let err = Planner::new(&layered, &config)
        .plan(&["nope".to_owned()])
        .expect_err("unknown");
    assert!(matches!(err, PlanError::UnknownTarget { name } if name == "nope"));
}
