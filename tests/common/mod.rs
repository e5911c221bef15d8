//! Shared helpers for integration tests.
//!
//! Integration tests under `tests/` compile as independent crates. This module
//! is included via `mod common;` in individual test files to share fixtures
//! while keeping test modules small.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use kumiki::config::BuildConfig;
use kumiki::graph::BuildGraph;
use kumiki::{description, graph::GraphError};
use rstest::fixture;

/// Path of a description under `tests/data`.
pub fn data_path(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

/// Load `tests/data/<name>` into a graph rooted at `build`.
pub fn load_graph(name: &str) -> Result<Result<BuildGraph, GraphError>> {
    let path = data_path(name);
    let loaded = description::from_path(&path).with_context(|| format!("load {path}"))?;
    Ok(BuildGraph::from_description(&loaded, Utf8Path::new("build")))
}

/// Fixture: the layered library graph.
#[fixture]
pub fn layered() -> BuildGraph {
    load_graph("layered.yml")
        .expect("layered.yml loads")
        .expect("layered.yml forms a graph")
}

/// Configuration rooted in the current directory with default tools.
#[fixture]
pub fn config() -> BuildConfig {
    BuildConfig::new(".")
}
