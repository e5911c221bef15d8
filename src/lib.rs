//! Kumiki core library.
//!
//! Kumiki reads a declarative YAML build description, resolves its targets
//! into an acyclic graph, derives a plan of compile, object extraction and
//! link steps, and runs the stale steps on a bounded worker pool.
//!
//! The pipeline is exposed one stage per module:
//!
//! 1. [`description`] parses and validates the YAML into an [`ast`].
//! 2. [`graph`] resolves names into a [`graph::BuildGraph`].
//! 3. [`extract`] answers object extraction requests.
//! 4. [`plan`] orders steps and marks the fresh ones.
//! 5. [`exec`] runs the rest, reporting through [`status`].

pub mod ast;
pub mod cli;
pub mod config;
pub mod description;
pub mod dot;
pub mod exec;
pub mod extract;
pub mod graph;
pub mod hasher;
pub mod model;
pub mod plan;
pub mod runner;
pub mod status;
