//! Test utilities for end-to-end builds.
//!
//! This crate provides a fake toolchain script and temporary project
//! directories so integration tests can run real builds without a C
//! compiler.

pub mod fake_tool;
pub mod project;

pub use fake_tool::{CALL_LOG, FAIL_MARKER};
pub use project::{DESCRIPTION, Project};
