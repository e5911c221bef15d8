#![forbid(unsafe_code)]

//! Environment variable names that override the toolchain command templates.
//!
//! Shared between the `kumiki` library, its integration tests, and the test
//! support crate so every consumer agrees on the spelling.

/// Override for the C compile template.
pub const CC_ENV: &str = "KUMIKI_CC";

/// Override for the C++ compile template.
pub const CXX_ENV: &str = "KUMIKI_CXX";

/// Override for the static archive template.
pub const AR_ENV: &str = "KUMIKI_AR";

/// Override for the executable link template.
pub const LINK_ENV: &str = "KUMIKI_LINK";

/// Override for the shared library link template.
pub const SHARED_ENV: &str = "KUMIKI_SHARED";

/// Every override variable, in the order they are consulted.
///
/// # Examples
///
/// ```
/// use toolchain_env::{ALL, CC_ENV};
/// assert!(ALL.contains(&CC_ENV));
/// ```
pub const ALL: [&str; 5] = [CC_ENV, CXX_ENV, AR_ENV, LINK_ENV, SHARED_ENV];
