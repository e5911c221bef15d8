//! A shell script standing in for the compiler, archiver and linker.
//!
//! The script is invoked as `sh fake_tool.sh <tool> <output> [inputs...]`. It
//! appends one line per call to [`CALL_LOG`], fails when any input contains
//! the word `FAIL`, and otherwise writes the tool name and its inputs into the
//! output file. Running it through `sh` keeps the project free of executable
//! bits.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;

/// File name of the script inside a project.
pub const FAKE_TOOL: &str = "fake_tool.sh";

/// File the script appends its invocations to, relative to the project root.
pub const CALL_LOG: &str = "tool_calls.log";

/// Marker that makes the tool fail when found inside an input.
pub const FAIL_MARKER: &str = "FAIL";

const SCRIPT: &str = concat!(
    "#!/bin/sh\n",
    "tool=\"$1\"\n",
    "out=\"$2\"\n",
    "shift 2\n",
    "echo \"$tool $out $*\" >> tool_calls.log\n",
    "for input in \"$@\"; do\n",
    "  if grep -q FAIL \"$input\" 2>/dev/null; then\n",
    "    echo \"$tool: $input: error: requested failure\" >&2\n",
    "    exit 1\n",
    "  fi\n",
    "done\n",
    "mkdir -p \"$(dirname \"$out\")\"\n",
    "printf '%s\\n' \"$tool\" \"$@\" > \"$out\"\n",
);

/// Write the fake tool script into `root`.
///
/// # Errors
///
/// Returns an error when the script cannot be written.
pub fn write_fake_tool(root: &Utf8Path) -> Result<()> {
    let path = root.join(FAKE_TOOL);
    fs::write(&path, SCRIPT).with_context(|| format!("write fake tool {path}"))
}

/// Command template running the fake tool as `tool`.
///
/// # Examples
///
/// ```rust
/// assert_eq!(
///     test_support::fake_tool::template("cc"),
///     "sh fake_tool.sh cc $out $in"
/// );
/// ```
#[must_use]
pub fn template(tool: &str) -> String {
    format!("sh {FAKE_TOOL} {tool} $out $in")
}

/// A `toolchain:` YAML block routing every tool through the fake script.
#[must_use]
pub fn toolchain_block() -> String {
    ["cc", "cxx", "ar", "link", "shared"]
        .iter()
        .map(|tool| format!("  {tool}: \"{}\"\n", template(tool)))
        .fold(String::from("toolchain:\n"), |mut block, line| {
            block.push_str(&line);
            block
        })
}

/// Environment overrides routing every tool through the fake script, for
/// builds whose description carries no `toolchain:` block.
#[must_use]
pub fn toolchain_env_vars() -> Vec<(&'static str, String)> {
    ["cc", "cxx", "ar", "link", "shared"]
        .into_iter()
        .zip(toolchain_env::ALL)
        .map(|(tool, var)| (var, template(tool)))
        .collect()
}
