//! Subprocess invocation.
//!
//! The executor talks to compilers and linkers only through the narrow
//! [`Process`] trait: spawn a program, wait for it and hand back the exit
//! code with the captured output. Tests substitute fakes.

use std::borrow::Cow;
use std::io;
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use tracing::info;

/// A program to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Utf8PathBuf,
}

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// Output of a process that exited with `code` and printed nothing.
    #[must_use]
    pub const fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the process exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runs one subprocess to completion.
#[cfg_attr(test, mockall::automock)]
pub trait Process: Send + Sync {
    /// Run `invocation` and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be started. A non-zero exit is
    /// not an error.
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// [`Process`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

impl Process for SystemProcess {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let redacted: Vec<Cow<'_, str>> = invocation
            .args
            .iter()
            .map(|arg| redact_argument(arg))
            .collect();
        info!("Running command: {} {}", invocation.program, redacted.join(" "));
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .output()?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn is_sensitive_key(key: &str) -> bool {
    const SENSITIVE_KEYS: [&str; 7] = [
        "password",
        "token",
        "secret",
        "api_key",
        "apikey",
        "auth",
        "authorization",
    ];
    let bare = key.trim().trim_start_matches('-');
    SENSITIVE_KEYS
        .iter()
        .any(|candidate| bare.eq_ignore_ascii_case(candidate))
}

/// Replace the value of a sensitive `key=value` argument for logging.
///
/// Keys may carry leading dashes, so `--token=abc` is redacted as well.
pub(crate) fn redact_argument(arg: &str) -> Cow<'_, str> {
    match arg.split_once('=') {
        Some((key, _)) if is_sensitive_key(key) => {
            Cow::Owned(format!("{}=***REDACTED***", key.trim()))
        }
        _ => Cow::Borrowed(arg),
    }
}
