//! Application entry point.
//!
//! Picks up a make jobserver from the environment, parses command-line
//! arguments and delegates execution to [`runner::run`].

use clap::Parser;
use kumiki::{cli::Cli, runner};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    // SAFETY: called first thing, before anything else opens a descriptor,
    // so descriptors named in MAKEFLAGS still belong to the parent's
    // jobserver.
    let jobserver = unsafe { jobserver::Client::from_env() };
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    // Plans and graphs go to stdout, so logs must not.
    fmt()
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
    match runner::run(&cli, jobserver.as_ref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            tracing::debug!(error = %err, code, "runner failed");
            drop(writeln!(io::stderr(), "{:?}", miette::Report::new(err)));
            ExitCode::from(code)
        }
    }
}
