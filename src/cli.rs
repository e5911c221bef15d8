//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands. It is also
//! compiled by the build script to render the manual page, so it depends on
//! nothing but `clap` and the standard library.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Maximum number of jobs accepted by the CLI.
pub const MAX_JOBS: usize = 64;

fn parse_jobs(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=MAX_JOBS).contains(&value) {
        Ok(value)
    } else {
        Err(format!("jobs must be between 1 and {MAX_JOBS}"))
    }
}

/// Evaluate a declarative build description and run the compile, extract and
/// link steps it implies.
#[derive(Debug, Parser)]
#[command(name = "kumiki", author, version, about, long_about = None)]
pub struct Cli {
    /// Change to this directory before doing anything.
    #[arg(short = 'C', long, value_name = "DIR", global = true)]
    pub directory: Option<PathBuf>,

    /// Enable verbose logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available top-level commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Build the selected targets.
    Build(BuildArgs),

    /// Print the step plan without running it.
    Plan(PlanArgs),

    /// Print the target graph in DOT format.
    Graph(DescriptionArgs),

    /// Remove every output the plan would produce, and the build log.
    Clean(CleanArgs),
}

impl Commands {
    /// The description file named by the subcommand.
    #[must_use]
    pub const fn description(&self) -> &DescriptionArgs {
        match self {
            Self::Build(args) => &args.description,
            Self::Plan(args) => &args.description,
            Self::Graph(args) => args,
            Self::Clean(args) => &args.description,
        }
    }
}

/// The build description to load.
#[derive(Debug, Clone, Args)]
pub struct DescriptionArgs {
    /// Path to the YAML build description.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Directory for objects, artefacts and the build log.
    #[arg(long, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,
}

/// Arguments for the `build` subcommand.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Description and build directory.
    #[command(flatten)]
    pub description: DescriptionArgs,

    /// Set the number of parallel build jobs.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Build only this target and what it needs. May be repeated.
    #[arg(short, long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// Stop dispatching new steps after the first failure.
    #[arg(long)]
    pub fail_fast: bool,

    /// Run every step even when its outputs are current.
    #[arg(long)]
    pub force: bool,

    /// How progress is shown.
    #[arg(long, value_enum, default_value_t = StatusMode::Lines)]
    pub status: StatusMode,
}

/// Arguments for the `plan` subcommand.
#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Description and build directory.
    #[command(flatten)]
    pub description: DescriptionArgs,

    /// Plan only this target and what it needs. May be repeated.
    #[arg(short, long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// Emit the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `clean` subcommand.
#[derive(Debug, Clone, Args)]
pub struct CleanArgs {
    /// Description and build directory.
    #[command(flatten)]
    pub description: DescriptionArgs,
}

/// Progress display used by `build`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StatusMode {
    /// One numbered line per step.
    #[default]
    Lines,
    /// A redrawn progress bar.
    Progress,
    /// Only failures are shown.
    Silent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_flags_parse() {
        let cli = Cli::try_parse_from([
            "kumiki", "-C", "proj", "build", "kumiki.yml", "-j", "4", "-t", "app", "-t", "tool",
            "--fail-fast", "--status", "silent",
        ])
        .expect("parse");
        assert_eq!(cli.directory, Some(PathBuf::from("proj")));
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.targets, vec!["app", "tool"]);
        assert!(args.fail_fast);
        assert!(!args.force);
        assert_eq!(args.status, StatusMode::Silent);
        assert_eq!(args.description.file, PathBuf::from("kumiki.yml"));
    }

    #[rstest]
    #[case("0")]
    #[case("65")]
    #[case("many")]
    fn jobs_out_of_range_are_rejected(#[case] jobs: &str) {
        let result = Cli::try_parse_from(["kumiki", "build", "k.yml", "--jobs", jobs]);
        assert!(result.is_err());
    }

    #[test]
    fn description_file_is_required() {
        assert!(Cli::try_parse_from(["kumiki", "graph"]).is_err());
    }

    #[test]
    fn every_subcommand_exposes_its_description() {
        let cli = Cli::try_parse_from(["kumiki", "clean", "x.yml", "--build-dir", "out"])
            .expect("parse");
        let description = cli.command.description();
        assert_eq!(description.file, PathBuf::from("x.yml"));
        assert_eq!(description.build_dir, Some(PathBuf::from("out")));
    }
}
