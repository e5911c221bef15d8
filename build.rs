//! Build script that renders man pages for the `kumiki` CLI.

use clap::{Command, CommandFactory};
use clap_mangen::Man;
use std::{env, fs, path::Path, path::PathBuf};

#[path = "src/cli.rs"]
#[expect(
    dead_code,
    reason = "Only type definitions are needed for man page generation"
)]
mod cli;

/// Render `cmd` as `<dir>/<page>.1`.
fn write_page(dir: &Path, page: &str, cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    Man::new(cmd).title(page.to_uppercase()).render(&mut buf)?;
    fs::write(dir.join(format!("{page}.1")), buf)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed=CARGO_PKG_VERSION");
    println!("cargo:rerun-if-env-changed=CARGO_BIN_NAME");

    let out_dir = PathBuf::from("target/generated-man");
    if out_dir.exists() {
        fs::remove_dir_all(&out_dir)?;
    }
    fs::create_dir_all(&out_dir)?;

    let cmd = cli::Cli::command().version(env!("CARGO_PKG_VERSION"));
    let bin = env::var("CARGO_BIN_NAME").unwrap_or_else(|_| cmd.get_name().to_owned());
    if cmd.get_name() != bin {
        return Err(format!(
            "CLI name '{}' differs from the binary name '{bin}'",
            cmd.get_name()
        )
        .into());
    }

    // `kumiki.1` covers global options; each subcommand gets `kumiki-<sub>.1`.
    for sub in cmd.get_subcommands() {
        let page = format!("{bin}-{}", sub.get_name());
        let sub_cmd = sub.clone().version(env!("CARGO_PKG_VERSION"));
        write_page(&out_dir, &page, sub_cmd)?;
    }
    write_page(&out_dir, &bin, cmd)?;
    Ok(())
}
