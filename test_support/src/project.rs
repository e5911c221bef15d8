//! Throwaway project directories for end-to-end builds.

use crate::fake_tool::{self, CALL_LOG};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, File};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Default description file name used by [`Project::write_description`].
pub const DESCRIPTION: &str = "kumiki.yml";

/// A temporary directory holding sources, a description and the fake tool.
///
/// The directory is removed when the project is dropped.
#[derive(Debug)]
pub struct Project {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Project {
    /// Create an empty project containing only the fake tool script.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or the script cannot be created,
    /// or when the temporary path is not UTF-8.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("create project directory")?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| anyhow!("project path {} is not UTF-8", path.display()))?;
        fake_tool::write_fake_tool(&root)?;
        Ok(Self { _dir: dir, root })
    }

    /// Absolute project root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute path of `relative` inside the project.
    #[must_use]
    pub fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Write `contents` to `relative`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, relative: &str, contents: &str) -> Result<Utf8PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {path}"))?;
        Ok(path)
    }

    /// Write [`DESCRIPTION`] with the fake toolchain and the given `targets:`
    /// list (already indented YAML), plus any `extra` top-level keys.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write_description(&self, targets: &str, extra: &str) -> Result<Utf8PathBuf> {
        let yaml = format!(
            "kumiki_version: \"1.0.0\"\n{}targets:\n{targets}{extra}",
            fake_tool::toolchain_block()
        );
        self.write(DESCRIPTION, &yaml)
    }

    /// Tool invocations recorded so far, one `tool output inputs...` line
    /// each. Empty when nothing ran.
    ///
    /// # Errors
    ///
    /// Returns an error when the log exists but cannot be read.
    pub fn calls(&self) -> Result<Vec<String>> {
        let path = self.path(CALL_LOG);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text.lines().map(str::to_owned).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err).with_context(|| format!("read {path}")),
        }
    }

    /// Forget recorded tool invocations.
    ///
    /// # Errors
    ///
    /// Returns an error when the log exists but cannot be removed.
    pub fn clear_calls(&self) -> Result<()> {
        let path = self.path(CALL_LOG);
        match fs::remove_file(&path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("remove {path}"))
            }
            _ => Ok(()),
        }
    }

    /// Move the modification time of `relative` an hour into the past, so
    /// every input of the step that built it looks newer regardless of
    /// timestamp granularity.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or updated.
    pub fn backdate(&self, relative: &str) -> Result<()> {
        self.backdate_by(relative, Duration::from_secs(3600))
    }

    /// Set the modification time of `relative` to `age` before now.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or updated.
    pub fn backdate_by(&self, relative: &str, age: Duration) -> Result<()> {
        let path = self.path(relative);
        let file = File::options()
            .append(true)
            .open(&path)
            .with_context(|| format!("open {path}"))?;
        let earlier = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        file.set_modified(earlier)
            .with_context(|| format!("set mtime of {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_files_and_reads_calls() {
        let project = Project::new().expect("project");
        let path = project.write("src/deep/a.c", "int a;").expect("write");
        assert!(path.starts_with(project.root()));
        assert_eq!(fs::read_to_string(path).expect("read"), "int a;");
        assert!(project.calls().expect("calls").is_empty());
        project.write(CALL_LOG, "cc x.o x.c\n").expect("write log");
        assert_eq!(project.calls().expect("calls"), vec!["cc x.o x.c"]);
        project.clear_calls().expect("clear");
        assert!(project.calls().expect("calls").is_empty());
    }

    #[test]
    fn description_embeds_the_fake_toolchain() {
        let project = Project::new().expect("project");
        let path = project
            .write_description("  - name: app\n    kind: executable\n    sources: main.c\n", "")
            .expect("description");
        let text = fs::read_to_string(path).expect("read");
        assert!(text.starts_with("kumiki_version: \"1.0.0\"\ntoolchain:\n"));
        assert!(text.contains("targets:\n  - name: app"));
    }

    #[test]
    fn backdate_moves_mtime_back() {
        let project = Project::new().expect("project");
        let path = project.write("a.o", "obj").expect("write");
        let before = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        project.backdate("a.o").expect("backdate");
        let after = fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");
        assert!(after < before);
    }
}
