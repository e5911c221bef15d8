//! Immutable build configuration.
//!
//! [`BuildConfig`] gathers every setting a build needs: where the description
//! lives, where artefacts go, which command templates drive the toolchain and
//! how the executor behaves. It is assembled once by the runner and passed by
//! reference to the graph builder, planner and executor; no component reads
//! ambient state on its own.

use crate::ast::{BuildDescription, ToolchainDecl};
use camino::{Utf8Path, Utf8PathBuf};
use std::ffi::OsString;
use std::num::NonZeroUsize;
use toolchain_env::{AR_ENV, CC_ENV, CXX_ENV, LINK_ENV, SHARED_ENV};

/// Build directory used when neither the description nor the CLI sets one.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// How the executor reacts to a step that exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Halt dependents of the failed step and keep building everything else.
    #[default]
    KeepGoing,
    /// Stop dispatching new steps; in-flight steps drain.
    FailFast,
}

/// Command templates for each tool invocation.
///
/// `$in` expands to the shell-quoted inputs and `$out` to the outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Compiles a C or assembly source.
    pub cc: String,
    /// Compiles a C++ source.
    pub cxx: String,
    /// Creates a static archive.
    pub ar: String,
    /// Links an executable.
    pub link: String,
    /// Links a shared library.
    pub shared: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            cc: "cc -c $in -o $out".into(),
            cxx: "c++ -c $in -o $out".into(),
            ar: "ar rcs $out $in".into(),
            link: "cc $in -o $out".into(),
            shared: "cc -shared $in -o $out".into(),
        }
    }
}

impl Toolchain {
    /// Layer the description's templates and then the environment overrides
    /// over the built-in defaults.
    ///
    /// `read_env` is consulted for each `KUMIKI_*` variable; non UTF-8 values
    /// are ignored.
    #[must_use]
    pub fn resolve<F>(decl: &ToolchainDecl, mut read_env: F) -> Self
    where
        F: FnMut(&str) -> Option<OsString>,
    {
        let mut toolchain = Self::default();
        let slots: [(&mut String, Option<&String>, &str); 5] = [
            (&mut toolchain.cc, decl.cc.as_ref(), CC_ENV),
            (&mut toolchain.cxx, decl.cxx.as_ref(), CXX_ENV),
            (&mut toolchain.ar, decl.ar.as_ref(), AR_ENV),
            (&mut toolchain.link, decl.link.as_ref(), LINK_ENV),
            (&mut toolchain.shared, decl.shared.as_ref(), SHARED_ENV),
        ];
        for (slot, declared, var) in slots {
            if let Some(template) = declared {
                slot.clone_from(template);
            }
            if let Some(value) = read_env(var).and_then(|v| v.into_string().ok()) {
                tracing::debug!(variable = var, "toolchain template overridden from environment");
                *slot = value;
            }
        }
        toolchain
    }
}

/// Everything a build needs, fixed before the first step is planned.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory containing the description; commands run here.
    pub root: Utf8PathBuf,
    /// Artefact directory, relative to `root` unless absolute.
    pub build_dir: Utf8PathBuf,
    /// Tool command templates.
    pub toolchain: Toolchain,
    /// Maximum number of concurrently running steps.
    pub jobs: NonZeroUsize,
    /// Reaction to failing steps.
    pub policy: FailurePolicy,
    /// Treat every step as stale.
    pub force: bool,
}

impl BuildConfig {
    /// Start a configuration rooted at `root` with default settings.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_dir: Utf8PathBuf::from(DEFAULT_BUILD_DIR),
            toolchain: Toolchain::default(),
            jobs: default_jobs(),
            policy: FailurePolicy::default(),
            force: false,
        }
    }

    /// Configuration for `description` found in `root`, honouring its
    /// `build_dir` and `toolchain` blocks and the process environment.
    #[must_use]
    pub fn for_description(root: impl Into<Utf8PathBuf>, description: &BuildDescription) -> Self {
        Self::for_description_with_env(root, description, |key| std::env::var_os(key))
    }

    /// As [`Self::for_description`] with an injectable environment reader.
    #[must_use]
    pub fn for_description_with_env<F>(
        root: impl Into<Utf8PathBuf>,
        description: &BuildDescription,
        read_env: F,
    ) -> Self
    where
        F: FnMut(&str) -> Option<OsString>,
    {
        let mut config = Self::new(root);
        if let Some(dir) = &description.build_dir {
            config.build_dir = Utf8PathBuf::from(dir);
        }
        config.toolchain = Toolchain::resolve(&description.toolchain, read_env);
        config
    }

    /// Override the build directory.
    #[must_use]
    pub fn with_build_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    /// Override the job count.
    #[must_use]
    pub const fn with_jobs(mut self, jobs: NonZeroUsize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Override the failure policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Force every step to run.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Resolve a plan path against the root directory.
    #[must_use]
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Location of the build log.
    #[must_use]
    pub fn log_path(&self) -> Utf8PathBuf {
        self.resolve(&self.build_dir.join(crate::plan::BUILD_LOG_NAME))
    }
}

fn default_jobs() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
