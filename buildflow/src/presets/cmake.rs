//! CMake project pipeline.
//!
//! | stage            | deps             | cacheable | required |
//! |------------------|------------------|-----------|----------|
//! | clean            |                  | no        | yes      |
//! | configure        | clean (`all`)    | yes       | yes      |
//! | build            | configure        | yes       | yes      |
//! | test             | build            | no        | yes      |
//! | install          | build            | no        | yes      |
//! | package          | build            | no        | yes      |
//! | coverage-capture | test             | no        | no       |
//! | coverage-html    | coverage-capture | no        | no       |
//! | format           |                  | no        | no       |
//! | lint             | configure        | yes       | no       |
//! | benchmark        | build            | no        | no       |

use crate::config::BuildflowConfig;
use crate::errors::BuildflowError;
use crate::incremental::{GlobSet, InputSource};
use crate::pipeline::{default_concurrency, PipelineBuilder, StageGraph, StageSpec};
use crate::process::CommandSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pipeline name used for CMake graphs.
pub const PIPELINE_NAME: &str = "cmake";

const CMAKE_INPUTS: &[&str] = &["CMakeLists.txt", "**/CMakeLists.txt", "cmake/**/*.cmake"];

/// `CMAKE_BUILD_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildType {
    /// No optimization, debug info.
    Debug,
    /// Optimized (default).
    #[default]
    Release,
    /// Optimized with debug info.
    RelWithDebInfo,
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "Debug"),
            Self::Release => write!(f, "Release"),
            Self::RelWithDebInfo => write!(f, "RelWithDebInfo"),
        }
    }
}

impl FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "relwithdebinfo" => Ok(Self::RelWithDebInfo),
            _ => Err(format!(
                "unknown build type '{s}' (expected Debug, Release or RelWithDebInfo)"
            )),
        }
    }
}

/// A user-facing command, mapped onto the stages it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CmakeCommand {
    /// Remove the build directory.
    Clean,
    /// Run CMake configuration.
    Configure,
    /// Compile.
    Build,
    /// Run CTest.
    Test,
    /// Install the build.
    Install,
    /// Package with CPack.
    Package,
    /// Produce an lcov HTML coverage report.
    Coverage,
    /// Format sources with clang-format.
    Format,
    /// Lint sources with clang-tidy.
    Lint,
    /// Run the benchmark binary.
    Benchmark,
    /// Clean, configure, build and test.
    All,
}

impl CmakeCommand {
    /// Every command, in help order.
    pub const ALL: [Self; 11] = [
        Self::Clean,
        Self::Configure,
        Self::Build,
        Self::Test,
        Self::Install,
        Self::Package,
        Self::Coverage,
        Self::Format,
        Self::Lint,
        Self::Benchmark,
        Self::All,
    ];

    /// Returns the command name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Test => "test",
            Self::Install => "install",
            Self::Package => "package",
            Self::Coverage => "coverage",
            Self::Format => "format",
            Self::Lint => "lint",
            Self::Benchmark => "benchmark",
            Self::All => "all",
        }
    }

    /// Returns the stages this command asks for; their dependencies are
    /// pulled in by the graph selection.
    #[must_use]
    pub fn targets(self, options: &BuildOptions) -> Vec<&'static str> {
        match self {
            Self::Coverage => vec!["coverage-html"],
            Self::All if options.testing => vec!["clean", "configure", "build", "test"],
            Self::All => vec!["clean", "configure", "build"],
            other => vec![other.as_str()],
        }
    }
}

impl fmt::Display for CmakeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmakeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown command '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Options passed through to the CMake tool invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// `CMAKE_BUILD_TYPE`.
    pub build_type: BuildType,
    /// `ENABLE_COVERAGE`.
    pub coverage: bool,
    /// `BUILD_TESTING`.
    pub testing: bool,
    /// Build only this target.
    pub target: Option<String>,
    /// Parallel build jobs; CPU count when unset.
    pub jobs: Option<usize>,
    /// CTest `-R` filter.
    pub test_filter: Option<String>,
    /// Install prefix.
    pub install_prefix: Option<PathBuf>,
    /// Benchmark executable, relative to the build directory.
    pub benchmark_binary: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            build_type: BuildType::default(),
            coverage: false,
            testing: true,
            target: None,
            jobs: None,
            test_filter: None,
            install_prefix: None,
            benchmark_binary: PathBuf::from("bin/benchmark"),
        }
    }
}

impl BuildOptions {
    /// Sets the build type.
    #[must_use]
    pub const fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    /// Enables or disables coverage instrumentation.
    #[must_use]
    pub const fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    /// Enables or disables building tests.
    #[must_use]
    pub const fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    /// Builds a single target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the parallel job count.
    #[must_use]
    pub const fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Filters tests by regex.
    #[must_use]
    pub fn with_test_filter(mut self, filter: impl Into<String>) -> Self {
        self.test_filter = Some(filter.into());
        self
    }

    /// Sets the install prefix.
    #[must_use]
    pub fn with_install_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.install_prefix = Some(prefix.into());
        self
    }

    /// Sets the benchmark executable.
    #[must_use]
    pub fn with_benchmark_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.benchmark_binary = binary.into();
        self
    }

    const fn on_off(flag: bool) -> &'static str {
        if flag {
            "ON"
        } else {
            "OFF"
        }
    }
}

/// A CMake project rooted at `source_dir`.
#[derive(Debug, Clone)]
pub struct CmakeProject {
    source_dir: PathBuf,
    build_dir: PathBuf,
    options: BuildOptions,
    source_globs: Vec<String>,
    exclude_globs: Vec<String>,
}

impl CmakeProject {
    /// Creates a project; a relative `build_dir` is resolved against `source_dir`.
    #[must_use]
    pub fn new(
        source_dir: impl Into<PathBuf>,
        build_dir: impl AsRef<Path>,
        options: BuildOptions,
    ) -> Self {
        let source_dir = source_dir.into();
        let build_dir = source_dir.join(build_dir);
        let defaults = BuildflowConfig::default();
        Self {
            source_dir,
            build_dir,
            options,
            source_globs: defaults.source_globs,
            exclude_globs: defaults.exclude_globs,
        }
    }

    /// Creates a project using the directories and globs from `config`.
    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: &BuildflowConfig, options: BuildOptions) -> Self {
        Self::new(root, &config.build_dir, options)
            .with_source_globs(config.source_globs.clone(), config.exclude_globs.clone())
    }

    /// Replaces the source include and exclude globs.
    #[must_use]
    pub fn with_source_globs(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.source_globs = include;
        self.exclude_globs = exclude;
        self
    }

    /// Returns the source directory.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Returns the build directory.
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Returns the build options.
    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Returns the values the configure stage's fingerprint reads.
    #[must_use]
    pub fn fingerprint_config(&self) -> Vec<(String, String)> {
        vec![
            ("cmake.build_type".into(), self.options.build_type.to_string()),
            ("cmake.coverage".into(), BuildOptions::on_off(self.options.coverage).into()),
            ("cmake.testing".into(), BuildOptions::on_off(self.options.testing).into()),
        ]
    }

    /// Lists the project's source files relative to `source_dir`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a glob is invalid or a directory
    /// cannot be read.
    pub fn source_files(&self) -> Result<Vec<PathBuf>, BuildflowError> {
        GlobSet::new(self.source_globs.as_slice(), self.exclude_globs.as_slice())
            .and_then(|globs| globs.matched_files(&self.source_dir))
            .map_err(|e| BuildflowError::Config(format!("cannot list source files: {e}")))
    }

    /// Builds the graph for `command`: its target stages and everything they
    /// depend on.
    ///
    /// # Errors
    ///
    /// Returns [`BuildflowError::Config`] for `coverage` without coverage
    /// enabled. `format` and `lint` with no source files build a stage that
    /// is skipped as having nothing to do.
    pub fn graph(&self, command: CmakeCommand) -> Result<StageGraph, BuildflowError> {
        if command == CmakeCommand::Coverage && !self.options.coverage {
            return Err(BuildflowError::Config(
                "coverage report requested but coverage is disabled; configure with --enable-coverage"
                    .to_string(),
            ));
        }

        let mut builder = PipelineBuilder::new(PIPELINE_NAME);
        for spec in self.core_stages(command) {
            builder.add_stage(spec)?;
        }
        if matches!(command, CmakeCommand::Format | CmakeCommand::Lint) {
            let files = self.source_files()?;
            let mut spec = if command == CmakeCommand::Format {
                self.format_stage(&files)
            } else {
                self.lint_stage(&files)
            };
            if files.is_empty() {
                spec = spec
                    .with_dependencies(std::iter::empty::<String>())
                    .with_nothing_to_do(format!(
                        "no source files match {}",
                        self.source_globs.join(", ")
                    ));
            }
            builder.add_stage(spec)?;
        }

        let graph = builder.build()?;
        Ok(graph.select(command.targets(&self.options).as_slice())?)
    }

    fn build_path(&self) -> String {
        self.build_dir.to_string_lossy().into_owned()
    }

    fn sources_input(&self) -> InputSource {
        InputSource::files(self.source_globs.iter().cloned()).excluding(self.exclude_globs.iter().cloned())
    }

    fn core_stages(&self, command: CmakeCommand) -> Vec<StageSpec> {
        let build = self.build_path();
        let options = &self.options;

        let clean = StageSpec::new(
            "clean",
            CommandSpec::new("cmake").args(["-E", "rm", "-rf", build.as_str()]),
        )
        .with_description("Remove the build directory");

        let mut configure_cmd = CommandSpec::new("cmake").args([
            "-S".to_string(),
            self.source_dir.to_string_lossy().into_owned(),
            "-B".to_string(),
            build.clone(),
            format!("-DCMAKE_BUILD_TYPE={}", options.build_type),
            format!("-DENABLE_COVERAGE={}", BuildOptions::on_off(options.coverage)),
            format!("-DBUILD_TESTING={}", BuildOptions::on_off(options.testing)),
        ]);
        if cfg!(windows) {
            configure_cmd = configure_cmd.args(["-G", "Visual Studio 16 2019", "-A", "x64"]);
        }
        let mut configure = StageSpec::new("configure", configure_cmd)
            .cacheable()
            .with_input(
                InputSource::files(CMAKE_INPUTS.iter().copied())
                    .excluding(self.exclude_globs.iter().cloned()),
            )
            .with_output(self.build_dir.join("CMakeCache.txt"))
            .with_description("Generate the build system");
        for (key, _) in self.fingerprint_config() {
            configure = configure.with_input(InputSource::config(key));
        }
        if command == CmakeCommand::All {
            configure = configure.with_dependency("clean");
        }

        let mut build_cmd = CommandSpec::new("cmake").args(["--build", build.as_str()]);
        if let Some(target) = &options.target {
            build_cmd = build_cmd.args(["--target", target.as_str()]);
        }
        match options.jobs {
            Some(jobs) => build_cmd = build_cmd.args(["--parallel".to_string(), jobs.to_string()]),
            None if !cfg!(windows) => {
                build_cmd = build_cmd.args(["--parallel".to_string(), default_concurrency().to_string()]);
            }
            None => {}
        }
        let build_stage = StageSpec::new("build", build_cmd)
            .with_dependency("configure")
            .cacheable()
            .with_input(self.sources_input())
            .with_description("Compile");

        let mut test_cmd = CommandSpec::new("ctest")
            .arg("--output-on-failure")
            .with_cwd(&self.build_dir);
        if let Some(filter) = &options.test_filter {
            test_cmd = test_cmd.args(["-R", filter.as_str()]);
        }
        let test = StageSpec::new("test", test_cmd)
            .with_dependency("build")
            .with_description("Run tests");

        let mut install_cmd = CommandSpec::new("cmake").args(["--install", build.as_str()]);
        if let Some(prefix) = &options.install_prefix {
            install_cmd = install_cmd.args(["--prefix".to_string(), prefix.to_string_lossy().into_owned()]);
        }
        let install = StageSpec::new("install", install_cmd)
            .with_dependency("build")
            .with_description("Install the build");

        let package = StageSpec::new("package", CommandSpec::new("cpack").with_cwd(&self.build_dir))
            .with_dependency("build")
            .with_description("Package with CPack");

        let capture = StageSpec::new(
            "coverage-capture",
            CommandSpec::new("lcov")
                .args(["--capture", "--directory", ".", "--output-file", "coverage.info"])
                .with_cwd(&self.build_dir),
        )
        .with_dependency("test")
        .requires_tool("gcov")
        .optional()
        .with_description("Collect coverage data");

        let html = StageSpec::new(
            "coverage-html",
            CommandSpec::new("genhtml")
                .args(["coverage.info", "--output-directory", "coverage"])
                .with_cwd(&self.build_dir),
        )
        .with_dependency("coverage-capture")
        .optional()
        .with_description("Render the coverage report");

        let benchmark_exe = self.build_dir.join(&options.benchmark_binary);
        let benchmark = StageSpec::new(
            "benchmark",
            CommandSpec::new(benchmark_exe.to_string_lossy()),
        )
        .with_dependency("build")
        .optional()
        .with_description("Run benchmarks");

        vec![
            clean,
            configure,
            build_stage,
            test,
            install,
            package,
            capture,
            html,
            benchmark,
        ]
    }

    fn file_args(files: &[PathBuf]) -> Vec<String> {
        files.iter().map(|f| f.to_string_lossy().into_owned()).collect()
    }

    fn format_stage(&self, files: &[PathBuf]) -> StageSpec {
        StageSpec::new(
            "format",
            CommandSpec::new("clang-format")
                .arg("-i")
                .args(Self::file_args(files))
                .with_cwd(&self.source_dir),
        )
        .optional()
        .with_description("Format sources")
    }

    fn lint_stage(&self, files: &[PathBuf]) -> StageSpec {
        StageSpec::new(
            "lint",
            CommandSpec::new("clang-tidy")
                .args(Self::file_args(files))
                .args(["--", "-std=c++17"])
                .with_cwd(&self.source_dir),
        )
        .with_dependency("configure")
        .cacheable()
        .with_input(self.sources_input())
        .optional()
        .with_description("Static analysis")
    }
}
