use std::path::PathBuf;

use buildflow::config::BuildflowConfig;
use buildflow::pipeline::{ExecutionPolicy, FailureMode};
use buildflow::presets::{BuildOptions, BuildType, CmakeCommand};
use clap::{Args, Subcommand};

fn parse_positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Options that shape the stage graph.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Command to run: clean, configure, build, test, install, package,
    /// coverage, format, lint, benchmark or all
    pub command: CmakeCommand,

    /// CMake build type
    #[arg(long, default_value_t)]
    pub build_type: BuildType,

    /// Configure with ENABLE_COVERAGE=ON
    #[arg(long)]
    pub enable_coverage: bool,

    /// Configure with BUILD_TESTING=OFF
    #[arg(long)]
    pub disable_testing: bool,

    /// Build only this CMake target
    #[arg(long)]
    pub target: Option<String>,

    /// Parallel build jobs (defaults to the CPU count)
    #[arg(short, long, value_parser = parse_positive)]
    pub jobs: Option<usize>,

    /// Only run tests matching this regex
    #[arg(long)]
    pub test_filter: Option<String>,

    /// Install prefix
    #[arg(long)]
    pub install_prefix: Option<PathBuf>,

    /// Run only these stages, without their dependencies
    #[arg(long, value_name = "STAGE", num_args = 1..)]
    pub only: Vec<String>,
}

impl BuildArgs {
    /// Returns arguments for `command` with every option at its default.
    #[cfg(test)]
    pub fn for_command(command: CmakeCommand) -> Self {
        Self {
            command,
            build_type: BuildType::default(),
            enable_coverage: false,
            disable_testing: false,
            target: None,
            jobs: None,
            test_filter: None,
            install_prefix: None,
            only: Vec::new(),
        }
    }

    /// Builds the preset options; the benchmark binary comes from config.
    pub fn options(&self, config: &BuildflowConfig) -> BuildOptions {
        let mut options = BuildOptions::default()
            .with_build_type(self.build_type)
            .with_coverage(self.enable_coverage)
            .with_testing(!self.disable_testing)
            .with_benchmark_binary(config.benchmark_binary.clone());
        if let Some(target) = &self.target {
            options = options.with_target(target.clone());
        }
        if let Some(jobs) = self.jobs {
            options = options.with_jobs(jobs);
        }
        if let Some(filter) = &self.test_filter {
            options = options.with_test_filter(filter.clone());
        }
        if let Some(prefix) = &self.install_prefix {
            options = options.with_install_prefix(prefix.clone());
        }
        options
    }
}

/// Options that shape scheduling.
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// fail-fast or continue-on-error (overrides buildflow.json)
    #[arg(long)]
    pub failure_mode: Option<FailureMode>,

    /// Maximum concurrently running stages (overrides buildflow.json)
    #[arg(long, value_parser = parse_positive)]
    pub max_concurrency: Option<usize>,

    /// Ignore fingerprints and run every stage
    #[arg(long)]
    pub force: bool,

    /// Print the plan instead of running it
    #[arg(long)]
    pub dry_run: bool,
}

impl ExecArgs {
    /// Applies the command-line overrides to the configured policy.
    pub fn policy(&self, config: &BuildflowConfig) -> ExecutionPolicy {
        let mut policy = config.policy();
        if let Some(mode) = self.failure_mode {
            policy = policy.with_failure_mode(mode);
        }
        if let Some(limit) = self.max_concurrency {
            policy = policy.with_max_concurrency(limit);
        }
        policy
    }
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheCommand {
    /// Delete the fingerprint store so every stage runs next time
    Clear,
}
