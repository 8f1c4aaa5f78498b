use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use buildflow::errors::{exit_codes, BuildflowError, GraphError};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod console;

use cmd::{BuildArgs, CacheCommand, ExecArgs};
use console::OutputFormat;

/// buildflow - dependency-aware, incremental CMake pipeline runner
#[derive(Parser, Debug)]
#[command(name = "buildflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root containing CMakeLists.txt and buildflow.json
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Report format
    #[arg(long, global = true, value_enum, default_value_t)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command's stages
    Run {
        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Print the batches a command would run, without running anything
    Plan {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Manage the fingerprint store
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Maps an error to the process exit code.
fn error_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<BuildflowError>() {
        e.exit_code()
    } else if err.downcast_ref::<GraphError>().is_some() {
        exit_codes::CONFIGURATION
    } else {
        exit_codes::INTERNAL
    }
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run { build, exec } => {
            cmd::cmd_run(&cli.project_dir, &build, &exec, cli.format).await
        }
        Commands::Plan { build } => cmd::cmd_plan(&cli.project_dir, &build, cli.format),
        Commands::Cache { action } => cmd::cmd_cache(&cli.project_dir, &action),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => to_exit_code(code),
        Err(err) => {
            console::print_error(&format!("{err:#}"));
            to_exit_code(error_exit_code(&err))
        }
    }
}
