use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use buildflow::cancellation::CancellationToken;
use buildflow::errors::exit_codes;
use buildflow::pipeline::PipelineExecutor;
use buildflow::report::ReportAggregator;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::plan::print_plan;
use super::{load, BuildArgs, ExecArgs};
use crate::console::{self, ConsoleEventSink, OutputFormat};

/// Runs `build.command` and returns the report's exit code.
pub async fn cmd_run(
    root: &Path,
    build: &BuildArgs,
    exec: &ExecArgs,
    format: OutputFormat,
) -> Result<i32> {
    let loaded = load(root, build)?;
    if exec.dry_run {
        print_plan(&loaded.graph, format)?;
        return Ok(exit_codes::SUCCESS);
    }

    let tracker = loaded
        .config
        .tracker(root)
        .with_config(loaded.project.fingerprint_config().into_iter().collect())
        .with_force(exec.force);
    let policy = exec.policy(&loaded.config);
    debug!(
        pipeline = loaded.graph.name(),
        stages = loaded.graph.len(),
        max_concurrency = policy.max_concurrency,
        failure_mode = %policy.failure_mode,
        "Starting run"
    );

    let executor = PipelineExecutor::new(Arc::new(loaded.config.runner(root)))
        .with_tracker(Arc::new(tracker))
        .with_event_sink(Arc::new(ConsoleEventSink));

    let token = Arc::new(CancellationToken::new());
    let interrupt = cancel_on_interrupt(Arc::clone(&token));
    let run = executor.execute(&loaded.graph, &policy, &token).await;
    interrupt.abort();

    let report = ReportAggregator::summarize(&run?);
    console::print_report(&report, format)?;
    Ok(report.exit_code)
}

fn cancel_on_interrupt(token: Arc<CancellationToken>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running stages");
            token.cancel("interrupted");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildflow::presets::CmakeCommand;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let dir = TempDir::new().unwrap();
        let exec = ExecArgs {
            dry_run: true,
            ..ExecArgs::default()
        };

        let code = cmd_run(
            dir.path(),
            &BuildArgs::for_command(CmakeCommand::Build),
            &exec,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(code, exit_codes::SUCCESS);
        assert!(!dir.path().join(".buildflow").exists());
        assert!(!dir.path().join("build").exists());
    }

    #[tokio::test]
    async fn test_bad_config_fails_before_running() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("buildflow.json"), "{").unwrap();

        let err = cmd_run(
            dir.path(),
            &BuildArgs::for_command(CmakeCommand::Build),
            &ExecArgs::default(),
            OutputFormat::Text,
        )
        .await
        .unwrap_err();

        assert_eq!(crate::error_exit_code(&err), exit_codes::CONFIGURATION);
    }
}
