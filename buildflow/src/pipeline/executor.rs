//! Concurrent DAG execution.
//!
//! The executor keeps a ready set ordered by `(batch, declaration index)`
//! and launches stages from it while fewer than `max_concurrency` are
//! running. Before launch each stage passes, in order:
//!
//! 1. dependency satisfaction (a failed or cancelled dependency, or one
//!    skipped for any reason other than "unchanged", cancels the stage)
//! 2. the run's cancellation token
//! 3. the stage's own "nothing to do" marker
//! 4. the incremental tracker (an unchanged stage is skipped)
//! 5. the tool capability check
//!
//! Completions are awaited through a `FuturesUnordered` of spawned tasks, so
//! the loop reacts to whichever stage finishes first.

use super::{ExecutionPolicy, FailureCollector, FailureRecord, StageGraph};
use crate::cancellation::CancellationToken;
use crate::core::{PipelineRun, SkipReason, StageError, StageErrorKind, StageStatus};
use crate::errors::{BuildflowError, ProcessError};
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::incremental::{Fingerprint, IncrementalTracker};
use crate::process::{ProcessOutput, ProcessRunner};
use crate::report::status_line;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

type StageTask = BoxFuture<'static, (usize, Result<Result<ProcessOutput, ProcessError>, JoinError>)>;

/// Runs a [`StageGraph`] against a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    runner: Arc<dyn ProcessRunner>,
    tracker: Option<Arc<IncrementalTracker>>,
    events: Arc<dyn EventSink>,
}

impl PipelineExecutor {
    /// Creates an executor without incremental tracking or event sink.
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            tracker: None,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Enables incremental skipping through `tracker`.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<IncrementalTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the tracker, if any.
    #[must_use]
    pub fn tracker(&self) -> Option<&Arc<IncrementalTracker>> {
        self.tracker.as_ref()
    }

    /// Executes every stage of `graph` and returns the finalized run.
    ///
    /// Stage failures are recorded in the run, not returned as errors.
    /// Cancelling `cancel` stops launching stages and terminates running
    /// ones; the run then finishes as cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`BuildflowError::Internal`] or
    /// [`BuildflowError::InvalidTransition`] if the executor's own
    /// bookkeeping breaks.
    pub async fn execute(
        &self,
        graph: &StageGraph,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, BuildflowError> {
        let token = cancel.child_token();
        let mut scheduler = Scheduler::new(self, graph, policy, Arc::clone(&token));

        info!(
            pipeline = %graph.name(),
            run_id = %scheduler.run.run_id,
            stages = graph.len(),
            max_concurrency = policy.concurrency(),
            failure_mode = %policy.failure_mode,
            "Starting pipeline"
        );
        self.events.try_emit(&PipelineEvent::new(
            EventKind::RunStarted,
            scheduler.run.run_id,
            graph.name(),
        ));

        if let Err(e) = scheduler.drive(policy.concurrency()).await {
            token.cancel(format!("internal error: {e}"));
            return Err(e);
        }

        let mut run = scheduler.run;
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.flush() {
                warn!(error = %e, "Failed to rewrite fingerprint store");
            }
        }

        let status = run.finalize(cancel.is_cancelled())?;
        info!(
            pipeline = %run.pipeline,
            run_id = %run.run_id,
            status = %status,
            wall_clock_ms = run.wall_clock_ms(),
            "Pipeline finished"
        );
        self.events.try_emit(
            &PipelineEvent::new(EventKind::RunFinished, run.run_id, run.pipeline.clone())
                .with_message(status.to_string()),
        );
        Ok(run)
    }
}

struct Scheduler<'a> {
    executor: &'a PipelineExecutor,
    graph: &'a StageGraph,
    token: Arc<CancellationToken>,
    run: PipelineRun,
    /// Dependencies of each stage that are not yet terminal.
    waiting_on: Vec<usize>,
    ready: BTreeSet<(usize, usize)>,
    fingerprints: Vec<Option<Fingerprint>>,
    failures: FailureCollector,
}

impl<'a> Scheduler<'a> {
    fn new(
        executor: &'a PipelineExecutor,
        graph: &'a StageGraph,
        policy: &ExecutionPolicy,
        token: Arc<CancellationToken>,
    ) -> Self {
        let run = PipelineRun::new(
            graph.name(),
            graph.stages().iter().map(|s| (s.name.as_str(), s.required)),
        );
        let waiting_on: Vec<usize> = (0..graph.len())
            .map(|idx| graph.dependency_indices(idx).len())
            .collect();
        let ready = waiting_on
            .iter()
            .enumerate()
            .filter(|(_, waiting)| **waiting == 0)
            .map(|(idx, _)| (graph.batch_index(idx), idx))
            .collect();
        Self {
            executor,
            graph,
            token,
            run,
            waiting_on,
            ready,
            fingerprints: vec![None; graph.len()],
            failures: FailureCollector::new(policy.failure_mode),
        }
    }

    async fn drive(&mut self, limit: usize) -> Result<(), BuildflowError> {
        let mut in_flight: FuturesUnordered<StageTask> = FuturesUnordered::new();
        loop {
            while in_flight.len() < limit {
                let Some((_, idx)) = self.ready.pop_first() else {
                    break;
                };
                if let Some(task) = self.dispatch(idx)? {
                    in_flight.push(task);
                }
            }
            match in_flight.next().await {
                Some((idx, joined)) => self.complete(idx, joined)?,
                None => break,
            }
        }

        if let Some(open) = self.run.results().iter().find(|r| !r.status().is_terminal()) {
            return Err(BuildflowError::Internal(format!(
                "scheduler stopped with stage '{}' still {}",
                open.name,
                open.status()
            )));
        }
        Ok(())
    }

    /// Runs the pre-launch checks and either resolves the stage on the spot
    /// or spawns its process.
    fn dispatch(&mut self, idx: usize) -> Result<Option<StageTask>, BuildflowError> {
        let (executor, graph) = (self.executor, self.graph);
        let spec = graph.stage_at(idx);

        let unsatisfied = graph
            .dependency_indices(idx)
            .iter()
            .map(|&dep| self.run.result_at(dep))
            .find(|dep| !dep.satisfies_dependents());
        if let Some(dep) = unsatisfied {
            let reason = format!("dependency '{}' {}", dep.name, dep.status());
            self.run.result_at_mut(idx).cancel(reason)?;
            self.finish(idx, EventKind::StageCancelled);
            return Ok(None);
        }

        if self.token.is_cancelled() {
            let reason = self
                .token
                .reason()
                .unwrap_or_else(|| "pipeline cancelled".to_string());
            self.run.result_at_mut(idx).cancel(reason)?;
            self.finish(idx, EventKind::StageCancelled);
            return Ok(None);
        }

        if let Some(reason) = &spec.nothing_to_do {
            warn!(stage = %spec.name, reason = %reason, "Nothing to do, stage skipped");
            let reason = SkipReason::NothingToDo {
                reason: reason.clone(),
            };
            self.run.result_at_mut(idx).skip(reason, None)?;
            self.finish(idx, EventKind::StageSkipped);
            return Ok(None);
        }

        if let Some(tracker) = &executor.tracker {
            let decision = tracker.decide(spec);
            if !decision.run {
                let fingerprint = decision.fingerprint.map(|f| f.as_str().to_string());
                self.run
                    .result_at_mut(idx)
                    .skip(SkipReason::Unchanged, fingerprint)?;
                self.finish(idx, EventKind::StageSkipped);
                return Ok(None);
            }
            debug!(stage = %spec.name, reason = %decision.reason, "Stage will run");
            self.fingerprints[idx] = decision.fingerprint;
        }

        let missing = spec
            .launch_tools()
            .into_iter()
            .find(|tool| !executor.runner.is_available(tool, &spec.command));
        if let Some(tool) = missing {
            if spec.required {
                let error = StageError::from(&ProcessError::tool_not_found(tool));
                self.run.result_at_mut(idx).fail(error)?;
                self.record_failure(idx);
                self.finish(idx, EventKind::StageFailed);
            } else {
                warn!(stage = %spec.name, tool = %tool, "Optional stage skipped: tool not available");
                let reason = SkipReason::ToolUnavailable {
                    tool: tool.to_string(),
                };
                self.run.result_at_mut(idx).skip(reason, None)?;
                self.finish(idx, EventKind::StageSkipped);
            }
            return Ok(None);
        }

        if spec.cacheable {
            if let Some(tracker) = &executor.tracker {
                if let Err(e) = tracker.invalidate(&spec.name) {
                    let error = StageError::new(
                        StageErrorKind::Internal,
                        format!("cannot invalidate fingerprint: {e}"),
                    );
                    self.run.result_at_mut(idx).fail(error)?;
                    self.record_failure(idx);
                    self.finish(idx, EventKind::StageFailed);
                    return Ok(None);
                }
            }
        }

        self.run.result_at_mut(idx).start()?;
        self.emit(idx, EventKind::StageStarted);
        debug!(stage = %spec.name, command = %spec.command, "Launching stage");

        let runner = Arc::clone(&executor.runner);
        let token = Arc::clone(&self.token);
        let command = spec.command.clone();
        let handle = tokio::spawn(async move { runner.run(&command, &token).await });
        Ok(Some(handle.map(move |joined| (idx, joined)).boxed()))
    }

    fn complete(
        &mut self,
        idx: usize,
        joined: Result<Result<ProcessOutput, ProcessError>, JoinError>,
    ) -> Result<(), BuildflowError> {
        let graph = self.graph;
        let spec = graph.stage_at(idx);
        match joined {
            Ok(Ok(output)) if spec.command.is_success(output.exit_code) => {
                let fingerprint = self.fingerprints[idx].take();
                let result = self.run.result_at_mut(idx);
                result.succeed(output, fingerprint.as_ref().map(|f| f.as_str().to_string()))?;
                let duration_ms = result.duration_ms();
                if let (Some(tracker), Some(fingerprint)) = (&self.executor.tracker, &fingerprint) {
                    if spec.cacheable {
                        if let Err(e) = tracker.record_success(&spec.name, fingerprint, duration_ms) {
                            warn!(stage = %spec.name, error = %e, "Failed to record fingerprint");
                        }
                    }
                }
                self.finish(idx, EventKind::StageSucceeded);
            }
            Ok(Ok(output)) => {
                self.run.result_at_mut(idx).fail_with_output(output)?;
                self.record_failure(idx);
                self.finish(idx, EventKind::StageFailed);
            }
            Ok(Err(ProcessError::Cancelled { reason, .. })) => {
                self.run.result_at_mut(idx).cancel(reason)?;
                self.finish(idx, EventKind::StageCancelled);
            }
            Ok(Err(e)) => {
                let error = StageError::from(&e);
                let result = self.run.result_at_mut(idx);
                match e {
                    ProcessError::Timeout { stdout, stderr, .. } => {
                        result.fail_with_partial_output(error, stdout, stderr)?;
                    }
                    _ => result.fail(error)?,
                }
                self.record_failure(idx);
                self.finish(idx, EventKind::StageFailed);
            }
            Err(e) => {
                let error = StageError::new(
                    StageErrorKind::Internal,
                    format!("stage task did not complete: {e}"),
                );
                self.run.result_at_mut(idx).fail(error)?;
                self.record_failure(idx);
                self.finish(idx, EventKind::StageFailed);
            }
        }
        Ok(())
    }

    fn record_failure(&mut self, idx: usize) {
        let result = self.run.result_at(idx);
        let Some(record) = FailureRecord::from_result(result) else {
            return;
        };
        if !record.required {
            warn!(stage = %record.stage, error = %record.message, "Optional stage failed");
        }
        let stage = record.stage.clone();
        if self.failures.record_failure(record) {
            self.token.cancel(format!("stage '{stage}' failed"));
        }
    }

    /// Emits the terminal event, logs the status line, and releases
    /// dependents whose dependencies are now all terminal.
    fn finish(&mut self, idx: usize, kind: EventKind) {
        let result = self.run.result_at(idx);
        match result.status() {
            StageStatus::Failed => warn!(stage = %result.name, "{}", status_line(result)),
            _ => info!(stage = %result.name, "{}", status_line(result)),
        }
        self.emit(idx, kind);

        let graph = self.graph;
        for &dependent in graph.dependent_indices(idx) {
            self.waiting_on[dependent] -= 1;
            if self.waiting_on[dependent] == 0 {
                self.ready.insert((graph.batch_index(dependent), dependent));
            }
        }
    }

    fn emit(&self, idx: usize, kind: EventKind) {
        let event = PipelineEvent::new(kind, self.run.run_id, self.run.pipeline.clone())
            .with_result(self.run.result_at(idx).clone());
        self.executor.events.try_emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FailureMode, PipelineBuilder, StageSpec};
    use crate::process::CommandSpec;
    use crate::testing::{Script, ScriptedRunner};

    fn stage(name: &str, deps: &[&str]) -> StageSpec {
        StageSpec::new(name, CommandSpec::new(name)).with_dependencies(deps.iter().copied())
    }

    #[tokio::test]
    async fn test_linear_pipeline_succeeds() {
        let graph = PipelineBuilder::new("linear")
            .stage(stage("a", &[]))
            .unwrap()
            .stage(stage("b", &["a"]))
            .unwrap()
            .build()
            .unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let executor = PipelineExecutor::new(runner.clone());

        let run = executor
            .execute(&graph, &ExecutionPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.status(), crate::core::RunStatus::Succeeded);
        assert_eq!(run.exit_code(), 0);
        assert_eq!(runner.calls(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_cancels_dependent() {
        let graph = PipelineBuilder::new("p")
            .stage(stage("a", &[]))
            .unwrap()
            .stage(stage("b", &["a"]))
            .unwrap()
            .build()
            .unwrap();
        let runner = Arc::new(ScriptedRunner::new().with_script("a", Script::exit(3)));
        let executor = PipelineExecutor::new(runner.clone());
        let policy = ExecutionPolicy::default().with_failure_mode(FailureMode::ContinueOnError);

        let run = executor
            .execute(&graph, &policy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.stage_status("a"), Some(StageStatus::Failed));
        assert_eq!(run.stage_status("b"), Some(StageStatus::Cancelled));
        assert_eq!(
            run.result("b").unwrap().cancel_reason(),
            Some("dependency 'a' failed")
        );
        assert!(!runner.was_called("b"));
        assert_eq!(run.exit_code(), 1);
    }
}
