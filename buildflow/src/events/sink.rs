//! Event sink trait and implementations.

use super::{EventKind, PipelineEvent};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info, Level};

/// Trait for event sinks that receive pipeline events.
///
/// The executor emits one event per stage transition through
/// [`try_emit`](Self::try_emit), which must never block for long or panic.
#[async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &PipelineEvent) {
        self.try_emit(event);
    }

    /// Emits an event without blocking.
    ///
    /// Errors are logged and suppressed.
    fn try_emit(&self, event: &PipelineEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &PipelineEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");
        let status = event.result.as_ref().map(|r| r.status().to_string());
        if self.level == Level::DEBUG {
            debug!(
                event_type = event.kind.as_str(),
                run_id = %event.run_id,
                stage = %stage,
                status = ?status,
                message = ?event.message,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = event.kind.as_str(),
                run_id = %event.run_id,
                stage = %stage,
                status = ?status,
                message = ?event.message,
                "Event: {}", event.kind
            );
        }
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the kinds of events emitted for one stage, in emission order.
    #[must_use]
    pub fn kinds_for(&self, stage: &str) -> Vec<EventKind> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage.as_deref() == Some(stage))
            .map(|e| e.kind)
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use uuid::Uuid;

    fn event(kind: EventKind, stage: Option<&str>) -> PipelineEvent {
        let mut event = PipelineEvent::new(kind, Uuid::new_v4(), "demo");
        if let Some(stage) = stage {
            event = event.with_result(StageResult::pending(stage, true));
        }
        event
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(&event(EventKind::RunStarted, None)).await;
        sink.try_emit(&event(EventKind::StageStarted, Some("build")));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::default();
        sink.emit(&event(EventKind::StageSucceeded, Some("build"))).await;
        LoggingEventSink::debug().try_emit(&event(EventKind::RunFinished, None));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&event(EventKind::StageStarted, Some("build"))).await;
        sink.try_emit(&event(EventKind::StageFailed, Some("build")));
        sink.try_emit(&event(EventKind::StageCancelled, Some("test")));

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.kinds_for("build"),
            vec![EventKind::StageStarted, EventKind::StageFailed]
        );
        assert_eq!(sink.events_of_kind(EventKind::StageCancelled).len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
