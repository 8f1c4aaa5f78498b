//! Terminal output.
//!
//! Stage progress and messages go to stderr so that stdout carries only the
//! report (or the plan), which keeps `--format json` output parseable.

use anyhow::Result;
use buildflow::events::{EventKind, EventSink, PipelineEvent};
use buildflow::report::{status_line, Report};
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

pub mod symbols {
    pub const SUCCESS: &str = "✓";
    pub const ERROR: &str = "✗";
    pub const INFO: &str = "•";
}

pub fn print_success(message: &str) {
    eprintln!(
        "{} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stderr, |s| s.green()),
        message
    );
}

pub fn print_info(message: &str) {
    eprintln!(
        "{} {}",
        symbols::INFO.if_supports_color(Stream::Stderr, |s| s.cyan()),
        message
    );
}

pub fn print_error(message: &str) {
    eprintln!(
        "{} {}",
        symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
        message
    );
}

pub fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

/// Prints one status line per finished stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEventSink;

impl ConsoleEventSink {
    fn line(event: &PipelineEvent) -> Option<String> {
        let result = event.result.as_ref()?;
        let line = status_line(result);
        let styled = match event.kind {
            EventKind::StageSucceeded => line.if_supports_color(Stream::Stderr, |s| s.green()).to_string(),
            EventKind::StageFailed => line.if_supports_color(Stream::Stderr, |s| s.red()).to_string(),
            EventKind::StageSkipped => line.if_supports_color(Stream::Stderr, |s| s.dimmed()).to_string(),
            EventKind::StageCancelled => line.if_supports_color(Stream::Stderr, |s| s.yellow()).to_string(),
            EventKind::RunStarted | EventKind::StageStarted | EventKind::RunFinished => return None,
        };
        Some(styled)
    }
}

impl EventSink for ConsoleEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        if let Some(line) = Self::line(event) {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildflow::core::StageResult;
    use buildflow::process::ProcessOutput;
    use uuid::Uuid;

    fn event(kind: EventKind, result: StageResult) -> PipelineEvent {
        PipelineEvent::new(kind, Uuid::new_v4(), "cmake").with_result(result)
    }

    #[test]
    fn test_terminal_events_print_status_line() {
        let mut result = StageResult::pending("build", true);
        result.start().unwrap();
        result.succeed(ProcessOutput::default(), None).unwrap();

        let line = ConsoleEventSink::line(&event(EventKind::StageSucceeded, result)).unwrap();
        assert!(line.contains("ok"));
        assert!(line.contains("build"));
    }

    #[test]
    fn test_start_events_are_silent() {
        let mut result = StageResult::pending("build", true);
        result.start().unwrap();
        assert!(ConsoleEventSink::line(&event(EventKind::StageStarted, result)).is_none());

        let run = PipelineEvent::new(EventKind::RunFinished, Uuid::new_v4(), "cmake");
        assert!(ConsoleEventSink::line(&run).is_none());
    }

    #[test]
    fn test_cancelled_line_carries_reason() {
        let mut result = StageResult::pending("test", true);
        result.cancel("dependency 'build' failed").unwrap();

        let line = ConsoleEventSink::line(&event(EventKind::StageCancelled, result)).unwrap();
        assert!(line.contains("cancelled"));
        assert!(line.contains("dependency 'build' failed"));
    }
}
