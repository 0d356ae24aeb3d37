//! Index run progress reporting.
//!
//! The orchestrator reports each stage with an overall completion
//! fraction. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use serde::Serialize;

/// Stages of one index run, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    DetectDeleted,
    FilterUnchanged,
    PerFileExtract,
    BatchEmbed,
    Store,
    UpdateMetadata,
    Done,
}

impl Stage {
    /// Overall fraction range `[start, end]` covered by the stage.
    pub fn range(self) -> (f32, f32) {
        match self {
            Stage::Collect => (0.0, 0.05),
            Stage::DetectDeleted => (0.05, 0.05),
            Stage::FilterUnchanged => (0.05, 0.10),
            Stage::PerFileExtract => (0.10, 0.85),
            Stage::BatchEmbed => (0.85, 0.90),
            Stage::Store => (0.90, 0.95),
            Stage::UpdateMetadata => (0.95, 1.0),
            Stage::Done => (1.0, 1.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Collect => "collecting",
            Stage::DetectDeleted => "detecting deleted",
            Stage::FilterUnchanged => "filtering unchanged",
            Stage::PerFileExtract => "extracting",
            Stage::BatchEmbed => "embedding",
            Stage::Store => "storing",
            Stage::UpdateMetadata => "updating metadata",
            Stage::Done => "done",
        }
    }
}

/// A single progress event: `n` of `total` items done within `stage`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub n: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(stage: Stage, n: u64, total: u64) -> Self {
        Self { stage, n, total }
    }

    /// Overall run fraction in `[0, 1]`, never decreasing within a stage.
    pub fn fraction(&self) -> f32 {
        let (start, end) = self.stage.range();
        if self.total == 0 {
            return end;
        }
        let within = (self.n.min(self.total) as f32) / (self.total as f32);
        start + (end - start) * within
    }
}

/// Receives progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  42%  extracting  12 / 40 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!(
            "index {:>4.0}%  {}  {} / {}\n",
            event.fraction() * 100.0,
            event.stage.label(),
            format_number(event.n),
            format_number(event.total)
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage,
            "n": event.n,
            "total": event.total,
            "fraction": event.fraction(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every event for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn stage_ranges_are_ordered() {
        let stages = [
            Stage::Collect,
            Stage::DetectDeleted,
            Stage::FilterUnchanged,
            Stage::PerFileExtract,
            Stage::BatchEmbed,
            Stage::Store,
            Stage::UpdateMetadata,
            Stage::Done,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].range().1 <= pair[1].range().0 + f32::EPSILON);
        }
        assert_eq!(Stage::Done.range(), (1.0, 1.0));
    }

    #[test]
    fn fraction_interpolates_within_stage() {
        let half = ProgressEvent::new(Stage::PerFileExtract, 5, 10).fraction();
        assert!((half - 0.475).abs() < 1e-6);
        assert_eq!(ProgressEvent::new(Stage::Store, 0, 0).fraction(), 0.95);
        assert_eq!(ProgressEvent::new(Stage::Done, 1, 1).fraction(), 1.0);
    }

    #[test]
    fn stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Stage::PerFileExtract).unwrap(),
            "\"per_file_extract\""
        );
    }
}
