//! Ingest and watch progress reporting.
//!
//! Reports observable progress during `pcat ingest`, `pcat watch` and
//! `pcat import` so users see how far a run has come. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::models::RunReport;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Batch or import: `n` pages handled out of `total`.
    Pages {
        source: String,
        n: u64,
        total: u64,
        inserted: u64,
    },
    /// The watch runner changed state.
    WatchState { source: String, state: String },
    /// Periodic watch counters.
    Watching { source: String, report: RunReport },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest bundle.pdf  1,200 / 5,000 pages  (1,150 new)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Pages {
                source,
                n,
                total,
                inserted,
            } => format!(
                "ingest {}  {} / {} pages  ({} new)\n",
                source,
                format_number(*n),
                format_number(*total),
                format_number(*inserted)
            ),
            ProgressEvent::WatchState { source, state } => {
                format!("watch {}  {}\n", source, state)
            }
            ProgressEvent::Watching { source, report } => format!(
                "watch {}  processed {}  inserted {}  skipped {}\n",
                source,
                format_number(report.processed),
                format_number(report.inserted),
                format_number(report.skipped)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Pages {
                source,
                n,
                total,
                inserted,
            } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "ingesting",
                "n": n,
                "total": total,
                "inserted": inserted
            }),
            ProgressEvent::WatchState { source, state } => serde_json::json!({
                "event": "watch_state",
                "source": source,
                "state": state
            }),
            ProgressEvent::Watching { source, report } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "watching",
                "processed": report.processed,
                "inserted": report.inserted,
                "skipped": report.skipped
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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
