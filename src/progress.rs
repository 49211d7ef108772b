//! Classification progress reporting.
//!
//! Reports observable progress during `taxo classify` so users see how many
//! chunks are planned, which wave is running and how far the run has come.
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event emitted by the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifyProgressEvent {
    /// Input partitioned; `chunks` calls are needed for `tests` tests.
    Planned { chunks: u64, tests: u64 },
    /// A checkpoint was found; work restarts at chunk `from`.
    Resumed { from: u64, total: u64 },
    /// A wave of concurrent chunk calls is starting. Wave 0 is the anchor chunk.
    Wave { wave: u64, chunks: u64 },
    /// `n` of `total` chunks are complete.
    Classified { n: u64, total: u64 },
}

/// Reports classification progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator.
    fn report(&self, event: ClassifyProgressEvent);
}

/// Human-friendly progress on stderr: "classify  chunks  3 / 12".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ClassifyProgressEvent) {
        let line = match &event {
            ClassifyProgressEvent::Planned { chunks, tests } => format!(
                "classify  planned  {} tests in {} chunks\n",
                format_number(*tests),
                format_number(*chunks)
            ),
            ClassifyProgressEvent::Resumed { from, total } => {
                format!("classify  resuming at chunk {} / {}\n", from, total)
            }
            ClassifyProgressEvent::Wave { wave, chunks } => {
                if *wave == 0 {
                    "classify  anchor chunk\n".to_string()
                } else {
                    format!("classify  wave {}  {} chunks\n", wave, chunks)
                }
            }
            ClassifyProgressEvent::Classified { n, total } => format!(
                "classify  chunks  {} / {}\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ClassifyProgressEvent) {
        let obj = match &event {
            ClassifyProgressEvent::Planned { chunks, tests } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "chunks": chunks,
                "tests": tests
            }),
            ClassifyProgressEvent::Resumed { from, total } => serde_json::json!({
                "event": "progress",
                "phase": "resumed",
                "from": from,
                "total": total
            }),
            ClassifyProgressEvent::Wave { wave, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "wave",
                "wave": wave,
                "chunks": chunks
            }),
            ClassifyProgressEvent::Classified { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "classifying",
                "n": n,
                "total": total
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
    fn report(&self, _event: ClassifyProgressEvent) {}
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode. Caller passes it to the classifier.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
