//! Generation progress reporting.
//!
//! Reports observable progress during `marg outline` and `marg explain` so
//! users see how many chunks were planned, how many need generating, and how
//! far the generator has got. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Planning and reconciliation finished.
    Planned {
        stage: String,
        planned: u64,
        pending: u64,
    },
    /// `n` of `total` generation jobs have finished (accepted or failed).
    Generating {
        stage: String,
        n: u64,
        total: u64,
        failed: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "outline  generating  12 / 40 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Planned {
                stage,
                planned,
                pending,
            } => format!(
                "{}  planned {} / {} to generate\n",
                stage,
                format_number(*planned),
                format_number(*pending)
            ),
            ProgressEvent::Generating {
                stage,
                n,
                total,
                failed,
            } => {
                let mut line = format!(
                    "{}  generating  {} / {}",
                    stage,
                    format_number(*n),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
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
            ProgressEvent::Planned {
                stage,
                planned,
                pending,
            } => serde_json::json!({
                "event": "progress",
                "stage": stage,
                "phase": "planned",
                "planned": planned,
                "pending": pending
            }),
            ProgressEvent::Generating {
                stage,
                n,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "stage": stage,
                "phase": "generating",
                "n": n,
                "total": total,
                "failed": failed
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

fn format_number(n: u64) -> String {
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
