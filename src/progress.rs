//! Analysis progress reporting.
//!
//! The engine emits ordered `(step, detail)` events as it moves through the
//! pipeline. Reporting is a side channel: it never affects control flow or
//! results. Events go to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// Receives progress events from the engine.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, step: &str, detail: &str);
}

/// Human-friendly progress on stderr: "check_cache  3 hit(s), 2 miss(es)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, step: &str, detail: &str) {
        let line = format!("{}  {}\n", step, detail);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, step: &str, detail: &str) {
        let obj = serde_json::json!({
            "event": "progress",
            "step": step,
            "detail": detail,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _step: &str, _detail: &str) {}
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

    /// Build a reporter for this mode. Caller passes it to the engine.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
