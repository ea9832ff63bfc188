//! Index update progress reporting.
//!
//! Embedding a large history for the first time can take minutes, so
//! `magic-cli search` reports how much is left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts, and is switched off
//! entirely in `--output-only` mode or when stderr is not a terminal.

use std::io::Write;

/// A single progress event for an index update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// The stored index was discarded and will be rebuilt from the first line.
    Rebuilding { reason: String },
    /// `n` of `total` new history lines are in the index.
    Embedding { n: u64, total: u64 },
    /// The update finished.
    Done { embedded: u64, reused: u64 },
}

/// Receives index progress events.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 lines".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Rebuilding { reason } => {
                format!("index  rebuilding ({})\n", reason)
            }
            IndexProgressEvent::Embedding { n, total } => format!(
                "\rindex  embedding  {} / {} lines",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Done { embedded, reused } => format!(
                "\rindex  up to date  ({} embedded, {} reused)\n",
                format_number(*embedded),
                format_number(*reused)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
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

/// Progress mode for the CLI: off or human (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY and output is not machine-bound.
    pub fn for_output(output_only: bool) -> Self {
        if !output_only && atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn output_only_disables_progress() {
        assert_eq!(ProgressMode::for_output(true), ProgressMode::Off);
    }
}
