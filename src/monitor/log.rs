//! Per-PR status log and the dashboard tail contract
//!
//! Append-only UTF-8 text, one record per line, `TYPE|...` framing. The
//! dashboard tails the file out of process; the parser half of the
//! contract lives here so both sides stay in one place. Write failures
//! are swallowed — the monitor never fails because of a logging write.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::state::{MonitorState, TerminalKind};

/// Snapshot embedded in STATUS records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub checks: Value,
    pub approvals: usize,
    pub stale_approvals: usize,
    pub unresolved: usize,
    pub waiting_for_reply: usize,
    pub next_check_seconds: u64,
    pub after_hours: bool,
    pub timestamp: String,
}

impl StatusSnapshot {
    pub fn capture(state: &MonitorState, next_check_seconds: u64, after_hours: bool) -> Self {
        Self {
            checks: json!({
                "passed": state.checks.passed,
                "failed": state.checks.failed,
                "pending": state.checks.pending,
                "queued": state.checks.queued,
                "cancelled": state.checks.cancelled,
                "total": state.checks.total,
                "failures": state.failed_checks,
            }),
            approvals: state.approvals.len(),
            stale_approvals: state.stale_approvals.len(),
            unresolved: state.unresolved.len(),
            waiting_for_reply: state.waiting_for_reply.len(),
            next_check_seconds,
            after_hours,
            timestamp: wall_clock(),
        }
    }
}

/// Records the writer can append
#[derive(Debug, Clone)]
pub enum LogRecord {
    Status(StatusSnapshot),
    Terminal {
        kind: TerminalKind,
        description: String,
    },
    Resuming(String),
    Paused(String),
    Stopped(String),
    Error(String),
}

impl LogRecord {
    /// One line, no trailing newline
    pub fn render(&self) -> String {
        match self {
            LogRecord::Status(snapshot) => {
                let body = serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string());
                format!("STATUS|{body}")
            }
            LogRecord::Terminal { kind, description } => {
                let body = json!({ "state": kind.tag(), "description": description });
                format!("TERMINAL|{body}")
            }
            LogRecord::Resuming(msg) => format!("RESUMING|{}|{msg}", wall_clock()),
            LogRecord::Paused(msg) => format!("PAUSED|{}|{msg}", wall_clock()),
            LogRecord::Stopped(msg) => format!("STOPPED|{}|{msg}", wall_clock()),
            LogRecord::Error(msg) => format!("ERROR|{}|{msg}", wall_clock()),
        }
    }
}

/// Local wall-clock in 12-hour form
fn wall_clock() -> String {
    Local::now().format("%I:%M:%S %p").to_string()
}

/// Append-only writer for one PR's status log
#[derive(Debug, Clone)]
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; failures are logged and swallowed
    pub fn append(&self, record: &LogRecord) {
        self.append_line(&record.render());
    }

    /// Append the session header (free text; the parser passes it through)
    pub fn write_header(&self, state: &MonitorState) {
        self.append_line(&format!(
            "# PR Monitor — {}/{}#{} {}",
            state.owner, state.repo, state.number, state.title
        ));
        if !state.url.is_empty() {
            self.append_line(&format!("# {}", state.url));
        }
    }

    fn append_line(&self, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            tracing::warn!("status log write failed ({}): {err}", self.path.display());
        }
    }
}

/// One parsed log line. `Other` carries lines the dashboard renders as-is
/// (headers, anything a newer writer might add).
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecord {
    Status(Value),
    Terminal { state: String, description: String },
    Resuming { timestamp: String, message: String },
    Paused { timestamp: String, message: String },
    Stopped { timestamp: String, message: String },
    Error { timestamp: String, message: String },
    Other(String),
}

/// Parse one log line. Total: every line maps to some record.
pub fn parse_line(line: &str) -> ParsedRecord {
    let Some((tag, rest)) = line.split_once('|') else {
        return ParsedRecord::Other(line.to_string());
    };
    match tag {
        "STATUS" => match serde_json::from_str(rest) {
            Ok(value) => ParsedRecord::Status(value),
            Err(_) => ParsedRecord::Other(line.to_string()),
        },
        "TERMINAL" => {
            let Ok(value) = serde_json::from_str::<Value>(rest) else {
                return ParsedRecord::Other(line.to_string());
            };
            ParsedRecord::Terminal {
                state: value
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: value
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        "RESUMING" | "PAUSED" | "STOPPED" | "ERROR" => {
            let (timestamp, message) = match rest.split_once('|') {
                Some((ts, msg)) => (ts.to_string(), msg.to_string()),
                None => (rest.to_string(), String::new()),
            };
            match tag {
                "RESUMING" => ParsedRecord::Resuming { timestamp, message },
                "PAUSED" => ParsedRecord::Paused { timestamp, message },
                "STOPPED" => ParsedRecord::Stopped { timestamp, message },
                _ => ParsedRecord::Error { timestamp, message },
            }
        }
        _ => ParsedRecord::Other(line.to_string()),
    }
}

/// The dashboard's tail position over a status log.
///
/// Tracks how many lines have been consumed; when the file shrinks (the
/// line count decreases), the position resets to zero and parsing resumes
/// from the top without loss.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    lines_seen: usize,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines_seen: 0,
        }
    }

    /// Read records appended since the last call
    pub fn read_new(&mut self) -> Vec<ParsedRecord> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();

        if lines.len() < self.lines_seen {
            // Truncated or rewritten: restart from byte zero
            self.lines_seen = 0;
        }

        let fresh: Vec<ParsedRecord> = lines[self.lines_seen..].iter().map(|l| parse_line(l)).collect();
        self.lines_seen = lines.len();
        fresh
    }
}
