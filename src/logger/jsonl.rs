//! JSONL activity log: one self-contained JSON object per line.
//!
//! The writer appends to `paths.activity_log` and rotates it by size. When the
//! file cannot be opened or written, lines go to stderr with a `[SWD-JSONL]`
//! prefix until [`JsonlWriter::reopen`] gets the file back.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::model::SanctionKey;

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Log event types matching the swd activity model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SanctionApply,
    SanctionLift,
    SanctionReapply,
    ApplyRejected,
    SweepComplete,
    SweepSkip,
    DaemonStart,
    DaemonStop,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    /// Event type identifier.
    pub event: EventType,
    /// Severity level.
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<u64>,
    /// Reason attached to the sanction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Unix second the sanction expires at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// What triggered a lift (`timer` or `sweep`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Duration of the action in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Whether the action succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// SWD error code if action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            community_id: None,
            subject_id: None,
            reason: None,
            expires_at: None,
            source: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Attach the sanction key fields.
    #[must_use]
    pub fn with_key(mut self, key: SanctionKey) -> Self {
        self.community_id = Some(key.community_id.0);
        self.subject_id = Some(key.subject_id.0);
        self
    }
}

/// Where the activity file lives and when it rotates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Rotate before a write would take the live file past this size.
    pub rotate_at_bytes: u64,
    /// Rotated generations kept as `<path>.1` .. `<path>.N`. Zero keeps none.
    pub keep_rotated: u32,
    pub fsync_interval: Duration,
}

impl JsonlConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, logging: &LoggingConfig) -> Self {
        Self {
            path: path.into(),
            rotate_at_bytes: logging.max_size_mib.saturating_mul(1024 * 1024),
            keep_rotated: logging.keep_rotated,
            fsync_interval: Duration::from_secs(logging.fsync_interval_secs),
        }
    }
}

enum Sink {
    File { out: BufWriter<File>, len: u64 },
    Stderr,
}

/// Append-only activity file with size rotation and a stderr fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    last_sync: Instant,
}

impl JsonlWriter {
    /// Open the activity file, or start on stderr if it cannot be opened.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = match open_append(&config.path) {
            Ok(sink) => sink,
            Err(e) => {
                eprintln!("[SWD-JSONL] {e}; writing activity to stderr");
                Sink::Stderr
            }
        };
        Self {
            config,
            sink,
            last_sync: Instant::now(),
        }
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => eprintln!("[SWD-JSONL] dropping unserializable entry: {e}"),
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// Flush and `sync_data` the live file.
    pub fn fsync(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    /// Whether lines are currently going to stderr instead of the file.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.sink, Sink::Stderr)
    }

    /// Try to get back onto the activity file after a failure.
    /// A no-op while the file is healthy.
    pub fn reopen(&mut self) {
        if !self.is_degraded() {
            return;
        }
        if let Ok(sink) = open_append(&self.config.path) {
            eprintln!(
                "[SWD-JSONL] activity log restored at {}",
                self.config.path.display()
            );
            self.sink = sink;
        }
    }

    fn write_line(&mut self, line: &str) {
        let line_len = line.len() as u64;
        let needs_rotation = match &self.sink {
            Sink::File { len, .. } => {
                *len > 0 && len.saturating_add(line_len) > self.config.rotate_at_bytes
            }
            Sink::Stderr => false,
        };
        if needs_rotation {
            self.rotate();
        }

        let failed = match &mut self.sink {
            Sink::File { out, len } => match out.write_all(line.as_bytes()) {
                Ok(()) => {
                    *len += line_len;
                    None
                }
                Err(e) => Some(e),
            },
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[SWD-JSONL] {line}");
                return;
            }
        };

        if let Some(e) = failed {
            eprintln!(
                "[SWD-JSONL] write to {} failed: {e}; writing activity to stderr",
                self.config.path.display()
            );
            self.sink = Sink::Stderr;
            let _ = write!(io::stderr(), "[SWD-JSONL] {line}");
        } else if self.last_sync.elapsed() >= self.config.fsync_interval {
            self.fsync();
        }
    }

    fn rotate(&mut self) {
        // Drop the handle first so the rename sees a closed file.
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
        self.sink = Sink::Stderr;

        let base = &self.config.path;
        let keep = self.config.keep_rotated;
        if keep == 0 {
            let _ = fs::remove_file(base);
        } else {
            let _ = fs::remove_file(generation(base, keep));
            for n in (1..keep).rev() {
                let _ = fs::rename(generation(base, n), generation(base, n + 1));
            }
            let _ = fs::rename(base, generation(base, 1));
        }

        match open_append(base) {
            Ok(sink) => self.sink = sink,
            Err(e) => eprintln!("[SWD-JSONL] reopen after rotation failed: {e}"),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

fn open_append(path: &Path) -> Result<Sink> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SwdError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SwdError::io(path, source))?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok(Sink::File {
        out: BufWriter::new(file),
        len,
    })
}

/// `activity.jsonl` → `activity.jsonl.<n>`.
fn generation(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
