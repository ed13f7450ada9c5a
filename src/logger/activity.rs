//! Activity logger: a dedicated thread owns the `JsonlWriter`.
//!
//! All other threads send `ActivityEvent` via a bounded crossbeam channel. Non-blocking
//! `try_send()` ensures apply, lift and sweep paths are never blocked by logging
//! back-pressure.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::model::{LiftSource, SanctionKey};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// How often a degraded writer retries its file.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

// ──────────────────── public event type ────────────────────

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    SanctionApplied {
        key: SanctionKey,
        reason: String,
        /// `None` for indefinite sanctions.
        expires_at: Option<i64>,
    },
    SanctionLifted {
        key: SanctionKey,
        /// `None` for an explicit lift.
        source: Option<LiftSource>,
        /// Whether the platform restriction was actually removed.
        removed: bool,
    },
    SanctionReapplied {
        key: SanctionKey,
        reason: String,
        expires_at: i64,
    },
    ApplyRejected {
        key: SanctionKey,
        error_code: String,
        error_message: String,
    },
    SweepCompleted {
        examined: usize,
        lifted: usize,
        skipped: usize,
        failed: usize,
        duration_ms: u64,
    },
    SweepSkipped {
        key: SanctionKey,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events counter
    /// is incremented.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the activity logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    /// Logger writing to `path` with the `[logging]` limits.
    pub fn new(path: impl Into<PathBuf>, logging: &LoggingConfig) -> Self {
        Self {
            jsonl_config: JsonlConfig::new(path, logging),
            channel_capacity: logging.channel_capacity,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The logger thread runs until `handle.shutdown()` is called or all senders
/// are dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("swd-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, &dropped_clone);
        })
        .map_err(|e| SwdError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    loop {
        let event = match rx.recv_timeout(RECOVERY_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                jsonl.reopen();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SanctionApplied {
            key,
            reason,
            expires_at,
        } => {
            let mut e = LogEntry::new(EventType::SanctionApply, Severity::Info).with_key(*key);
            e.reason = Some(reason.clone());
            e.expires_at = *expires_at;
            if expires_at.is_none() {
                e.details = Some("indefinite".to_string());
            }
            e.ok = Some(true);
            e
        }
        ActivityEvent::SanctionLifted {
            key,
            source,
            removed,
        } => {
            let mut e = LogEntry::new(EventType::SanctionLift, Severity::Info).with_key(*key);
            e.source = Some(source.map_or("explicit", LiftSource::as_str).to_string());
            e.ok = Some(*removed);
            if !removed {
                e.details = Some("restriction already absent on platform".to_string());
            }
            e
        }
        ActivityEvent::SanctionReapplied {
            key,
            reason,
            expires_at,
        } => {
            let mut e = LogEntry::new(EventType::SanctionReapply, Severity::Info).with_key(*key);
            e.reason = Some(reason.clone());
            e.expires_at = Some(*expires_at);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ApplyRejected {
            key,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ApplyRejected, Severity::Warning).with_key(*key);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::SweepCompleted {
            examined,
            lifted,
            skipped,
            failed,
            duration_ms,
        } => {
            let severity = if *failed > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::SweepComplete, severity);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "examined={examined} lifted={lifted} skipped={skipped} failed={failed}"
            ));
            e.ok = Some(*failed == 0);
            e
        }
        ActivityEvent::SweepSkipped { key, details } => {
            let mut e = LogEntry::new(EventType::SweepSkip, Severity::Warning).with_key(*key);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => {
            // Handled by the thread loop before conversion.
            LogEntry::new(EventType::DaemonStop, Severity::Info)
        }
    }
}

// ──────────────────── tests ────────────────────
