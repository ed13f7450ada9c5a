//! Built-in listeners: journal (structured stderr) and file (append-only JSONL).

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{
    EventKind, EventLevel, EventNotifier, SanctionEvent, SanctionListener, SubscriptionId,
};

// ──────────────────── configuration ────────────────────

/// `[events]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Master switch for the built-in listeners.
    pub enabled: bool,
    /// Which built-in listeners to install.
    pub channels: Vec<String>,
    pub journal: JournalConfig,
    pub file: FileConfig,
}

impl EventsConfig {
    pub const KNOWN_CHANNELS: [&'static str; 2] = ["journal", "file"];
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string(), "file".to_string()],
            journal: JournalConfig::default(),
            file: FileConfig::default(),
        }
    }
}

/// Journal listener settings (systemd journal via stderr).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: EventLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: EventLevel::Notice,
        }
    }
}

/// File listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("swd")
                .join("events.jsonl"),
        }
    }
}

// ──────────────────── JSONL record ────────────────────

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    ts: String,
    level: EventLevel,
    summary: String,
    #[serde(flatten)]
    event: &'a SanctionEvent,
}

// ──── Journal (systemd structured stderr) ────

pub struct JournalListener {
    min_level: EventLevel,
}

impl JournalListener {
    #[must_use]
    pub const fn new(config: &JournalConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }

    /// Render the line written for `event`, or `None` when below the threshold.
    #[must_use]
    pub fn render(&self, event: &SanctionEvent) -> Option<String> {
        let level = event.level();
        if level < self.min_level {
            return None;
        }
        let priority = match level {
            EventLevel::Warning => "WARNING",
            EventLevel::Notice => "NOTICE",
            EventLevel::Info => "INFO",
        };
        Some(format!(
            "[SWD-EVENT] [{priority}] {}: {}",
            event.name(),
            event.summary()
        ))
    }
}

impl SanctionListener for JournalListener {
    fn on_event(&self, event: &SanctionEvent) -> Result<(), String> {
        if let Some(line) = self.render(event) {
            eprintln!("{line}");
        }
        Ok(())
    }
}

// ──── File (append-only JSONL) ────

pub struct FileListener {
    path: PathBuf,
}

impl FileListener {
    #[must_use]
    pub fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

impl SanctionListener for FileListener {
    fn on_event(&self, event: &SanctionEvent) -> Result<(), String> {
        let record = EventRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event,
        };
        let json = serde_json::to_string(&record).map_err(|e| e.to_string())?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("create {}: {e}", parent.display()))?;
        }

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o600);
        }
        let mut file = opts
            .open(&self.path)
            .map_err(|e| format!("open {}: {e}", self.path.display()))?;
        writeln!(file, "{json}").map_err(|e| format!("write {}: {e}", self.path.display()))
    }
}

// ──────────────────── installation ────────────────────

/// Subscribe the configured built-in listeners to every event kind.
pub fn install(notifier: &EventNotifier, config: &EventsConfig) -> Vec<SubscriptionId> {
    if !config.enabled {
        return Vec::new();
    }

    let mut ids = Vec::new();
    for channel in &config.channels {
        let listener: Arc<dyn SanctionListener> = match channel.as_str() {
            "journal" => Arc::new(JournalListener::new(&config.journal)),
            "file" => Arc::new(FileListener::new(&config.file)),
            other => {
                eprintln!("[SWD-EVENTS] unknown listener channel {other:?}, skipping");
                continue;
            }
        };
        for kind in EventKind::ALL {
            ids.push(notifier.subscribe_arc(kind, Arc::clone(&listener)));
        }
    }
    ids
}

// ──────────────────── tests ────────────────────
