//! Progress events emitted during a migration run.
//!
//! The orchestrator and the table loader report what they are doing through
//! a [`ProgressSink`]. Sinks forward events to a channel, append them to a
//! log file, mirror them to `tracing`, or fan out to several of those.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Result;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// One progress or log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub level: EventLevel,
    pub message: String,

    /// Table the event refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Row count carried by completion events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,

    pub timestamp: DateTime<Utc>,
}

impl MigrationEvent {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            table: None,
            rows: None,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, message)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = Some(rows);
        self
    }

    /// `[YYYY-MM-DD HH:MM:SS] message` in local time.
    pub fn log_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Receives progress events. Implementations must not block for long: they
/// are called inline by the migration worker.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

/// Discards every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: MigrationEvent) {}
}

/// Forwards events to an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<MigrationEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: MigrationEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

/// Appends one timestamped line per event to a file.
pub struct LogFileSink {
    file: Mutex<File>,
}

impl LogFileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ProgressSink for LogFileSink {
    fn emit(&self, event: MigrationEvent) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{}", event.log_line()) {
            warn!("Failed to write migration log: {}", e);
        }
    }
}

/// Mirrors events to `tracing` at their level.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: MigrationEvent) {
        let table = event.table.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Info => info!(table, "{}", event.message),
            EventLevel::Warn => warn!(table, "{}", event.message),
            EventLevel::Error => error!(table, "{}", event.message),
        }
    }
}

/// Sends every event to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: MigrationEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
