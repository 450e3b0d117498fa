//! Request journal: a bounded in-memory ring of log entries, persisted as JSONL.
//!
//! Every entry is also emitted as a `tracing` event, so the journal and the
//! console log tell the same story.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            request_id: None,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    fn trace(&self) {
        let request_id = self.request_id.as_deref().unwrap_or("-");
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Info => {
                tracing::info!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Warn => {
                tracing::warn!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(component = %self.component, request_id, "{}", self.message)
            }
        }
    }
}

pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

impl Logger {
    /// Open (or create) the journal file, replaying its tail into memory.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            entries,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Journal kept only in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
        }
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        entry.trace();
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    /// Logger whose entries all carry `request_id`.
    pub fn for_request(&self, request_id: impl Into<String>) -> RequestLogger {
        RequestLogger {
            logger: self.clone(),
            request_id: request_id.into(),
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

/// Journal handle scoped to one request.
#[derive(Clone)]
pub struct RequestLogger {
    logger: SharedLogger,
    request_id: String,
}

impl RequestLogger {
    fn entry(&self, level: LogLevel, component: &str, message: String) -> LogEntry {
        LogEntry::new(level, component, message).with_request_id(self.request_id.clone())
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.logger
            .log(self.entry(LogLevel::Debug, component, message.into()));
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.logger
            .log(self.entry(LogLevel::Info, component, message.into()));
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.logger
            .log(self.entry(LogLevel::Warn, component, message.into()));
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.logger
            .log(self.entry(LogLevel::Error, component, message.into()));
    }

    pub fn info_with_context(
        &self,
        component: &str,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.logger.log(
            self.entry(LogLevel::Info, component, message.into())
                .with_context(context),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_entries_persist_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let logger = SharedLogger::new(&path).unwrap();
            logger.info("startup", "listening");
            logger.for_request("req-1").warn("proxy", "upstream slow");
        }

        let reloaded = SharedLogger::new(&path).unwrap();
        let recent = reloaded.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "upstream slow");
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[0].request_id.as_deref(), Some("req-1"));
        assert_eq!(recent[1].component, "startup");
        assert!(recent[1].request_id.is_none());
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let logger = SharedLogger::in_memory();
        for i in 0..5 {
            logger.info("test", format!("entry {i}"));
        }

        let recent = logger.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "entry 4");
        assert_eq!(recent[1].message, "entry 3");
    }

    #[test]
    fn test_context_attached() {
        let logger = SharedLogger::in_memory();
        logger.for_request("req-9").info_with_context(
            "server",
            "resolved",
            serde_json::json!({"target_lang": "en"}),
        );

        let entry = &logger.recent(1)[0];
        assert_eq!(entry.context.as_ref().unwrap()["target_lang"], "en");
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut logger = Logger::in_memory();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            logger.log(LogEntry::new(LogLevel::Debug, "test", i.to_string()));
        }
        assert_eq!(logger.recent(usize::MAX).len(), MAX_LOG_ENTRIES);
        assert_eq!(logger.recent(1)[0].message, (MAX_LOG_ENTRIES + 4).to_string());
    }
}
