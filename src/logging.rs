//! Structured logging for entity lifecycles and mapper activity.
//!
//! Records go through the [`LogSink`] trait so that callers decide where
//! they land. [`JsonlSink`] writes one JSON object per line, the way the
//! run logs have always looked; [`MemorySink`] keeps records around for
//! inspection.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Sink trait
// =============================================================================

/// Destination for log records.
///
/// `enabled` lets producers skip building an expensive payload (an
/// entity's event JSON) when the record would be dropped anyway.
pub trait LogSink: Send + Sync {
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn record(&self, level: Level, qualifier: &str, payload: &str, msg: &str);
}

/// A single captured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub qualifier: String,
    pub payload: String,
    pub msg: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{}]<msg:{}>", self.qualifier, self.payload, self.msg)
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn enabled(&self, _level: Level) -> bool {
        false
    }

    fn record(&self, _level: Level, _qualifier: &str, _payload: &str, _msg: &str) {}
}

/// Keeps every record at or above `min_level` in memory.
#[derive(Debug)]
pub struct MemorySink {
    min_level: Level,
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new(min_level: Level) -> Self {
        Self {
            min_level,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(Level::Trace)
    }
}

impl LogSink for MemorySink {
    fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn record(&self, level: Level, qualifier: &str, payload: &str, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                qualifier: qualifier.to_string(),
                payload: payload.to_string(),
                msg: msg.to_string(),
            });
        }
    }
}

// =============================================================================
// JSONL sink
// =============================================================================

/// Writes one JSON object per record:
/// `{"ts", "seq", "lvl", "component", "msg", "data"}`.
///
/// `data` holds the payload parsed as JSON when it is valid JSON, the raw
/// string otherwise. Secret-looking keys inside an object payload are
/// redacted before writing.
pub struct JsonlSink {
    min_level: Level,
    seq: AtomicU64,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn new(min_level: Level, writer: Box<dyn Write + Send>) -> Self {
        Self {
            min_level,
            seq: AtomicU64::new(0),
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout(min_level: Level) -> Self {
        Self::new(min_level, Box::new(io::stdout()))
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn render(&self, level: Level, qualifier: &str, payload: &str, msg: &str) -> String {
        let data = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(fields)) => Value::Object(sanitize_fields(fields)),
            Ok(other) => other,
            Err(_) => Value::String(payload.to_string()),
        };

        let mut entry = Map::new();
        entry.insert("ts".to_string(), json!(ts_now()));
        entry.insert("seq".to_string(), json!(self.next_seq()));
        entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
        entry.insert("component".to_string(), json!(qualifier));
        entry.insert("msg".to_string(), json!(msg));
        entry.insert("data".to_string(), data);
        Value::Object(entry).to_string()
    }
}

impl fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlSink")
            .field("min_level", &self.min_level)
            .field("seq", &self.seq.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LogSink for JsonlSink {
    fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn record(&self, level: Level, qualifier: &str, payload: &str, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let line = self.render(level, qualifier, payload, msg);
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["api_key", "api_secret", "authorization", "password", "secret"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// =============================================================================
// Tests
// =============================================================================
