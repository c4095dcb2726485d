//! Structured NDJSON logging with non-blocking metric fan-out.
//!
//! Every record is a flat JSON object: `timestamp`, `level`, `message`, the
//! logger's base fields and the call's normalized fields. Nested values are
//! flattened to one level with anything deeper serialized to a string, so
//! downstream log shippers never see arbitrarily deep documents.
//!
//! Metric events go to every configured [`MetricSink`] on a separate tokio
//! task per sink. A sink that errors or panics is reported as a
//! `metric_sink_error` warning and never affects the caller or other sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub type Fields = Map<String, Value>;

const RESERVED_KEYS: &[&str] = &["timestamp", "level", "message"];

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Field normalization
// ---------------------------------------------------------------------------

/// Converts a `json!({...})` argument into a field bag. `null` means no
/// fields; any other non-object is kept under `value`.
pub fn fields_of(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        Value::Null => Fields::new(),
        other => {
            let mut map = Fields::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

pub fn normalize_fields(fields: Fields) -> Fields {
    fields
        .into_iter()
        .map(|(k, v)| (k, normalize_value(v)))
        .collect()
}

/// Primitives pass through, arrays and objects keep one level with
/// non-primitive leaves serialized to strings.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_leaf).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_leaf(v)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_leaf(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Record sinks
// ---------------------------------------------------------------------------

/// Destination for finished log records.
pub trait RecordSink: Send + Sync {
    fn write(&self, record: &Value);
}

/// Writes one JSON document per line.
///
/// Write failures never reach the caller. The first one is reported
/// through `tracing`; later ones are dropped silently.
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
    failure_reported: AtomicBool,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            failure_reported: AtomicBool::new(false),
        }
    }

    fn write_line(writer: &mut W, record: &Value) -> std::io::Result<()> {
        serde_json::to_writer(&mut *writer, record)?;
        writeln!(writer)?;
        writer.flush()
    }
}

impl JsonLineSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> RecordSink for JsonLineSink<W> {
    fn write(&self, record: &Value) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = Self::write_line(&mut writer, record) {
            if !self.failure_reported.swap(true, Ordering::SeqCst) {
                tracing::warn!(error = %e, "structured log sink failed; dropping records");
            }
        }
    }
}

/// Keeps records in memory. Used by the smoke test and unit tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r["message"] == message)
            .collect()
    }

    pub fn with_level(&self, level: LogLevel) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r["level"] == level.as_str())
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn write(&self, record: &Value) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Timing,
    Counter,
    Gauge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            attributes: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait MetricSink: Send + Sync {
    fn name(&self) -> &str;
    async fn record(&self, event: MetricEvent) -> anyhow::Result<()>;
}

/// Mirrors each metric as a debug-level record.
pub struct LogMetricSink {
    sink: Arc<dyn RecordSink>,
}

impl LogMetricSink {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MetricSink for LogMetricSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn record(&self, event: MetricEvent) -> anyhow::Result<()> {
        let mut record = fields_of(serde_json::to_value(&event)?);
        record.insert("metric".to_string(), Value::String(event.name.clone()));
        record.insert("level".to_string(), json!(LogLevel::Debug.as_str()));
        record.insert("message".to_string(), json!("metric"));
        self.sink.write(&Value::Object(normalize_fields(record)));
        Ok(())
    }
}

/// Appends one JSON line per metric event to a file.
pub struct JsonlMetricSink {
    path: PathBuf,
}

impl JsonlMetricSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetricSink for JsonlMetricSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn record(&self, event: MetricEvent) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StructuredLogger
// ---------------------------------------------------------------------------

struct Shared {
    sink: Arc<dyn RecordSink>,
    metric_sinks: Vec<Arc<dyn MetricSink>>,
    min_level: LogLevel,
}

/// Cheap to clone; children share the sinks and carry their own base
/// fields.
#[derive(Clone)]
pub struct StructuredLogger {
    shared: Arc<Shared>,
    base: Arc<Fields>,
}

pub struct LoggerBuilder {
    sink: Arc<dyn RecordSink>,
    metric_sinks: Vec<Arc<dyn MetricSink>>,
    min_level: LogLevel,
    base: Fields,
}

impl LoggerBuilder {
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sinks.push(sink);
        self
    }

    pub fn base_fields(mut self, fields: Value) -> Self {
        self.base.extend(normalize_fields(fields_of(fields)));
        self
    }

    pub fn build(self) -> StructuredLogger {
        StructuredLogger {
            shared: Arc::new(Shared {
                sink: self.sink,
                metric_sinks: self.metric_sinks,
                min_level: self.min_level,
            }),
            base: Arc::new(self.base),
        }
    }
}

impl StructuredLogger {
    pub fn builder(sink: Arc<dyn RecordSink>) -> LoggerBuilder {
        LoggerBuilder {
            sink,
            metric_sinks: Vec::new(),
            min_level: LogLevel::Info,
            base: Fields::new(),
        }
    }

    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self::builder(sink).build()
    }

    pub fn stderr() -> Self {
        Self::new(Arc::new(JsonLineSink::stderr()))
    }

    /// A logger that drops everything. Handy for collaborators built
    /// outside a server context.
    pub fn disabled() -> Self {
        struct Discard;
        impl RecordSink for Discard {
            fn write(&self, _record: &Value) {}
        }
        Self::new(Arc::new(Discard))
    }

    /// Returns a new logger whose base fields are the parent's merged with
    /// `fields`. The parent is unchanged.
    pub fn child(&self, fields: Value) -> Self {
        let mut base = (*self.base).clone();
        base.extend(normalize_fields(fields_of(fields)));
        Self {
            shared: Arc::clone(&self.shared),
            base: Arc::new(base),
        }
    }

    pub fn base_fields(&self) -> &Fields {
        &self.base
    }

    pub fn log(&self, level: LogLevel, message: &str, fields: Value) {
        if level < self.shared.min_level {
            return;
        }
        let mut record = Fields::new();
        record.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        record.insert("level".to_string(), json!(level.as_str()));
        record.insert("message".to_string(), json!(message));
        for (k, v) in self.base.iter() {
            if !RESERVED_KEYS.contains(&k.as_str()) {
                record.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in normalize_fields(fields_of(fields)) {
            if !RESERVED_KEYS.contains(&k.as_str()) {
                record.insert(k, v);
            }
        }
        self.shared.sink.write(&Value::Object(record));
    }

    pub fn debug(&self, message: &str, fields: Value) {
        self.log(LogLevel::Debug, message, fields);
    }

    pub fn info(&self, message: &str, fields: Value) {
        self.log(LogLevel::Info, message, fields);
    }

    pub fn warn(&self, message: &str, fields: Value) {
        self.log(LogLevel::Warn, message, fields);
    }

    pub fn error(&self, message: &str, fields: Value) {
        self.log(LogLevel::Error, message, fields);
    }

    /// Returns a closure yielding milliseconds elapsed since this call,
    /// measured on the monotonic clock.
    pub fn start_timer() -> impl Fn() -> f64 + Send + Sync {
        let start = Instant::now();
        move || start.elapsed().as_secs_f64() * 1000.0
    }

    /// Hands `event` to every metric sink without waiting for any of them.
    pub fn record_metric(&self, event: MetricEvent) {
        if self.shared.metric_sinks.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.warn(
                "metric_sink_error",
                json!({"metric": event.name, "error": "no async runtime available"}),
            );
            return;
        };
        for sink in &self.shared.metric_sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            let logger = self.clone();
            handle.spawn(async move {
                let metric = event.name.clone();
                let error = match AssertUnwindSafe(sink.record(event)).catch_unwind().await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(payload) => crate::error::panic_message(payload.as_ref()),
                };
                logger.warn(
                    "metric_sink_error",
                    json!({"sink": sink.name(), "metric": metric, "error": error}),
                );
            });
        }
    }

    pub fn record_timing(&self, name: &str, duration_ms: f64, attributes: BTreeMap<String, String>) {
        let mut event = MetricEvent::new(name, MetricKind::Timing, duration_ms);
        event.attributes = attributes;
        self.record_metric(event);
    }

    /// Awaits `fut`, logging its duration. On failure the error is logged,
    /// a timing metric tagged `error = "true"` is emitted, and the original
    /// error is returned to the caller unchanged.
    pub async fn time<T, E, Fut>(
        &self,
        label: &str,
        fut: Fut,
        fields: Value,
        metric_name: Option<&str>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let elapsed = Self::start_timer();
        let outcome = fut.await;
        let duration_ms = elapsed();

        let mut fields = fields_of(fields);
        fields.insert("durationMs".to_string(), json!(duration_ms));
        match &outcome {
            Ok(_) => {
                self.log(LogLevel::Info, label, Value::Object(fields));
                if let Some(name) = metric_name {
                    self.record_timing(name, duration_ms, BTreeMap::new());
                }
            }
            Err(e) => {
                fields.insert("error".to_string(), json!(e.to_string()));
                self.log(LogLevel::Error, label, Value::Object(fields));
                let mut attributes = BTreeMap::new();
                attributes.insert("error".to_string(), "true".to_string());
                self.record_timing(metric_name.unwrap_or(label), duration_ms, attributes);
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
