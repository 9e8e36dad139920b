//! SQLite-backed store for model metrics, calibration results, and handoff
//! triggers.
//!
//! The store owns all persistence: the harness, trigger detector, and
//! comparison orchestrator hold a shared handle and never touch rows
//! directly. Field validation (non-negative token counts, score ranges) is a
//! caller precondition; the store does not re-check it.

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Latency floor used when deriving throughput, so a fast response never
/// divides by ~zero.
pub const LATENCY_FLOOR_SECONDS: f64 = 0.1;

/// Completion throughput for one invocation. Zero when nothing was generated.
pub fn tokens_per_second(completion_tokens: u32, latency_seconds: f64) -> f64 {
    if completion_tokens == 0 {
        return 0.0;
    }
    f64::from(completion_tokens) / latency_seconds.max(LATENCY_FLOOR_SECONDS)
}

/// One observed model invocation.
///
/// `(model_id, timestamp)` is the dedup key: inserting the same pair twice
/// keeps the first row and silently drops the second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub model_id: String,
    /// RFC 3339 UTC timestamp of the invocation attempt.
    pub timestamp: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_seconds: f64,
    pub tokens_per_second: f64,
    pub success: bool,
    /// Present only when `success` is false.
    pub error_message: Option<String>,
    /// Free-form label, e.g. "calibration" or "comparison".
    pub use_case: Option<String>,
}

impl MetricRecord {
    /// Build a record for an invocation attempt. Derived fields
    /// (`total_tokens`, `tokens_per_second`) are computed here so callers
    /// cannot produce inconsistent rows.
    pub fn new(
        model_id: impl Into<String>,
        prompt_tokens: u32,
        completion_tokens: u32,
        latency_seconds: f64,
        success: bool,
        error_message: Option<String>,
        use_case: Option<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            timestamp: now_rfc3339(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            latency_seconds,
            tokens_per_second: tokens_per_second(completion_tokens, latency_seconds),
            success,
            error_message,
            use_case,
        }
    }
}

/// One scored prompt/response pair from a calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTest {
    /// Opaque unique id; re-saving the same id replaces the row.
    pub test_id: String,
    pub model_id: String,
    pub prompt_category: String,
    pub prompt: String,
    pub local_response: String,
    /// Always present, floor 0.0 even for degenerate responses.
    pub quality_score: f64,
    pub evaluation_notes: Vec<String>,
    pub tokens_per_second: f64,
    pub timestamp: String,
    pub passed: bool,
}

/// A learned signal that local handling of some pattern is unreliable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffTrigger {
    pub pattern_type: String,
    pub pattern_description: String,
    pub trigger_count: i64,
    pub last_triggered: String,
    /// Overwritten, not accumulated, on each observation.
    pub confidence: f64,
    pub active: bool,
}

/// Per-model aggregate over a recency window.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub avg_tokens_per_second: f64,
    pub avg_latency_seconds: f64,
    pub error_count: i64,
    pub last_used: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file could not be created or opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Shared handle to the metrics database.
///
/// Constructed once and passed by reference into the harness, detector, and
/// orchestrator. All operations run on the blocking pool; the connection is
/// guarded by a mutex and every call is a short-lived transaction.
#[derive(Clone)]
pub struct MetricsStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl MetricsStore {
    /// Open (or create) the database and ensure the schema exists.
    ///
    /// Idempotent and safe to call on every process start.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS model_metrics (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               model_id TEXT NOT NULL,\
               request_timestamp TEXT NOT NULL,\
               prompt_tokens INTEGER NOT NULL DEFAULT 0,\
               completion_tokens INTEGER NOT NULL DEFAULT 0,\
               total_tokens INTEGER NOT NULL DEFAULT 0,\
               latency_seconds REAL NOT NULL DEFAULT 0.0,\
               tokens_per_second REAL NOT NULL DEFAULT 0.0,\
               success INTEGER NOT NULL DEFAULT 1,\
               error_message TEXT,\
               use_case TEXT,\
               UNIQUE(model_id, request_timestamp)\
             );\
             CREATE TABLE IF NOT EXISTS calibration_tests (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               test_id TEXT UNIQUE NOT NULL,\
               model_id TEXT NOT NULL,\
               prompt_category TEXT NOT NULL,\
               prompt TEXT NOT NULL,\
               local_response TEXT,\
               quality_score REAL NOT NULL DEFAULT 0.0,\
               evaluation_notes TEXT,\
               tokens_per_second REAL NOT NULL DEFAULT 0.0,\
               timestamp TEXT NOT NULL,\
               passed INTEGER NOT NULL DEFAULT 0\
             );\
             CREATE TABLE IF NOT EXISTS handoff_triggers (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               pattern_type TEXT NOT NULL,\
               pattern_description TEXT NOT NULL,\
               trigger_count INTEGER NOT NULL DEFAULT 1,\
               last_triggered TEXT,\
               confidence REAL NOT NULL DEFAULT 0.5,\
               active INTEGER NOT NULL DEFAULT 1,\
               UNIQUE(pattern_type, pattern_description)\
             );\
             CREATE TABLE IF NOT EXISTS conversation_analytics (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               date TEXT NOT NULL,\
               model_id TEXT,\
               session_count INTEGER NOT NULL DEFAULT 0,\
               message_count INTEGER NOT NULL DEFAULT 0,\
               avg_session_length_minutes REAL NOT NULL DEFAULT 0.0,\
               avg_messages_per_session REAL NOT NULL DEFAULT 0.0,\
               primary_use_case TEXT,\
               UNIQUE(date, model_id)\
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Default database location: `SIDECAR_HARNESS_DB`, else
    /// `~/.sidecar-harness/metrics.db`, else a cwd-relative fallback.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("SIDECAR_HARNESS_DB") {
            return PathBuf::from(path);
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".sidecar-harness").join("metrics.db");
        }
        PathBuf::from(".sidecar_harness_metrics.db")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    /// Insert a metric record. A duplicate `(model_id, timestamp)` key is a
    /// silent no-op, never an error.
    pub async fn record_metric(&self, record: &MetricRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO model_metrics (\
                        model_id, request_timestamp, prompt_tokens, completion_tokens,\
                        total_tokens, latency_seconds, tokens_per_second, success,\
                        error_message, use_case\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.model_id,
                        record.timestamp,
                        record.prompt_tokens,
                        record.completion_tokens,
                        record.total_tokens,
                        record.latency_seconds,
                        record.tokens_per_second,
                        if record.success { 1 } else { 0 },
                        record.error_message,
                        record.use_case,
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Per-model aggregates restricted to records newer than `window_days`.
    ///
    /// With no model filter, results are ordered by request count descending.
    pub async fn summarize_metrics(
        &self,
        model_id: Option<&str>,
        window_days: u32,
    ) -> Result<Vec<ModelSummary>, StoreError> {
        let model_id = model_id.map(|s| s.to_string());
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let cutoff = (Utc::now() - ChronoDuration::days(i64::from(window_days)))
                    .to_rfc3339();
                let sql_filtered = "SELECT model_id, COUNT(*), SUM(total_tokens), \
                            AVG(tokens_per_second), AVG(latency_seconds), \
                            SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), \
                            MAX(request_timestamp) \
                     FROM model_metrics \
                     WHERE request_timestamp > ?1 AND model_id = ?2 \
                     GROUP BY model_id";
                let sql_all = "SELECT model_id, COUNT(*), SUM(total_tokens), \
                            AVG(tokens_per_second), AVG(latency_seconds), \
                            SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), \
                            MAX(request_timestamp) \
                     FROM model_metrics \
                     WHERE request_timestamp > ?1 \
                     GROUP BY model_id \
                     ORDER BY COUNT(*) DESC";

                let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ModelSummary> {
                    Ok(ModelSummary {
                        model_id: row.get(0)?,
                        total_requests: row.get(1)?,
                        total_tokens: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        avg_tokens_per_second: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        avg_latency_seconds: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                        error_count: row.get(5)?,
                        last_used: row.get(6)?,
                    })
                };

                let mut summaries = Vec::new();
                if let Some(model_id) = model_id {
                    let mut stmt = conn.prepare(sql_filtered)?;
                    let rows = stmt.query_map(params![cutoff, model_id], map_row)?;
                    for row in rows {
                        summaries.push(row?);
                    }
                } else {
                    let mut stmt = conn.prepare(sql_all)?;
                    let rows = stmt.query_map(params![cutoff], map_row)?;
                    for row in rows {
                        summaries.push(row?);
                    }
                }
                Ok(summaries)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Upsert a calibration result by `test_id`.
    pub async fn save_calibration_result(&self, test: &CalibrationTest) -> Result<(), StoreError> {
        let test = test.clone();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let notes = serde_json::to_string(&test.evaluation_notes)
                    .map_err(|e| StoreError::Serde(e.to_string()))?;
                conn.execute(
                    "INSERT OR REPLACE INTO calibration_tests (\
                        test_id, model_id, prompt_category, prompt, local_response,\
                        quality_score, evaluation_notes, tokens_per_second, timestamp, passed\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        test.test_id,
                        test.model_id,
                        test.prompt_category,
                        test.prompt,
                        test.local_response,
                        test.quality_score,
                        notes,
                        test.tokens_per_second,
                        test.timestamp,
                        if test.passed { 1 } else { 0 },
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Most-recent-first calibration results, optionally filtered by model.
    pub async fn calibration_results(
        &self,
        model_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CalibrationTest>, StoreError> {
        let model_id = model_id.map(|s| s.to_string());
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let sql_filtered = "SELECT test_id, model_id, prompt_category, prompt, \
                            local_response, quality_score, evaluation_notes, \
                            tokens_per_second, timestamp, passed \
                     FROM calibration_tests \
                     WHERE model_id = ?1 \
                     ORDER BY timestamp DESC \
                     LIMIT ?2";
                let sql_all = "SELECT test_id, model_id, prompt_category, prompt, \
                            local_response, quality_score, evaluation_notes, \
                            tokens_per_second, timestamp, passed \
                     FROM calibration_tests \
                     ORDER BY timestamp DESC \
                     LIMIT ?1";

                let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<CalibrationTest> {
                    let notes_raw: Option<String> = row.get(6)?;
                    let evaluation_notes = notes_raw
                        .as_deref()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_default();
                    Ok(CalibrationTest {
                        test_id: row.get(0)?,
                        model_id: row.get(1)?,
                        prompt_category: row.get(2)?,
                        prompt: row.get(3)?,
                        local_response: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        quality_score: row.get(5)?,
                        evaluation_notes,
                        tokens_per_second: row.get(7)?,
                        timestamp: row.get(8)?,
                        passed: row.get::<_, i64>(9)? != 0,
                    })
                };

                let mut results = Vec::new();
                if let Some(model_id) = model_id {
                    let mut stmt = conn.prepare(sql_filtered)?;
                    let rows = stmt.query_map(params![model_id, limit as i64], map_row)?;
                    for row in rows {
                        results.push(row?);
                    }
                } else {
                    let mut stmt = conn.prepare(sql_all)?;
                    let rows = stmt.query_map(params![limit as i64], map_row)?;
                    for row in rows {
                        results.push(row?);
                    }
                }
                Ok(results)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Record or refresh a handoff trigger.
    ///
    /// A repeat observation of the same `(pattern_type, description)` pair
    /// increments `trigger_count` and overwrites `confidence` and
    /// `last_triggered`; a new pair starts at count 1.
    pub async fn record_handoff_trigger(
        &self,
        pattern_type: &str,
        description: &str,
        confidence: f64,
    ) -> Result<(), StoreError> {
        let pattern_type = pattern_type.to_string();
        let description = description.to_string();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let now = now_rfc3339();
                let updated = conn.execute(
                    "UPDATE handoff_triggers \
                     SET trigger_count = trigger_count + 1, \
                         last_triggered = ?1, \
                         confidence = ?2 \
                     WHERE pattern_type = ?3 AND pattern_description = ?4",
                    params![now, confidence, pattern_type, description],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO handoff_triggers \
                         (pattern_type, pattern_description, trigger_count, last_triggered, confidence, active) \
                         VALUES (?1, ?2, 1, ?3, ?4, 1)",
                        params![pattern_type, description, now, confidence],
                    )?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Triggers ordered by `trigger_count` descending.
    pub async fn handoff_triggers(
        &self,
        active_only: bool,
    ) -> Result<Vec<HandoffTrigger>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let sql = if active_only {
                    "SELECT pattern_type, pattern_description, trigger_count, \
                            last_triggered, confidence, active \
                     FROM handoff_triggers \
                     WHERE active = 1 \
                     ORDER BY trigger_count DESC"
                } else {
                    "SELECT pattern_type, pattern_description, trigger_count, \
                            last_triggered, confidence, active \
                     FROM handoff_triggers \
                     ORDER BY trigger_count DESC"
                };
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok(HandoffTrigger {
                        pattern_type: row.get(0)?,
                        pattern_description: row.get(1)?,
                        trigger_count: row.get(2)?,
                        last_triggered: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        confidence: row.get(4)?,
                        active: row.get::<_, i64>(5)? != 0,
                    })
                })?;
                let mut triggers = Vec::new();
                for row in rows {
                    triggers.push(row?);
                }
                Ok(triggers)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Current time as RFC 3339 UTC with microsecond precision, so two
/// invocations of the same model within one run never collide on the
/// metrics dedup key.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_zero_when_no_completion_tokens() {
        assert_eq!(tokens_per_second(0, 5.0), 0.0);
    }

    #[test]
    fn throughput_uses_latency_floor() {
        // 50 tokens in 10ms clamps to the 0.1s floor.
        assert!((tokens_per_second(50, 0.01) - 500.0).abs() < 1e-9);
        assert!((tokens_per_second(50, 2.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn metric_record_derives_totals() {
        let record = MetricRecord::new("m", 10, 20, 1.0, true, None, None);
        assert_eq!(record.total_tokens, 30);
        assert!((record.tokens_per_second - 20.0).abs() < 1e-9);
        assert!(record.error_message.is_none());
    }
}
