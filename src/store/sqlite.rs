use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};

use crate::models::{canonical_speaker_label, clamp01, AttemptRecord};

/// Empathy review backlog states.
pub const REVIEW_PENDING: &str = "pending";
pub const REVIEW_NOT_APPLICABLE: &str = "not_applicable";
pub const REVIEW_OK: &str = "ok";
pub const REVIEW_NOT_OK: &str = "not_ok";

const CREATE_ANNOTATIONS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS annotations (
    conversation_id TEXT NOT NULL,
    utterance_index INTEGER NOT NULL,
    utterance_text TEXT NOT NULL,
    ground_truth_speaker TEXT NOT NULL,
    predicted_speaker TEXT NOT NULL,
    predicted_speaker_confidence REAL NOT NULL,
    speaker_is_correct_raw INTEGER NOT NULL,
    speaker_is_correct_final INTEGER NOT NULL,
    speaker_quality_decision TEXT NOT NULL,
    farewell_is_current_utterance INTEGER NOT NULL,
    farewell_is_conversation_closing INTEGER NOT NULL,
    farewell_context_source TEXT NOT NULL,
    speaker_evidence_quote TEXT NOT NULL,
    speaker_evidence_is_valid INTEGER NOT NULL,
    empathy_applicable INTEGER NOT NULL,
    empathy_present INTEGER NOT NULL,
    empathy_confidence REAL NOT NULL,
    empathy_evidence_quote TEXT NOT NULL,
    empathy_review_status TEXT NOT NULL DEFAULT 'pending',
    empathy_reviewer_note TEXT NOT NULL DEFAULT '',
    model TEXT NOT NULL,
    annotated_at_utc TEXT NOT NULL,
    PRIMARY KEY (conversation_id, utterance_index)
)";

const CREATE_LLM_EVENTS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS llm_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at_utc TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    utterance_index INTEGER NOT NULL,
    unit_name TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    model TEXT NOT NULL,
    request_json TEXT NOT NULL,
    response_http_status INTEGER NOT NULL,
    response_json TEXT NOT NULL,
    extracted_content_json TEXT NOT NULL,
    parse_ok INTEGER NOT NULL,
    validation_ok INTEGER NOT NULL,
    error_message TEXT NOT NULL
)";

const CREATE_INDEXES_SQL: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_annotations_speaker_is_correct_raw \
     ON annotations(speaker_is_correct_raw)",
    "CREATE INDEX IF NOT EXISTS idx_annotations_speaker_is_correct_final \
     ON annotations(speaker_is_correct_final)",
    "CREATE INDEX IF NOT EXISTS idx_annotations_speaker_quality_decision \
     ON annotations(speaker_quality_decision)",
    "CREATE INDEX IF NOT EXISTS idx_annotations_empathy_review_status \
     ON annotations(empathy_review_status, empathy_applicable)",
    "CREATE INDEX IF NOT EXISTS idx_llm_events_lookup \
     ON llm_events(conversation_id, utterance_index, unit_name, attempt)",
    "CREATE INDEX IF NOT EXISTS idx_llm_events_parse_validation \
     ON llm_events(parse_ok, validation_ok)",
];

const INSERT_ANNOTATION_SQL: &str = "
INSERT INTO annotations (
    conversation_id,
    utterance_index,
    utterance_text,
    ground_truth_speaker,
    predicted_speaker,
    predicted_speaker_confidence,
    speaker_is_correct_raw,
    speaker_is_correct_final,
    speaker_quality_decision,
    farewell_is_current_utterance,
    farewell_is_conversation_closing,
    farewell_context_source,
    speaker_evidence_quote,
    speaker_evidence_is_valid,
    empathy_applicable,
    empathy_present,
    empathy_confidence,
    empathy_evidence_quote,
    empathy_review_status,
    empathy_reviewer_note,
    model,
    annotated_at_utc
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)";

const INSERT_LLM_EVENT_SQL: &str = "
INSERT INTO llm_events (
    created_at_utc,
    conversation_id,
    utterance_index,
    unit_name,
    attempt,
    model,
    request_json,
    response_http_status,
    response_json,
    extracted_content_json,
    parse_ok,
    validation_ok,
    error_message
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

/// One persisted row per utterance block: the merged speaker and empathy
/// decisions plus review bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub conversation_id: String,
    pub utterance_index: u32,
    pub utterance_text: String,
    pub ground_truth_speaker: String,
    pub predicted_speaker: String,
    pub predicted_speaker_confidence: f64,
    pub speaker_is_correct_raw: bool,
    pub speaker_is_correct_final: bool,
    pub speaker_quality_decision: String,
    pub farewell_is_current_utterance: bool,
    pub farewell_is_conversation_closing: bool,
    pub farewell_context_source: String,
    pub speaker_evidence_quote: String,
    pub speaker_evidence_is_valid: bool,
    pub empathy_applicable: bool,
    pub empathy_present: bool,
    pub empathy_confidence: f64,
    pub empathy_evidence_quote: String,
    pub empathy_review_status: String,
    pub empathy_reviewer_note: String,
    pub model: String,
    pub annotated_at_utc: String,
}

/// Single-writer SQLite store for annotation rows and the model-call audit
/// trail. Both tables are append-only during a run; a parallel driver must
/// give each worker its own store handle.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating the file and parent directory if needed) and verify the
    /// schema is compatible.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = open_connection(db_path)?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Clear both tables ahead of a fresh annotate run.
    pub fn reset_for_run(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM annotations", [])
            .context("Failed to clear annotations")?;
        self.conn
            .execute("DELETE FROM llm_events", [])
            .context("Failed to clear llm_events")?;
        Ok(())
    }

    /// Persist one annotation row. Labels, confidences, and text are
    /// normalized on the way in; blank review status and timestamp fields are
    /// filled from applicability and the current time.
    pub fn insert_annotation(&self, row: &AnnotationRow) -> Result<()> {
        let review_status = if row.empathy_review_status.trim().is_empty() {
            if row.empathy_applicable {
                REVIEW_PENDING
            } else {
                REVIEW_NOT_APPLICABLE
            }
        } else {
            row.empathy_review_status.trim()
        };
        let annotated_at = if row.annotated_at_utc.trim().is_empty() {
            AttemptRecord::timestamp_now()
        } else {
            row.annotated_at_utc.trim().to_string()
        };

        self.conn
            .execute(
                INSERT_ANNOTATION_SQL,
                params![
                    row.conversation_id.trim(),
                    row.utterance_index,
                    row.utterance_text.trim(),
                    canonical_speaker_label(&row.ground_truth_speaker),
                    canonical_speaker_label(&row.predicted_speaker),
                    clamp01(row.predicted_speaker_confidence),
                    row.speaker_is_correct_raw,
                    row.speaker_is_correct_final,
                    row.speaker_quality_decision.trim(),
                    row.farewell_is_current_utterance,
                    row.farewell_is_conversation_closing,
                    row.farewell_context_source.trim(),
                    row.speaker_evidence_quote.trim(),
                    row.speaker_evidence_is_valid,
                    row.empathy_applicable,
                    row.empathy_present,
                    clamp01(row.empathy_confidence),
                    row.empathy_evidence_quote.trim(),
                    review_status,
                    row.empathy_reviewer_note.trim(),
                    row.model.trim(),
                    annotated_at,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert annotation {}:{}",
                    row.conversation_id, row.utterance_index
                )
            })?;
        Ok(())
    }

    /// Append one model-call attempt to the audit trail.
    pub fn insert_attempt(&self, record: &AttemptRecord) -> Result<()> {
        let created_at = if record.created_at_utc.trim().is_empty() {
            AttemptRecord::timestamp_now()
        } else {
            record.created_at_utc.trim().to_string()
        };
        let request_json = non_empty_json(&record.request_json);
        let response_json = non_empty_json(&record.response_json);

        self.conn
            .execute(
                INSERT_LLM_EVENT_SQL,
                params![
                    created_at,
                    record.conversation_id.trim(),
                    record.utterance_index,
                    record.unit.as_str(),
                    record.attempt.max(1),
                    record.model.trim(),
                    request_json,
                    i64::from(record.http_status.unwrap_or(0)),
                    response_json,
                    record.extracted_content,
                    record.parse_ok,
                    record.validation_ok,
                    record.error_message.trim(),
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert llm event {}:{} {} attempt {}",
                    record.conversation_id, record.utterance_index, record.unit, record.attempt
                )
            })?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Drop and recreate the schema, including legacy tables from earlier layouts.
pub fn setup_database(db_path: &Path) -> Result<()> {
    let conn = open_connection(db_path)?;
    for table in [
        "annotations",
        "llm_events",
        "annotate_logs",
        "annotation_runs",
    ] {
        conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])
            .with_context(|| format!("Failed to drop table {table}"))?;
    }
    ensure_schema(&conn)
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {parent:?}"))?;
        }
    }
    Connection::open(db_path).with_context(|| format!("Failed to open database: {db_path:?}"))
}

/// Create tables and indexes, rejecting databases whose existing tables lack
/// required columns (points the operator at `setup`).
fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_ANNOTATIONS_TABLE_SQL, [])
        .context("Failed to create annotations table")?;
    conn.execute(CREATE_LLM_EVENTS_TABLE_SQL, [])
        .context("Failed to create llm_events table")?;

    for (table, required) in [
        ("annotations", required_annotation_columns()),
        ("llm_events", required_llm_event_columns()),
    ] {
        let mut missing = missing_table_columns(conn, table, required)?;
        if !missing.is_empty() {
            missing.sort();
            bail!(
                "incompatible {table} schema, missing columns: {}; run `repartee setup --db <path>`",
                missing.join(", ")
            );
        }
    }

    for statement in CREATE_INDEXES_SQL {
        conn.execute(statement, [])
            .context("Failed to create index")?;
    }
    Ok(())
}

pub fn required_annotation_columns() -> &'static [&'static str] {
    &[
        "conversation_id",
        "utterance_index",
        "utterance_text",
        "ground_truth_speaker",
        "predicted_speaker",
        "predicted_speaker_confidence",
        "speaker_is_correct_raw",
        "speaker_is_correct_final",
        "speaker_quality_decision",
        "farewell_is_current_utterance",
        "farewell_is_conversation_closing",
        "farewell_context_source",
        "speaker_evidence_quote",
        "speaker_evidence_is_valid",
        "empathy_applicable",
        "empathy_present",
        "empathy_confidence",
        "empathy_evidence_quote",
        "empathy_review_status",
        "empathy_reviewer_note",
        "model",
        "annotated_at_utc",
    ]
}

pub fn required_llm_event_columns() -> &'static [&'static str] {
    &[
        "id",
        "created_at_utc",
        "conversation_id",
        "utterance_index",
        "unit_name",
        "attempt",
        "model",
        "request_json",
        "response_http_status",
        "response_json",
        "extracted_content_json",
        "parse_ok",
        "validation_ok",
        "error_message",
    ]
}

fn missing_table_columns(
    conn: &Connection,
    table: &str,
    required: &[&str],
) -> Result<Vec<String>> {
    let mut statement = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("Failed to inspect {table} schema"))?;
    let existing: Vec<String> = statement
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("Failed to query {table} schema"))?
        .collect::<rusqlite::Result<_>>()
        .with_context(|| format!("Failed to scan {table} schema"))?;

    Ok(required
        .iter()
        .filter(|column| !existing.iter().any(|name| name == *column))
        .map(|column| column.to_string())
        .collect())
}

fn non_empty_json(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "{}".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QualityDecision, UnitName, SPEAKER_SALES_REP};

    pub(crate) fn sample_row(conversation_id: &str, utterance_index: u32) -> AnnotationRow {
        AnnotationRow {
            conversation_id: conversation_id.to_string(),
            utterance_index,
            utterance_text: "Hello, this is Dana from Acme.".to_string(),
            ground_truth_speaker: SPEAKER_SALES_REP.to_string(),
            predicted_speaker: SPEAKER_SALES_REP.to_string(),
            predicted_speaker_confidence: 0.9,
            speaker_is_correct_raw: true,
            speaker_is_correct_final: true,
            speaker_quality_decision: QualityDecision::StrictMatch.as_str().to_string(),
            farewell_is_current_utterance: false,
            farewell_is_conversation_closing: false,
            farewell_context_source: "none".to_string(),
            speaker_evidence_quote: "this is Dana".to_string(),
            speaker_evidence_is_valid: true,
            empathy_applicable: true,
            empathy_present: false,
            empathy_confidence: 0.4,
            empathy_evidence_quote: String::new(),
            empathy_review_status: String::new(),
            empathy_reviewer_note: String::new(),
            model: "test-model".to_string(),
            annotated_at_utc: String::new(),
        }
    }

    fn sample_attempt(conversation_id: &str, attempt: u32) -> AttemptRecord {
        AttemptRecord {
            conversation_id: conversation_id.to_string(),
            utterance_index: 1,
            unit: UnitName::Speaker,
            attempt,
            model: "test-model".to_string(),
            request_json: r#"{"messages":[]}"#.to_string(),
            http_status: Some(200),
            response_json: r#"{"choices":[]}"#.to_string(),
            extracted_content: "{}".to_string(),
            parse_ok: true,
            validation_ok: attempt > 1,
            error_message: String::new(),
            created_at_utc: String::new(),
        }
    }

    #[test]
    fn test_setup_creates_expected_columns() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("annotations.db");
        setup_database(&db_path).unwrap();

        let store = SqliteStore::open(&db_path).unwrap();
        for (table, required) in [
            ("annotations", required_annotation_columns()),
            ("llm_events", required_llm_event_columns()),
        ] {
            let missing = missing_table_columns(store.connection(), table, required).unwrap();
            assert!(missing.is_empty(), "{table} missing columns: {missing:?}");
        }
    }

    #[test]
    fn test_insert_and_count_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("annotations.db")).unwrap();

        store.insert_annotation(&sample_row("conv_a", 1)).unwrap();
        store.insert_annotation(&sample_row("conv_a", 2)).unwrap();
        store.insert_attempt(&sample_attempt("conv_a", 1)).unwrap();
        store.insert_attempt(&sample_attempt("conv_a", 2)).unwrap();

        let annotations: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM annotations", [], |row| row.get(0))
            .unwrap();
        let events: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM llm_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(annotations, 2);
        assert_eq!(events, 2);
    }

    #[test]
    fn test_insert_defaults_review_status_by_applicability() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("annotations.db")).unwrap();

        let mut applicable = sample_row("conv_a", 1);
        applicable.empathy_applicable = true;
        let mut skipped = sample_row("conv_a", 2);
        skipped.empathy_applicable = false;
        store.insert_annotation(&applicable).unwrap();
        store.insert_annotation(&skipped).unwrap();

        let status = |idx: u32| -> String {
            store
                .connection()
                .query_row(
                    "SELECT empathy_review_status FROM annotations WHERE utterance_index = ?1",
                    [idx],
                    |row| row.get(0),
                )
                .unwrap()
        };
        assert_eq!(status(1), REVIEW_PENDING);
        assert_eq!(status(2), REVIEW_NOT_APPLICABLE);
    }

    #[test]
    fn test_insert_clamps_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("annotations.db")).unwrap();

        let mut row = sample_row("conv_a", 1);
        row.predicted_speaker_confidence = 7.5;
        row.empathy_confidence = -1.0;
        store.insert_annotation(&row).unwrap();

        let (speaker_conf, empathy_conf): (f64, f64) = store
            .connection()
            .query_row(
                "SELECT predicted_speaker_confidence, empathy_confidence FROM annotations",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(speaker_conf, 1.0);
        assert_eq!(empathy_conf, 0.0);
    }

    #[test]
    fn test_incompatible_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("annotations.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE annotations (conversation_id TEXT)", [])
                .unwrap();
        }

        let err = SqliteStore::open(&db_path).unwrap_err();
        assert!(err.to_string().contains("incompatible annotations schema"));
        assert!(err.to_string().contains("utterance_index"));
    }

    #[test]
    fn test_reset_clears_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("annotations.db")).unwrap();
        store.insert_annotation(&sample_row("conv_a", 1)).unwrap();
        store.insert_attempt(&sample_attempt("conv_a", 1)).unwrap();

        store.reset_for_run().unwrap();

        let count = |table: &str| -> i64 {
            store
                .connection()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count("annotations"), 0);
        assert_eq!(count("llm_events"), 0);
    }
}
