use crate::calc::{AssessmentItem, RosterStudent, WeightConfig};
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Stable IPC error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidValue(_) => "bad_params",
            StoreError::Db(_) | StoreError::Json(_) => "db_query_failed",
        }
    }
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    // One row per enrollment: the same student id may appear in several courses.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(id, course_id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course_sort ON students(course_id, sort_order)",
        [],
    )?;

    // Weight columns are nullable: a missing value falls back to the category default.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS weight_configs(
            course_id TEXT PRIMARY KEY,
            assignment_weight REAL,
            quiz_weight REAL,
            midterm_weight REAL,
            final_weight REAL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_weight_configs_updated_at(&conn)?;

    // category is free text on purpose; unknown tags are excluded at aggregation time.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_items(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            category TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            score REAL NOT NULL,
            max_score REAL,
            weight REAL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id, course_id) REFERENCES students(id, course_id)
        )",
        [],
    )?;
    ensure_assessment_items_graded_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_items_course ON assessment_items(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_items_course_student
         ON assessment_items(course_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_weight_configs_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "weight_configs", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE weight_configs ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_assessment_items_graded_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "assessment_items", "graded_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE assessment_items ADD COLUMN graded_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> Result<Option<serde_json::Value>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), StoreError> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

pub fn course_name(conn: &Connection, course_id: &str) -> Result<String, StoreError> {
    conn.query_row("SELECT name FROM courses WHERE id = ?", [course_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or(StoreError::NotFound("course"))
}

pub fn require_student_in_course(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<(), StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND course_id = ?",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or(StoreError::NotFound("student"))
}

pub fn roster(conn: &Connection, course_id: &str) -> Result<Vec<RosterStudent>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, sort_order, active
         FROM students
         WHERE course_id = ?
         ORDER BY sort_order, id",
    )?;
    let students = stmt
        .query_map([course_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(RosterStudent {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                sort_order: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn weight_config_get(
    conn: &Connection,
    course_id: &str,
) -> Result<Option<WeightConfig>, StoreError> {
    let cfg = conn
        .query_row(
            "SELECT assignment_weight, quiz_weight, midterm_weight, final_weight
             FROM weight_configs
             WHERE course_id = ?",
            [course_id],
            |r| {
                Ok(WeightConfig {
                    assignment_weight: r.get(0)?,
                    quiz_weight: r.get(1)?,
                    midterm_weight: r.get(2)?,
                    final_weight: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(cfg)
}

/// Replaces the course's configuration. Negative or non-finite values are refused
/// here; the sum is not checked.
pub fn weight_config_put(
    conn: &Connection,
    course_id: &str,
    cfg: &WeightConfig,
) -> Result<(), StoreError> {
    for (name, v) in [
        ("assignmentWeight", cfg.assignment_weight),
        ("quizWeight", cfg.quiz_weight),
        ("midtermWeight", cfg.midterm_weight),
        ("finalWeight", cfg.final_weight),
    ] {
        if let Some(w) = v {
            if !w.is_finite() || w < 0.0 {
                return Err(StoreError::InvalidValue(format!(
                    "{} must be a finite number >= 0",
                    name
                )));
            }
        }
    }
    conn.execute(
        "INSERT INTO weight_configs(course_id, assignment_weight, quiz_weight, midterm_weight, final_weight, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id) DO UPDATE SET
            assignment_weight = excluded.assignment_weight,
            quiz_weight = excluded.quiz_weight,
            midterm_weight = excluded.midterm_weight,
            final_weight = excluded.final_weight,
            updated_at = excluded.updated_at",
        (
            course_id,
            cfg.assignment_weight,
            cfg.quiz_weight,
            cfg.midterm_weight,
            cfg.final_weight,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn weight_config_delete(conn: &Connection, course_id: &str) -> Result<bool, StoreError> {
    let n = conn.execute("DELETE FROM weight_configs WHERE course_id = ?", [course_id])?;
    Ok(n > 0)
}

fn parse_graded_at(raw: Option<String>) -> Option<DateTime<Utc>> {
    // Advisory field: an unparsable timestamp is dropped rather than failing the read.
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Numeric cell read without trusting the column affinity: SQLite keeps
/// non-numeric text in a REAL column as TEXT.
fn real_cell(r: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<f64>> {
    Ok(match r.get_ref(idx)? {
        ValueRef::Real(v) => Some(v),
        ValueRef::Integer(v) => Some(v as f64),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

fn text_cell(r: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match r.get_ref(idx)? {
        ValueRef::Text(t) => std::str::from_utf8(t).ok().map(str::to_string),
        _ => None,
    })
}

// A bad cell makes its item malformed (excluded downstream) instead of failing
// the whole read: unreadable score -> NaN, unreadable max -> 0, unreadable
// weight -> no override, non-text category -> unknown.
fn item_from_row(r: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<AssessmentItem> {
    Ok(AssessmentItem {
        category: text_cell(r, offset)?.unwrap_or_default(),
        score: real_cell(r, offset + 1)?.unwrap_or(f64::NAN),
        max_score: real_cell(r, offset + 2)?.unwrap_or(0.0),
        weight: real_cell(r, offset + 3)?,
        graded_at: parse_graded_at(text_cell(r, offset + 4)?),
    })
}

pub fn assessment_items_for_student(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Vec<AssessmentItem>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT category, score, max_score, weight, graded_at
         FROM assessment_items
         WHERE course_id = ? AND student_id = ?
         ORDER BY rowid",
    )?;
    let items = stmt
        .query_map((course_id, student_id), |r| item_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn assessment_items_for_course(
    conn: &Connection,
    course_id: &str,
) -> Result<HashMap<String, Vec<AssessmentItem>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT student_id, category, score, max_score, weight, graded_at
         FROM assessment_items
         WHERE course_id = ?
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map([course_id], |r| {
        let student_id: String = r.get(0)?;
        Ok((student_id, item_from_row(r, 1)?))
    })?;
    let mut by_student: HashMap<String, Vec<AssessmentItem>> = HashMap::new();
    for row in rows {
        let (student_id, item) = row?;
        by_student.entry(student_id).or_default().push(item);
    }
    Ok(by_student)
}
