use crate::normalize::{normalize_distribution, participation_rate, Distribution};
use crate::report_card::{Label, PerformanceRow};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::new("db_query_failed", e.to_string())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInput {
    pub school_id: i64,
    pub year: i64,
    pub subject_id: String,
    pub grade_id: String,
    pub students_expected: i64,
    pub students_assessed: i64,
    #[serde(default)]
    pub assessed_pct: Option<f64>,
    pub mean_proficiency: f64,
    #[serde(default)]
    pub below_basic: Option<f64>,
    #[serde(default)]
    pub basic: Option<f64>,
    #[serde(default)]
    pub adequate: Option<f64>,
    #[serde(default)]
    pub advanced: Option<f64>,
    #[serde(default)]
    pub participation_rate: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub yoy_variation: Option<f64>,
    #[serde(default)]
    pub municipal_rank: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub id: String,
    pub school_id: i64,
    pub school_name: String,
    pub year: i64,
    pub subject_id: String,
    pub subject_name: String,
    pub grade_id: String,
    pub grade_name: String,
    pub students_expected: i64,
    pub students_assessed: i64,
    pub assessed_pct: f64,
    pub mean_proficiency: f64,
    #[serde(flatten)]
    pub distribution: Distribution,
    pub participation_rate: Option<f64>,
    pub target: Option<f64>,
    pub yoy_variation: Option<f64>,
    pub municipal_rank: Option<i64>,
    pub notes: Option<String>,
    pub updated_at: String,
}

fn ensure_exists(conn: &Connection, sql: &str, id: Value, what: &str) -> Result<(), StoreError> {
    let found: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(query_err)?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::new("not_found", format!("{} not found", what))),
    }
}

/// Insert or update one performance row keyed on (school, year, subject, grade).
///
/// The band distribution is rescaled to 100 on every write, and a missing
/// participation rate is derived from the student counts.
pub fn upsert_performance(
    conn: &Connection,
    input: &PerformanceInput,
) -> Result<PerformanceRecord, StoreError> {
    ensure_exists(
        conn,
        "SELECT 1 FROM schools WHERE id = ?",
        Value::Integer(input.school_id),
        "school",
    )?;
    ensure_exists(
        conn,
        "SELECT 1 FROM subjects WHERE id = ?",
        Value::Text(input.subject_id.clone()),
        "subject",
    )?;
    ensure_exists(
        conn,
        "SELECT 1 FROM grades WHERE id = ?",
        Value::Text(input.grade_id.clone()),
        "grade",
    )?;
    if input.students_expected < 0 || input.students_assessed < 0 {
        return Err(StoreError::new(
            "bad_params",
            "student counts must be non-negative",
        ));
    }
    if !input.mean_proficiency.is_finite() || input.mean_proficiency < 0.0 {
        return Err(StoreError::new(
            "bad_params",
            "meanProficiency must be a non-negative number",
        ));
    }

    let raw = Distribution::new(
        input.below_basic.unwrap_or(0.0),
        input.basic.unwrap_or(0.0),
        input.adequate.unwrap_or(0.0),
        input.advanced.unwrap_or(0.0),
    );
    let distribution = normalize_distribution(raw);
    if distribution != raw {
        tracing::debug!(
            school_id = input.school_id,
            year = input.year,
            total = raw.total(),
            "band distribution rescaled to 100"
        );
    }

    let computed_rate = participation_rate(input.students_expected, input.students_assessed);
    let rate = input.participation_rate.unwrap_or(computed_rate);
    let assessed_pct = input.assessed_pct.unwrap_or(computed_rate);
    let updated_at = chrono::Utc::now().to_rfc3339();

    let existing_id: Option<String> = conn
        .query_row(
            "SELECT id FROM performances
             WHERE school_id = ? AND year = ? AND subject_id = ? AND grade_id = ?",
            (
                input.school_id,
                input.year,
                &input.subject_id,
                &input.grade_id,
            ),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;

    let id = match existing_id {
        Some(id) => {
            conn.execute(
                "UPDATE performances SET
                   students_expected = ?, students_assessed = ?, assessed_pct = ?,
                   mean_proficiency = ?, below_basic = ?, basic = ?, adequate = ?, advanced = ?,
                   participation_rate = ?, target = ?, yoy_variation = ?, municipal_rank = ?,
                   notes = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    input.students_expected,
                    input.students_assessed,
                    assessed_pct,
                    input.mean_proficiency,
                    distribution.below_basic,
                    distribution.basic,
                    distribution.adequate,
                    distribution.advanced,
                    rate,
                    input.target,
                    input.yoy_variation,
                    input.municipal_rank,
                    input.notes,
                    updated_at,
                    id,
                ],
            )
            .map_err(|e| {
                StoreError::new("db_update_failed", e.to_string())
                    .with_details(serde_json::json!({ "table": "performances" }))
            })?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO performances(
                   id, school_id, year, subject_id, grade_id,
                   students_expected, students_assessed, assessed_pct, mean_proficiency,
                   below_basic, basic, adequate, advanced,
                   participation_rate, target, yoy_variation, municipal_rank, notes, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    input.school_id,
                    input.year,
                    input.subject_id,
                    input.grade_id,
                    input.students_expected,
                    input.students_assessed,
                    assessed_pct,
                    input.mean_proficiency,
                    distribution.below_basic,
                    distribution.basic,
                    distribution.adequate,
                    distribution.advanced,
                    rate,
                    input.target,
                    input.yoy_variation,
                    input.municipal_rank,
                    input.notes,
                    updated_at,
                ],
            )
            .map_err(|e| {
                StoreError::new("db_insert_failed", e.to_string())
                    .with_details(serde_json::json!({ "table": "performances" }))
            })?;
            id
        }
    };

    get_performance(conn, &id)?
        .ok_or_else(|| StoreError::new("not_found", "performance record not found"))
}

const RECORD_SELECT: &str = "SELECT
       p.id, p.school_id, s.name, p.year, p.subject_id, sub.name, p.grade_id, g.name,
       p.students_expected, p.students_assessed, p.assessed_pct, p.mean_proficiency,
       p.below_basic, p.basic, p.adequate, p.advanced,
       p.participation_rate, p.target, p.yoy_variation, p.municipal_rank, p.notes, p.updated_at
     FROM performances p
     JOIN schools s ON s.id = p.school_id
     JOIN subjects sub ON sub.id = p.subject_id
     JOIN grades g ON g.id = p.grade_id";

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceRecord> {
    Ok(PerformanceRecord {
        id: r.get(0)?,
        school_id: r.get(1)?,
        school_name: r.get(2)?,
        year: r.get(3)?,
        subject_id: r.get(4)?,
        subject_name: r.get(5)?,
        grade_id: r.get(6)?,
        grade_name: r.get(7)?,
        students_expected: r.get(8)?,
        students_assessed: r.get(9)?,
        assessed_pct: r.get(10)?,
        mean_proficiency: r.get(11)?,
        distribution: Distribution::new(r.get(12)?, r.get(13)?, r.get(14)?, r.get(15)?),
        participation_rate: r.get(16)?,
        target: r.get(17)?,
        yoy_variation: r.get(18)?,
        municipal_rank: r.get(19)?,
        notes: r.get(20)?,
        updated_at: r.get(21)?,
    })
}

pub fn get_performance(conn: &Connection, id: &str) -> Result<Option<PerformanceRecord>, StoreError> {
    let sql = format!("{} WHERE p.id = ?", RECORD_SELECT);
    conn.query_row(&sql, [id], record_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilters {
    pub school_id: Option<i64>,
    pub year: Option<i64>,
    pub subject_id: Option<String>,
    pub grade_id: Option<String>,
}

pub fn list_performances(
    conn: &Connection,
    filters: &RecordFilters,
) -> Result<Vec<PerformanceRecord>, StoreError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(id) = filters.school_id {
        clauses.push("p.school_id = ?");
        binds.push(Value::Integer(id));
    }
    if let Some(year) = filters.year {
        clauses.push("p.year = ?");
        binds.push(Value::Integer(year));
    }
    if let Some(id) = &filters.subject_id {
        clauses.push("p.subject_id = ?");
        binds.push(Value::Text(id.clone()));
    }
    if let Some(id) = &filters.grade_id {
        clauses.push("p.grade_id = ?");
        binds.push(Value::Text(id.clone()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "{}{} ORDER BY p.year DESC, s.name, sub.name, g.name",
        RECORD_SELECT, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(binds), record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)
}

pub fn delete_performance(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let n = conn
        .execute("DELETE FROM performances WHERE id = ?", [id])
        .map_err(|e| StoreError::new("db_delete_failed", e.to_string()))?;
    Ok(n > 0)
}

/// All rows for one school, shaped for report card assembly.
pub fn load_school_records(
    conn: &Connection,
    school_id: i64,
) -> Result<Vec<PerformanceRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT p.year, g.id, g.name, sub.id, sub.name, p.mean_proficiency,
                    p.participation_rate, p.below_basic, p.basic, p.adequate, p.advanced
             FROM performances p
             JOIN grades g ON g.id = p.grade_id
             JOIN subjects sub ON sub.id = p.subject_id
             WHERE p.school_id = ?
             ORDER BY p.year, g.name, sub.name",
        )
        .map_err(query_err)?;
    stmt.query_map([school_id], |r| {
        Ok(PerformanceRow {
            year: r.get(0)?,
            grade: Label {
                id: r.get(1)?,
                name: r.get(2)?,
            },
            subject: Label {
                id: r.get(3)?,
                name: r.get(4)?,
            },
            mean_proficiency: r.get(5)?,
            participation_rate: r.get(6)?,
            distribution: Distribution::new(r.get(7)?, r.get(8)?, r.get(9)?, r.get(10)?),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

fn list_labels(conn: &Connection, table: &str) -> Result<Vec<Label>, StoreError> {
    let sql = format!("SELECT id, name FROM {} ORDER BY name", table);
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map([], |r| {
        Ok(Label {
            id: r.get(0)?,
            name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

pub fn list_grades(conn: &Connection) -> Result<Vec<Label>, StoreError> {
    list_labels(conn, "grades")
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<Label>, StoreError> {
    list_labels(conn, "subjects")
}

pub fn school_name(conn: &Connection, school_id: i64) -> Result<Option<String>, StoreError> {
    conn.query_row("SELECT name FROM schools WHERE id = ?", [school_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInput {
    pub year: i64,
    pub subject_id: String,
    pub grade_id: String,
    pub target_proficiency: f64,
    pub target_adequate_advanced_pct: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MunicipalTarget {
    pub id: String,
    pub year: i64,
    pub subject_id: String,
    pub subject_name: String,
    pub grade_id: String,
    pub grade_name: String,
    pub target_proficiency: f64,
    pub target_adequate_advanced_pct: f64,
    pub description: Option<String>,
}

pub fn upsert_target(conn: &Connection, input: &TargetInput) -> Result<String, StoreError> {
    ensure_exists(
        conn,
        "SELECT 1 FROM subjects WHERE id = ?",
        Value::Text(input.subject_id.clone()),
        "subject",
    )?;
    ensure_exists(
        conn,
        "SELECT 1 FROM grades WHERE id = ?",
        Value::Text(input.grade_id.clone()),
        "grade",
    )?;
    let new_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO municipal_targets(
           id, year, subject_id, grade_id, target_proficiency, target_adequate_advanced_pct, description
         ) VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(year, subject_id, grade_id) DO UPDATE SET
           target_proficiency = excluded.target_proficiency,
           target_adequate_advanced_pct = excluded.target_adequate_advanced_pct,
           description = excluded.description",
        rusqlite::params![
            new_id,
            input.year,
            input.subject_id,
            input.grade_id,
            input.target_proficiency,
            input.target_adequate_advanced_pct,
            input.description,
        ],
    )
    .map_err(|e| {
        StoreError::new("db_insert_failed", e.to_string())
            .with_details(serde_json::json!({ "table": "municipal_targets" }))
    })?;
    conn.query_row(
        "SELECT id FROM municipal_targets WHERE year = ? AND subject_id = ? AND grade_id = ?",
        (input.year, &input.subject_id, &input.grade_id),
        |r| r.get(0),
    )
    .map_err(query_err)
}

pub fn list_targets(conn: &Connection, year: Option<i64>) -> Result<Vec<MunicipalTarget>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.year, t.subject_id, sub.name, t.grade_id, g.name,
                    t.target_proficiency, t.target_adequate_advanced_pct, t.description
             FROM municipal_targets t
             JOIN subjects sub ON sub.id = t.subject_id
             JOIN grades g ON g.id = t.grade_id
             WHERE (?1 IS NULL OR t.year = ?1)
             ORDER BY t.year DESC, g.name, sub.name",
        )
        .map_err(query_err)?;
    stmt.query_map([year], |r| {
        Ok(MunicipalTarget {
            id: r.get(0)?,
            year: r.get(1)?,
            subject_id: r.get(2)?,
            subject_name: r.get(3)?,
            grade_id: r.get(4)?,
            grade_name: r.get(5)?,
            target_proficiency: r.get(6)?,
            target_adequate_advanced_pct: r.get(7)?,
            description: r.get(8)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}
