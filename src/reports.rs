use crate::classify::{classify, Surface, NO_DATA_LABEL};
use crate::dashboard::{school_profile, Filters, SchoolProfile};
use crate::normalize::round2;
use crate::store::StoreError;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::new("db_query_failed", e.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub year: i64,
    pub grade: String,
    pub subject: String,
    pub proficiency: f64,
    pub participation: Option<f64>,
    pub proficiency_text: String,
    pub participation_text: String,
    pub band: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardExport {
    pub school: SchoolProfile,
    pub rows: Vec<ExportRow>,
}

/// Flat per-record rows for the printable report card, one per stored record
/// ordered by year, grade and subject. Stored values are shown as-is.
pub fn report_card_export(
    conn: &Connection,
    school_id: i64,
) -> Result<Option<ReportCardExport>, StoreError> {
    let Some(school) = school_profile(conn, school_id)? else {
        return Ok(None);
    };
    let mut stmt = conn
        .prepare(
            "SELECT p.year, g.name, sub.name, p.mean_proficiency, p.participation_rate
             FROM performances p
             JOIN grades g ON g.id = p.grade_id
             JOIN subjects sub ON sub.id = p.subject_id
             WHERE p.school_id = ?
             ORDER BY p.year, g.name, sub.name",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map([school_id], |r| {
            let grade: String = r.get(1)?;
            let subject: String = r.get(2)?;
            let proficiency: f64 = r.get(3)?;
            let participation: Option<f64> = r.get(4)?;
            let band = classify(&grade, &subject, Some(proficiency)).label(Surface::Export);
            Ok(ExportRow {
                year: r.get(0)?,
                proficiency_text: format!("{:.1}", proficiency),
                participation_text: participation
                    .map(|p| format!("{:.1}%", p))
                    .unwrap_or_else(|| NO_DATA_LABEL.to_string()),
                grade,
                subject,
                proficiency,
                participation,
                band,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(Some(ReportCardExport { school, rows }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceTableRow {
    pub year: i64,
    pub school: String,
    pub grade: String,
    pub subject: String,
    pub mean_proficiency: f64,
    pub students: i64,
}

pub fn performance_table(
    conn: &Connection,
    filters: &Filters,
) -> Result<Vec<PerformanceTableRow>, StoreError> {
    let (where_sql, binds) = filters.where_sql(&[]);
    let sql = format!(
        "SELECT p.year, s.name, g.name, sub.name,
                AVG(p.mean_proficiency), COALESCE(SUM(p.students_assessed), 0)
         FROM performances p
         JOIN schools s ON s.id = p.school_id
         JOIN grades g ON g.id = p.grade_id
         JOIN subjects sub ON sub.id = p.subject_id{}
         GROUP BY p.year, s.name, g.name, sub.name
         ORDER BY p.year, s.name, g.name, sub.name",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        Ok(PerformanceTableRow {
            year: r.get(0)?,
            school: r.get(1)?,
            grade: r.get(2)?,
            subject: r.get(3)?,
            mean_proficiency: round2(r.get::<_, Option<f64>>(4)?.unwrap_or(0.0)),
            students: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    pub year: i64,
    pub school_id: i64,
    pub school_name: String,
    pub locality_name: Option<String>,
    pub total_assessed: i64,
    pub grades: i64,
    pub subjects: i64,
}

/// Schools that took part in each year, with how much of the assessment they
/// covered.
pub fn participants(conn: &Connection, filters: &Filters) -> Result<Vec<ParticipantRow>, StoreError> {
    let (where_sql, binds) = filters.where_sql(&[]);
    let sql = format!(
        "SELECT p.year, s.id, s.name, l.name, COALESCE(SUM(p.students_assessed), 0),
                COUNT(DISTINCT p.grade_id), COUNT(DISTINCT p.subject_id)
         FROM performances p
         JOIN schools s ON s.id = p.school_id
         LEFT JOIN localities l ON l.id = s.locality_id{}
         GROUP BY p.year, s.id, s.name, l.name
         ORDER BY p.year, s.name",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        Ok(ParticipantRow {
            year: r.get(0)?,
            school_id: r.get(1)?,
            school_name: r.get(2)?,
            locality_name: r.get(3)?,
            total_assessed: r.get(4)?,
            grades: r.get(5)?,
            subjects: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}
