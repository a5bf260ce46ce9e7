use crate::normalize::{round2, Distribution};
use crate::store::StoreError;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::new("db_query_failed", e.to_string())
}

/// Which year a view selects when the caller does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearPolicy {
    #[default]
    Latest,
    Earliest,
}

impl YearPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(Self::Latest),
            "earliest" => Some(Self::Earliest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Earliest => "earliest",
        }
    }

    /// `years` must be sorted descending.
    pub fn pick(self, years: &[i64]) -> Option<i64> {
        match self {
            Self::Latest => years.first().copied(),
            Self::Earliest => years.last().copied(),
        }
    }
}

/// Optional record filters shared by dashboard and report queries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    pub year: Option<i64>,
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
    pub subject_id: Option<String>,
    pub grade_id: Option<String>,
    pub locality_id: Option<i64>,
    pub school_id: Option<i64>,
}

const FROM_RECORDS: &str = "FROM performances p
     JOIN schools s ON s.id = p.school_id
     LEFT JOIN localities l ON l.id = s.locality_id";

impl Filters {
    /// WHERE clause over the `FROM_RECORDS` aliases. A year range only applies
    /// when both ends are given.
    pub(crate) fn where_sql(&self, extra: &[&str]) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(year) = self.year {
            clauses.push("p.year = ?".into());
            binds.push(Value::Integer(year));
        }
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            clauses.push("p.year BETWEEN ? AND ?".into());
            binds.push(Value::Integer(from));
            binds.push(Value::Integer(to));
        }
        if let Some(id) = &self.subject_id {
            clauses.push("p.subject_id = ?".into());
            binds.push(Value::Text(id.clone()));
        }
        if let Some(id) = &self.grade_id {
            clauses.push("p.grade_id = ?".into());
            binds.push(Value::Text(id.clone()));
        }
        if let Some(id) = self.locality_id {
            clauses.push("s.locality_id = ?".into());
            binds.push(Value::Integer(id));
        }
        if let Some(id) = self.school_id {
            clauses.push("p.school_id = ?".into());
            binds.push(Value::Integer(id));
        }
        clauses.extend(extra.iter().map(|c| c.to_string()));
        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), binds)
        }
    }
}

pub fn distinct_years(conn: &Connection) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT year FROM performances ORDER BY year DESC")
        .map_err(query_err)?;
    stmt.query_map([], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<i64>, _>>())
        .map_err(query_err)
}

#[derive(Debug, Clone, Copy)]
pub struct OverviewLimits {
    pub top_schools: i64,
    pub top_localities: i64,
    pub evolution_years: i64,
}

impl Default for OverviewLimits {
    fn default() -> Self {
        Self {
            top_schools: 10,
            top_localities: 10,
            evolution_years: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MunicipalSummary {
    pub mean_proficiency: f64,
    pub mean_participation: f64,
    pub total_schools: i64,
    pub total_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionPoint {
    pub year: i64,
    pub proficiency: f64,
    pub students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolScore {
    pub school_id: i64,
    pub school_name: String,
    pub locality_name: Option<String>,
    pub mean: f64,
    pub students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityScore {
    pub locality_id: Option<i64>,
    pub name: Option<String>,
    pub mean: f64,
    pub schools: i64,
    pub students: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub municipality: MunicipalSummary,
    pub evolution: Vec<EvolutionPoint>,
    pub top_schools: Vec<SchoolScore>,
    pub distribution: Distribution,
    pub localities: Vec<LocalityScore>,
}

/// Municipal headline numbers for the filtered record set.
///
/// The evolution series walks the most recent `evolution_years` years found
/// anywhere in the store (not just in the filtered set), oldest first. The
/// locality ranking is left empty when the caller already filtered by locality.
pub fn overview(
    conn: &Connection,
    filters: &Filters,
    limits: OverviewLimits,
) -> Result<Overview, StoreError> {
    let (where_sql, binds) = filters.where_sql(&[]);

    let sql = format!(
        "SELECT COUNT(*), AVG(p.mean_proficiency), AVG(p.participation_rate),
                COUNT(DISTINCT p.school_id), COALESCE(SUM(p.students_assessed), 0),
                AVG(p.below_basic), AVG(p.basic), AVG(p.adequate), AVG(p.advanced)
         {}{}",
        FROM_RECORDS, where_sql
    );
    let (count, municipality, distribution) = conn
        .query_row(&sql, params_from_iter(binds.iter()), |r| {
            let count: i64 = r.get(0)?;
            let municipality = MunicipalSummary {
                mean_proficiency: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                mean_participation: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                total_schools: r.get(3)?,
                total_students: r.get(4)?,
            };
            let distribution = Distribution::new(
                r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                r.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                r.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                r.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            );
            Ok((count, municipality, distribution))
        })
        .map_err(query_err)?;
    if count == 0 {
        return Ok(Overview::default());
    }

    let mut recent: Vec<i64> = distinct_years(conn)?
        .into_iter()
        .take(limits.evolution_years.max(0) as usize)
        .collect();
    recent.sort_unstable();

    let (year_where, year_binds) = filters.where_sql(&["p.year = ?"]);
    let evolution_sql = format!(
        "SELECT AVG(p.mean_proficiency), COALESCE(SUM(p.students_assessed), 0) {}{}",
        FROM_RECORDS, year_where
    );
    let mut evolution = Vec::with_capacity(recent.len());
    for year in recent {
        let mut b = year_binds.clone();
        b.push(Value::Integer(year));
        let (mean, students): (Option<f64>, i64) = conn
            .query_row(&evolution_sql, params_from_iter(b.iter()), |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .map_err(query_err)?;
        evolution.push(EvolutionPoint {
            year,
            proficiency: mean.unwrap_or(0.0),
            students,
        });
    }

    let top_schools = school_scores(conn, filters, Some(limits.top_schools))?;
    let localities = if filters.locality_id.is_some() {
        Vec::new()
    } else {
        locality_scores(conn, filters, Some(limits.top_localities))?
    };

    Ok(Overview {
        municipality,
        evolution,
        top_schools,
        distribution,
        localities,
    })
}

fn school_scores(
    conn: &Connection,
    filters: &Filters,
    limit: Option<i64>,
) -> Result<Vec<SchoolScore>, StoreError> {
    let (where_sql, mut binds) = filters.where_sql(&[]);
    let limit_sql = match limit {
        Some(n) => {
            binds.push(Value::Integer(n));
            " LIMIT ?"
        }
        None => "",
    };
    let sql = format!(
        "SELECT s.id, s.name, l.name, AVG(p.mean_proficiency), COALESCE(SUM(p.students_assessed), 0)
         {}{}
         GROUP BY s.id, s.name, l.name
         ORDER BY AVG(p.mean_proficiency) DESC, s.name{}",
        FROM_RECORDS, where_sql, limit_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        Ok(SchoolScore {
            school_id: r.get(0)?,
            school_name: r.get(1)?,
            locality_name: r.get(2)?,
            mean: r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            students: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

fn locality_scores(
    conn: &Connection,
    filters: &Filters,
    limit: Option<i64>,
) -> Result<Vec<LocalityScore>, StoreError> {
    let (where_sql, mut binds) = filters.where_sql(&[]);
    let limit_sql = match limit {
        Some(n) => {
            binds.push(Value::Integer(n));
            " LIMIT ?"
        }
        None => "",
    };
    let sql = format!(
        "SELECT l.id, l.name, AVG(p.mean_proficiency), COUNT(DISTINCT p.school_id),
                COALESCE(SUM(p.students_assessed), 0)
         {}{}
         GROUP BY l.id, l.name
         ORDER BY AVG(p.mean_proficiency) DESC, l.name{}",
        FROM_RECORDS, where_sql, limit_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        Ok(LocalityScore {
            locality_id: r.get(0)?,
            name: r.get(1)?,
            mean: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
            schools: r.get(3)?,
            students: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

/// Schools ordered by mean proficiency, best first.
pub fn ranking(conn: &Connection, filters: &Filters) -> Result<Vec<SchoolScore>, StoreError> {
    school_scores(conn, filters, None)
}

pub fn locality_panel(
    conn: &Connection,
    filters: &Filters,
) -> Result<Vec<LocalityScore>, StoreError> {
    locality_scores(conn, filters, None)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolProfile {
    pub id: i64,
    pub inep: String,
    pub name: String,
    pub address: Option<String>,
    pub district: Option<String>,
    pub manager: Option<String>,
    pub phone: Option<String>,
    pub locality_id: i64,
    pub locality_name: Option<String>,
}

pub fn school_profile(conn: &Connection, school_id: i64) -> Result<Option<SchoolProfile>, StoreError> {
    conn.query_row(
        "SELECT s.id, s.inep, s.name, s.address, s.district, s.manager, s.phone,
                s.locality_id, l.name
         FROM schools s LEFT JOIN localities l ON l.id = s.locality_id
         WHERE s.id = ?",
        [school_id],
        |r| {
            Ok(SchoolProfile {
                id: r.get(0)?,
                inep: r.get(1)?,
                name: r.get(2)?,
                address: r.get(3)?,
                district: r.get(4)?,
                manager: r.get(5)?,
                phone: r.get(6)?,
                locality_id: r.get(7)?,
                locality_name: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearAverages {
    pub year: i64,
    pub mean_proficiency: f64,
    pub mean_participation: f64,
}

pub fn school_year_averages(
    conn: &Connection,
    school_id: i64,
) -> Result<Vec<YearAverages>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT year, AVG(mean_proficiency), AVG(participation_rate)
             FROM performances WHERE school_id = ?
             GROUP BY year ORDER BY year",
        )
        .map_err(query_err)?;
    stmt.query_map([school_id], |r| {
        Ok(YearAverages {
            year: r.get(0)?,
            mean_proficiency: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
            mean_participation: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSnapshot {
    pub year: i64,
    pub mean: f64,
    pub students: i64,
    pub schools: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub mean: f64,
    pub students: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearComparison {
    pub available_years: Vec<i64>,
    pub first: Option<YearSnapshot>,
    pub second: Option<YearSnapshot>,
    pub variation: Option<Variation>,
}

fn year_snapshot(conn: &Connection, year: i64) -> Result<YearSnapshot, StoreError> {
    let (mean, schools): (Option<f64>, i64) = conn
        .query_row(
            "SELECT AVG(mean_proficiency), COUNT(DISTINCT school_id)
             FROM performances WHERE year = ?",
            [year],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(query_err)?;
    // One school/grade pair has a row per subject with the same cohort, so
    // take the largest count instead of summing subjects.
    let students: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(peak), 0) FROM (
               SELECT MAX(students_assessed) AS peak
               FROM performances WHERE year = ?
               GROUP BY school_id, grade_id
             )",
            [year],
            |r| r.get(0),
        )
        .map_err(query_err)?;
    Ok(YearSnapshot {
        year,
        mean: mean.unwrap_or(0.0),
        students,
        schools,
    })
}

fn percent_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        round2((to - from) / from * 100.0)
    }
}

/// Compare two assessment years. Missing years default to the most recent
/// and the one before it; with fewer than two years nothing is compared.
pub fn year_comparison(
    conn: &Connection,
    first: Option<i64>,
    second: Option<i64>,
) -> Result<YearComparison, StoreError> {
    let available_years = distinct_years(conn)?;
    let first = first.or_else(|| available_years.first().copied());
    let second = second.or_else(|| available_years.get(1).copied());

    let (Some(a), Some(b)) = (first, second) else {
        return Ok(YearComparison {
            available_years,
            first: None,
            second: None,
            variation: None,
        });
    };
    let first = year_snapshot(conn, a)?;
    let second = year_snapshot(conn, b)?;
    let variation = Variation {
        mean: percent_change(first.mean, second.mean),
        students: percent_change(first.students as f64, second.students as f64),
    };
    Ok(YearComparison {
        available_years,
        first: Some(first),
        second: Some(second),
        variation: Some(variation),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolComparisonRow {
    pub year: i64,
    pub first: f64,
    pub second: f64,
    pub difference: f64,
}

/// Year-by-year mean proficiency of two schools in one grade. A year without
/// data for a school counts as 0 for that school.
pub fn school_comparison(
    conn: &Connection,
    first_school: i64,
    second_school: i64,
    grade_id: &str,
) -> Result<Vec<SchoolComparisonRow>, StoreError> {
    let mut years = distinct_years(conn)?;
    years.sort_unstable();

    let mut stmt = conn
        .prepare(
            "SELECT AVG(mean_proficiency) FROM performances
             WHERE school_id = ? AND grade_id = ? AND year = ?",
        )
        .map_err(query_err)?;
    let mut mean_for = |school: i64, year: i64| -> Result<f64, StoreError> {
        let v: Option<f64> = stmt
            .query_row((school, grade_id, year), |r| r.get(0))
            .map_err(query_err)?;
        Ok(v.unwrap_or(0.0))
    };

    let mut rows = Vec::with_capacity(years.len());
    for year in years {
        let e1 = mean_for(first_school, year)?;
        let e2 = mean_for(second_school, year)?;
        rows.push(SchoolComparisonRow {
            year,
            first: round2(e1),
            second: round2(e2),
            difference: round2(e2 - e1),
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetComparisonRow {
    pub year: i64,
    pub subject_name: String,
    pub grade_name: String,
    pub target_proficiency: f64,
    pub target_adequate_advanced_pct: f64,
    pub mean_proficiency: Option<f64>,
    pub adequate_advanced_pct: Option<f64>,
    pub proficiency_met: Option<bool>,
    pub adequate_advanced_met: Option<bool>,
}

/// Municipal results against the stored targets, one row per target.
/// Targets for which no records exist keep null results.
pub fn target_comparison(
    conn: &Connection,
    year: Option<i64>,
) -> Result<Vec<TargetComparisonRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT t.year, sub.name, g.name, t.target_proficiency, t.target_adequate_advanced_pct,
                    (SELECT AVG(p.mean_proficiency) FROM performances p
                      WHERE p.year = t.year AND p.subject_id = t.subject_id AND p.grade_id = t.grade_id),
                    (SELECT AVG(p.adequate + p.advanced) FROM performances p
                      WHERE p.year = t.year AND p.subject_id = t.subject_id AND p.grade_id = t.grade_id)
             FROM municipal_targets t
             JOIN subjects sub ON sub.id = t.subject_id
             JOIN grades g ON g.id = t.grade_id
             WHERE (?1 IS NULL OR t.year = ?1)
             ORDER BY t.year DESC, g.name, sub.name",
        )
        .map_err(query_err)?;
    stmt.query_map([year], |r| {
        let target_proficiency: f64 = r.get(3)?;
        let target_pct: f64 = r.get(4)?;
        let mean: Option<f64> = r.get(5)?;
        let pct: Option<f64> = r.get(6)?;
        Ok(TargetComparisonRow {
            year: r.get(0)?,
            subject_name: r.get(1)?,
            grade_name: r.get(2)?,
            target_proficiency,
            target_adequate_advanced_pct: target_pct,
            mean_proficiency: mean.map(round2),
            adequate_advanced_pct: pct.map(round2),
            proficiency_met: mean.map(|m| m >= target_proficiency),
            adequate_advanced_met: pct.map(|p| p >= target_pct),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}
