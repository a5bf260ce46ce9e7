use crate::classify::{classify, Surface};
use crate::normalize::{round2, Distribution};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Catalog entry (grade or subject) used as a matrix row key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// One stored performance row with its grade/subject names resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    pub year: i64,
    pub grade: Label,
    pub subject: Label,
    pub mean_proficiency: f64,
    pub participation_rate: Option<f64>,
    pub distribution: Distribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectedField {
    Participation,
    BelowBasic,
    Basic,
    Adequate,
    Advanced,
}

const ALL_PERCENT_FIELDS: &[CorrectedField] = &[
    CorrectedField::Participation,
    CorrectedField::BelowBasic,
    CorrectedField::Basic,
    CorrectedField::Adequate,
    CorrectedField::Advanced,
];

/// A data fix scoped to one assessment year: each listed field goes through
/// `correct` before display and classification.
#[derive(Debug, Clone, Copy)]
pub struct UnitCorrection {
    pub name: &'static str,
    pub year: i64,
    pub fields: &'static [CorrectedField],
    pub correct: fn(f64) -> f64,
}

/// Values stored as a fraction of 1 are scaled up to percent.
pub fn fraction_to_percent(v: f64) -> f64 {
    if v <= 1.0 {
        v * 100.0
    } else {
        v
    }
}

/// The 2023 import stored participation and band shares as fractions
/// (0.92 instead of 92). Only that year is known to be affected.
pub const FRACTIONS_2023: UnitCorrection = UnitCorrection {
    name: "fractions-2023",
    year: 2023,
    fields: ALL_PERCENT_FIELDS,
    correct: fraction_to_percent,
};

#[derive(Debug, Clone)]
pub struct CorrectionRules {
    rules: Vec<UnitCorrection>,
}

impl Default for CorrectionRules {
    fn default() -> Self {
        Self {
            rules: vec![FRACTIONS_2023],
        }
    }
}

impl CorrectionRules {
    #[cfg(test)]
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    #[cfg(test)]
    pub fn with(mut self, rule: UnitCorrection) -> Self {
        self.rules.push(rule);
        self
    }

    fn apply(&self, year: i64, cell: &mut CellValues) {
        for rule in self.rules.iter().filter(|r| r.year == year) {
            for field in rule.fields {
                let slot = match field {
                    CorrectedField::Participation => match cell.participation.as_mut() {
                        Some(v) => v,
                        None => continue,
                    },
                    CorrectedField::BelowBasic => &mut cell.distribution.below_basic,
                    CorrectedField::Basic => &mut cell.distribution.basic,
                    CorrectedField::Adequate => &mut cell.distribution.adequate,
                    CorrectedField::Advanced => &mut cell.distribution.advanced,
                };
                *slot = (rule.correct)(*slot);
            }
            tracing::debug!(rule = rule.name, year, "unit correction applied");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CellValues {
    proficiency: f64,
    participation: Option<f64>,
    distribution: Distribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardCell {
    pub year: i64,
    pub proficiency: Option<f64>,
    pub participation: Option<f64>,
    /// Band label; null for a cell without data.
    pub band: Option<&'static str>,
    pub distribution: Option<Distribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardRow {
    pub grade: String,
    pub subject: String,
    pub years: Vec<ReportCardCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDistribution {
    pub subject: String,
    #[serde(flatten)]
    pub distribution: Distribution,
    pub contributing_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub school_id: i64,
    pub school_name: String,
    pub years: Vec<i64>,
    pub rows: Vec<ReportCardRow>,
    pub latest_year: Option<i64>,
    pub chart: Vec<SubjectDistribution>,
}

/// Build the dense grade x subject x year matrix for one school.
///
/// Every known grade is crossed with every known subject, and every year found
/// in `records` becomes a column, so missing cells stay visible as nulls.
/// The chart averages the band shares per subject for the latest year only,
/// over the rows that have data there.
pub fn assemble(
    school_id: i64,
    school_name: &str,
    grades: &[Label],
    subjects: &[Label],
    records: &[PerformanceRow],
    corrections: &CorrectionRules,
) -> ReportCard {
    let years: Vec<i64> = records
        .iter()
        .map(|r| r.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let latest_year = years.last().copied();

    let mut by_key: HashMap<(&str, &str, i64), &PerformanceRow> = HashMap::new();
    for r in records {
        by_key.insert((r.grade.id.as_str(), r.subject.id.as_str(), r.year), r);
    }

    let mut grades_sorted: Vec<&Label> = grades.iter().collect();
    grades_sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let mut subjects_sorted: Vec<&Label> = subjects.iter().collect();
    subjects_sorted.sort_by(|a, b| a.name.cmp(&b.name));

    // subject name -> (sums, contributing row count)
    let mut chart_acc: BTreeMap<String, (Distribution, usize)> = BTreeMap::new();
    let mut rows = Vec::with_capacity(grades_sorted.len() * subjects_sorted.len());

    for grade in &grades_sorted {
        for subject in &subjects_sorted {
            let mut cells = Vec::with_capacity(years.len());
            for &year in &years {
                let Some(rec) = by_key.get(&(grade.id.as_str(), subject.id.as_str(), year)) else {
                    cells.push(ReportCardCell {
                        year,
                        proficiency: None,
                        participation: None,
                        band: None,
                        distribution: None,
                    });
                    continue;
                };

                let mut values = CellValues {
                    proficiency: rec.mean_proficiency,
                    participation: rec.participation_rate,
                    distribution: rec.distribution,
                };
                corrections.apply(year, &mut values);

                let band = classify(&grade.name, &subject.name, Some(values.proficiency))
                    .label(Surface::Screen);

                if Some(year) == latest_year {
                    let entry = chart_acc
                        .entry(subject.name.clone())
                        .or_insert((Distribution::default(), 0));
                    entry.0.below_basic += values.distribution.below_basic;
                    entry.0.basic += values.distribution.basic;
                    entry.0.adequate += values.distribution.adequate;
                    entry.0.advanced += values.distribution.advanced;
                    entry.1 += 1;
                }

                cells.push(ReportCardCell {
                    year,
                    proficiency: Some(values.proficiency),
                    participation: values.participation,
                    band: Some(band),
                    distribution: Some(values.distribution),
                });
            }
            rows.push(ReportCardRow {
                grade: grade.name.clone(),
                subject: subject.name.clone(),
                years: cells,
            });
        }
    }

    let chart = chart_acc
        .into_iter()
        .map(|(subject, (sums, count))| SubjectDistribution {
            subject,
            distribution: sums.map(|v| round2(v / count as f64)),
            contributing_rows: count,
        })
        .collect();

    ReportCard {
        school_id,
        school_name: school_name.to_string(),
        years,
        rows,
        latest_year,
        chart,
    }
}
