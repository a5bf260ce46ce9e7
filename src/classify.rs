//! Proficiency bands on the SABE/SAEB scales.
//!
//! Grade and subject labels are free text in the catalog, so both are parsed
//! into closed sets before a scale is chosen:
//!
//! * grade: lowercased, ordinal markers (`º`, `ª`, `°`) removed, trimmed; then
//!   the first of the digits `2`, `5`, `9` found (checked in that order) picks
//!   the tier. `"2º ano"`, `"5 ano"`, `"9º Ano"` all resolve.
//! * subject: uppercased and trimmed; `LP`, `PORT` or any name containing
//!   `PORT` (e.g. `Língua Portuguesa`) is language arts; `MT`, `MAT` or any
//!   name containing `MAT` (e.g. `Matemática`) is mathematics.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeTier {
    Second,
    Fifth,
    Ninth,
    Unrecognized,
}

impl GradeTier {
    pub fn parse(label: &str) -> Self {
        let normalized: String = label
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, 'º' | 'ª' | '°'))
            .collect();
        let normalized = normalized.trim();
        // Label digits are not validated, so "2" wins over "5" and "9".
        if normalized.contains('2') {
            Self::Second
        } else if normalized.contains('5') {
            Self::Fifth
        } else if normalized.contains('9') {
            Self::Ninth
        } else {
            Self::Unrecognized
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectArea {
    LanguageArts,
    Mathematics,
    Unrecognized,
}

impl SubjectArea {
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_uppercase();
        match normalized.as_str() {
            "LP" | "PORT" => Self::LanguageArts,
            "MT" | "MAT" => Self::Mathematics,
            s if s.contains("PORT") => Self::LanguageArts,
            s if s.contains("MAT") => Self::Mathematics,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Band {
    BelowBasic,
    Basic,
    Adequate,
    Advanced,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::BelowBasic => "Abaixo do Básico",
            Band::Basic => "Básico",
            Band::Adequate => "Adequado",
            Band::Advanced => "Avançado",
        }
    }
}

/// Where a classification is displayed. The two surfaces historically print
/// different text for an unclassifiable cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Surface {
    #[default]
    Screen,
    Export,
}

impl Surface {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "screen" => Some(Self::Screen),
            "export" | "pdf" => Some(Self::Export),
            _ => None,
        }
    }
}

pub const NO_DATA_LABEL: &str = "Sem dados";
pub const NOT_CLASSIFIABLE_SCREEN_LABEL: &str = "-";
pub const NOT_CLASSIFIABLE_EXPORT_LABEL: &str = "Não classificado";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Band(Band),
    NoData,
    NotClassifiable,
}

impl Classification {
    pub fn label(self, surface: Surface) -> &'static str {
        match (self, surface) {
            (Classification::Band(b), _) => b.label(),
            (Classification::NoData, _) => NO_DATA_LABEL,
            (Classification::NotClassifiable, Surface::Screen) => NOT_CLASSIFIABLE_SCREEN_LABEL,
            (Classification::NotClassifiable, Surface::Export) => NOT_CLASSIFIABLE_EXPORT_LABEL,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            Classification::Band(Band::BelowBasic) => "belowBasic",
            Classification::Band(Band::Basic) => "basic",
            Classification::Band(Band::Adequate) => "adequate",
            Classification::Band(Band::Advanced) => "advanced",
            Classification::NoData => "noData",
            Classification::NotClassifiable => "notClassifiable",
        }
    }

    pub fn band(self) -> Option<Band> {
        match self {
            Classification::Band(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    /// `score < cut` stays in the lower band.
    Strict,
    /// `score <= cut` stays in the lower band.
    Inclusive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scale {
    cuts: [f64; 3],
    comparison: Comparison,
}

const SECOND_SHARED: Scale = Scale {
    cuts: [700.0, 750.0, 800.0],
    comparison: Comparison::Strict,
};
const FIFTH_LANGUAGE: Scale = Scale {
    cuts: [150.0, 200.0, 250.0],
    comparison: Comparison::Inclusive,
};
const FIFTH_MATH: Scale = Scale {
    cuts: [175.0, 225.0, 275.0],
    comparison: Comparison::Inclusive,
};
const NINTH_LANGUAGE: Scale = Scale {
    cuts: [200.0, 275.0, 325.0],
    comparison: Comparison::Inclusive,
};
const NINTH_MATH: Scale = Scale {
    cuts: [225.0, 300.0, 350.0],
    comparison: Comparison::Inclusive,
};

const BANDS: [Band; 4] = [Band::BelowBasic, Band::Basic, Band::Adequate, Band::Advanced];

impl Scale {
    fn for_pair(tier: GradeTier, area: SubjectArea) -> Option<Scale> {
        match (tier, area) {
            (_, SubjectArea::Unrecognized) => None,
            (GradeTier::Second, _) => Some(SECOND_SHARED),
            (GradeTier::Fifth, SubjectArea::LanguageArts) => Some(FIFTH_LANGUAGE),
            (GradeTier::Fifth, SubjectArea::Mathematics) => Some(FIFTH_MATH),
            (GradeTier::Ninth, SubjectArea::LanguageArts) => Some(NINTH_LANGUAGE),
            (GradeTier::Ninth, SubjectArea::Mathematics) => Some(NINTH_MATH),
            (GradeTier::Unrecognized, _) => None,
        }
    }

    fn band_for(&self, score: f64) -> Band {
        for (cut, band) in self.cuts.iter().zip(BANDS) {
            let below = match self.comparison {
                Comparison::Strict => score < *cut,
                Comparison::Inclusive => score <= *cut,
            };
            if below {
                return band;
            }
        }
        Band::Advanced
    }
}

/// Classify a mean proficiency for the given grade and subject labels.
///
/// Missing (or non-finite) proficiency is `NoData`; an unknown subject is
/// `NotClassifiable` whatever the grade, as is an unknown grade tier.
pub fn classify(grade_label: &str, subject_label: &str, proficiency: Option<f64>) -> Classification {
    let Some(score) = proficiency.filter(|p| p.is_finite()) else {
        return Classification::NoData;
    };
    let area = SubjectArea::parse(subject_label);
    if area == SubjectArea::Unrecognized {
        return Classification::NotClassifiable;
    }
    match Scale::for_pair(GradeTier::parse(grade_label), area) {
        Some(scale) => Classification::Band(scale.band_for(score)),
        None => Classification::NotClassifiable,
    }
}
