use serde::{Deserialize, Serialize};

/// Share of students in each achievement band, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub below_basic: f64,
    pub basic: f64,
    pub adequate: f64,
    pub advanced: f64,
}

impl Distribution {
    pub fn new(below_basic: f64, basic: f64, adequate: f64, advanced: f64) -> Self {
        Self {
            below_basic,
            basic,
            adequate,
            advanced,
        }
    }

    pub fn total(&self) -> f64 {
        self.below_basic + self.basic + self.adequate + self.advanced
    }

    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            below_basic: f(self.below_basic),
            basic: f(self.basic),
            adequate: f(self.adequate),
            advanced: f(self.advanced),
        }
    }
}

/// Half-away-from-zero rounding to 2 decimals, matching the DECIMAL(5,2)
/// columns the percentages are stored in.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Rescale the four band percentages so they sum to 100.
///
/// Only a positive total other than exactly 100 is rescaled. A zero or
/// negative total comes back untouched; negative shares are not rejected here.
pub fn normalize_distribution(d: Distribution) -> Distribution {
    let total = d.total();
    if total <= 0.0 || total == 100.0 {
        return d;
    }
    let factor = 100.0 / total;
    d.map(|v| round2(v * factor))
}

/// Participation rate in percent; 0 when no students were expected.
pub fn participation_rate(students_expected: i64, students_assessed: i64) -> f64 {
    if students_expected > 0 {
        (students_assessed as f64 / students_expected as f64) * 100.0
    } else {
        0.0
    }
}
