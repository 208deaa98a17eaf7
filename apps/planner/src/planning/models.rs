//! Plan data model — what the AI produces and the sheet mapper consumes.

use serde::{Deserialize, Serialize};

/// Accepted range for the sum of row percentages.
pub const PERCENTAGE_SUM_RANGE: (f64, f64) = (0.95, 1.0);
/// Expected number of rows in a realistic plan.
pub const EXPECTED_ROW_RANGE: (usize, usize) = (8, 20);

const SUM_TOLERANCE: f64 = 1e-9;

/// Optional descriptive parameters merged verbatim into the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationContext {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl GenerationContext {
    /// Non-blank subject, trimmed.
    pub fn subject(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Header data written to the top of the sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanMetadata {
    /// e.g. "2025-2026"
    pub academic_year: String,
    /// e.g. "3º"
    pub level: String,
    /// e.g. "PRIMARIA"
    pub stage: String,
    /// e.g. "A-B-C"
    pub group: String,
    /// e.g. "SA4 Take your part"
    pub unit_title: String,
    pub justification: String,
}

/// One teaching session or sub-block. Row order is session order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanRow {
    pub key_competences: String,
    pub same_area_criterion: String,
    pub related_area_criterion: String,
    pub foundational_knowledge: String,
    pub specific_knowledge: String,
    pub evaluation_criteria: String,
    pub achievement_indicators: String,
    /// Weight of the row in the unit grade, in (0, 1].
    pub percentage: f64,
    pub evaluation_instruments: String,
    pub timing: String,
    pub activities: String,
    pub resources: String,
    pub space: String,
}

/// Built only by `parser::parse_plan`, which tolerates loosely typed AI output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub metadata: PlanMetadata,
    pub rows: Vec<PlanRow>,
    /// Universal Design for Learning notes, written once next to the first row.
    pub universal_design_notes: String,
}

impl Plan {
    pub fn percentage_total(&self) -> f64 {
        self.rows.iter().map(|r| r.percentage).sum()
    }

    /// Advisory: the AI is asked for a total within `PERCENTAGE_SUM_RANGE`.
    /// Never enforced as a pipeline error.
    pub fn has_plausible_percentages(&self) -> bool {
        let total = self.percentage_total();
        let (low, high) = PERCENTAGE_SUM_RANGE;
        total >= low - SUM_TOLERANCE && total <= high + SUM_TOLERANCE
    }

    /// Advisory: row count within `EXPECTED_ROW_RANGE`.
    pub fn has_expected_row_count(&self) -> bool {
        let (low, high) = EXPECTED_ROW_RANGE;
        (low..=high).contains(&self.rows.len())
    }
}
