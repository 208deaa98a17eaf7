//! Plan-to-Table Mapper — projects a `Plan` onto the fixed spreadsheet template.
//!
//! The template layout is fixed: header cells in rows 1–4, one data row per
//! plan row starting at row 8. Columns A–F carry values that repeat across
//! consecutive sessions, so they are written only where the value changes.
//! Rendering works on bytes in memory and never touches the filesystem.

use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use tracing::debug;
use umya_spreadsheet::{Border, Spreadsheet, VerticalAlignmentValues, Worksheet};

use crate::errors::PipelineError;
use crate::planning::models::{Plan, PlanRow};

/// Excel rejects sheet names longer than this.
pub const SHEET_NAME_MAX_CHARS: usize = 31;
pub const FIRST_DATA_ROW: u32 = 8;

const CELL_FONT: &str = "Calibri";
const CELL_FONT_SIZE: f64 = 9.0;

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

const ACADEMIC_YEAR_CELL: &str = "B1";
const LEVEL_CELL: &str = "E1";
const STAGE_CELL: &str = "F1";
const GROUP_CELL: &str = "L1";
const UNIT_TITLE_CELL: &str = "B3";
const JUSTIFICATION_CELL: &str = "B4";
const NOTES_CELL: &str = "O8";

/// Last column the mapper writes (O).
const LAST_MAPPED_COLUMN: u32 = 15;

/// Columns A–F: written only on the first row or when the value changes. A
/// changed empty value is still written so it clears the template cell.
const SUPPRESSED_COLUMNS: [(u32, fn(&PlanRow) -> &str); 6] = [
    (1, |r| r.key_competences.as_str()),
    (2, |r| r.same_area_criterion.as_str()),
    (3, |r| r.related_area_criterion.as_str()),
    (4, |r| r.foundational_knowledge.as_str()),
    (5, |r| r.specific_knowledge.as_str()),
    (6, |r| r.evaluation_criteria.as_str()),
];

/// Text columns written on every row. Column H is left to the template and
/// column I holds the numeric percentage.
const ALWAYS_WRITTEN_COLUMNS: [(u32, fn(&PlanRow) -> &str); 6] = [
    (7, |r| r.achievement_indicators.as_str()),
    (10, |r| r.evaluation_instruments.as_str()),
    (11, |r| r.timing.as_str()),
    (12, |r| r.activities.as_str()),
    (13, |r| r.resources.as_str()),
    (14, |r| r.space.as_str()),
];

const PERCENTAGE_COLUMN: u32 = 9;

// ────────────────────────────────────────────────────────────────────────────
// Template
// ────────────────────────────────────────────────────────────────────────────

/// The workbook every plan is rendered into, held as raw xlsx bytes so each
/// render starts from a pristine copy.
#[derive(Debug, Clone)]
pub struct SpreadsheetTemplate {
    bytes: Bytes,
}

impl SpreadsheetTemplate {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read spreadsheet template {}", path.display()))?;
        let template = Self::from_bytes(bytes);
        template
            .open()
            .with_context(|| format!("Invalid spreadsheet template {}", path.display()))?;
        Ok(template)
    }

    fn open(&self) -> Result<Spreadsheet, PipelineError> {
        umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(self.bytes.as_ref()), true)
            .map_err(|e| PipelineError::Template(format!("cannot read template: {e}")))
    }
}

#[cfg(test)]
impl SpreadsheetTemplate {
    /// One-sheet workbook with a couple of labels in the column header row.
    pub(crate) fn blank() -> Self {
        let mut book = umya_spreadsheet::new_file();
        if let Some(sheet) = book.get_sheet_mut(&0) {
            sheet.get_cell_mut("A7").set_value("Competencias");
            sheet.get_cell_mut("I7").set_value("%");
        }
        let mut out = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out).unwrap();
        Self::from_bytes(out.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rendering
// ────────────────────────────────────────────────────────────────────────────

/// Renders `plan` into a fresh copy of `template` and returns the xlsx bytes.
pub fn render(plan: &Plan, template: &SpreadsheetTemplate) -> Result<Vec<u8>, PipelineError> {
    let mut book = template.open()?;
    let sheet = book
        .get_sheet_mut(&0)
        .ok_or_else(|| PipelineError::Template("template has no worksheet".to_string()))?;

    if !plan.metadata.unit_title.trim().is_empty() {
        sheet.set_name(sheet_name(&plan.metadata.unit_title));
    }

    write_header(sheet, plan);
    write_rows(sheet, &plan.rows);
    if !plan.universal_design_notes.is_empty() {
        sheet
            .get_cell_mut(NOTES_CELL)
            .set_value(plan.universal_design_notes.as_str());
    }
    style_data_rows(sheet, plan.rows.len());

    let mut out = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out)
        .map_err(|e| PipelineError::Template(format!("cannot write workbook: {e}")))?;
    debug!(
        "Rendered plan '{}' with {} rows",
        plan.metadata.unit_title,
        plan.rows.len()
    );
    Ok(out.into_inner())
}

/// First 31 characters of the unit title, with the characters Excel forbids
/// in sheet names replaced by spaces. Spaces are kept as they are.
pub fn sheet_name(unit_title: &str) -> String {
    unit_title
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => ' ',
            c => c,
        })
        .take(SHEET_NAME_MAX_CHARS)
        .collect()
}

fn write_header(sheet: &mut Worksheet, plan: &Plan) {
    let meta = &plan.metadata;
    for (cell, value) in [
        (ACADEMIC_YEAR_CELL, &meta.academic_year),
        (LEVEL_CELL, &meta.level),
        (STAGE_CELL, &meta.stage),
        (GROUP_CELL, &meta.group),
        (UNIT_TITLE_CELL, &meta.unit_title),
        (JUSTIFICATION_CELL, &meta.justification),
    ] {
        sheet.get_cell_mut(cell).set_value(value.as_str());
    }
}

fn write_rows(sheet: &mut Worksheet, rows: &[PlanRow]) {
    let mut previous: Option<&PlanRow> = None;
    for (row, excel_row) in rows.iter().zip(FIRST_DATA_ROW..) {
        for (column, field) in SUPPRESSED_COLUMNS {
            let value = field(row);
            let repeated = previous.is_some_and(|prev| field(prev) == value);
            if !repeated {
                sheet.get_cell_mut((column, excel_row)).set_value(value);
            }
        }

        for (column, field) in ALWAYS_WRITTEN_COLUMNS {
            sheet.get_cell_mut((column, excel_row)).set_value(field(row));
        }
        sheet
            .get_cell_mut((PERCENTAGE_COLUMN, excel_row))
            .set_value_number(row.percentage);

        previous = Some(row);
    }
}

/// Wrap, top alignment, Calibri 9 and thin borders on every non-empty cell of
/// the data rows. Styles are set per cell.
fn style_data_rows(sheet: &mut Worksheet, row_count: usize) {
    let last_column = sheet.get_highest_column().max(LAST_MAPPED_COLUMN);
    for excel_row in (FIRST_DATA_ROW..).take(row_count) {
        for column in 1..=last_column {
            let filled = sheet
                .get_cell((column, excel_row))
                .is_some_and(|cell| !cell.get_value().is_empty());
            if !filled {
                continue;
            }

            let style = sheet.get_style_mut((column, excel_row));
            let alignment = style.get_alignment_mut();
            alignment.set_wrap_text(true);
            alignment.set_vertical(VerticalAlignmentValues::Top);

            let font = style.get_font_mut();
            font.set_name(CELL_FONT);
            font.set_size(CELL_FONT_SIZE);

            let borders = style.get_borders_mut();
            borders.get_left_mut().set_border_style(Border::BORDER_THIN);
            borders.get_right_mut().set_border_style(Border::BORDER_THIN);
            borders.get_top_mut().set_border_style(Border::BORDER_THIN);
            borders.get_bottom_mut().set_border_style(Border::BORDER_THIN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::models::PlanMetadata;

    fn blank_template() -> SpreadsheetTemplate {
        SpreadsheetTemplate::blank()
    }

    fn read_back(bytes: Vec<u8>) -> Spreadsheet {
        umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true).unwrap()
    }

    fn row(key_competences: &str, criterion: &str, timing: &str, percentage: f64) -> PlanRow {
        PlanRow {
            key_competences: key_competences.to_string(),
            same_area_criterion: criterion.to_string(),
            timing: timing.to_string(),
            activities: format!("Activities of {timing}"),
            percentage,
            ..Default::default()
        }
    }

    fn plan(title: &str, rows: Vec<PlanRow>) -> Plan {
        Plan {
            metadata: PlanMetadata {
                academic_year: "2025-2026".to_string(),
                level: "3º".to_string(),
                stage: "PRIMARIA".to_string(),
                group: "A-B-C".to_string(),
                unit_title: title.to_string(),
                justification: "Justificación".to_string(),
            },
            rows,
            universal_design_notes: "1. Feedback formativo".to_string(),
        }
    }

    #[test]
    fn test_header_cells_and_notes() {
        let plan = plan("SA4 Toma tu parte", vec![row("CCL", "1.", "Session 1", 1.0)]);
        let book = read_back(render(&plan, &blank_template()).unwrap());
        let sheet = book.get_sheet(&0).unwrap();

        assert_eq!(sheet.get_name(), "SA4 Toma tu parte");
        assert_eq!(sheet.get_value("B1"), "2025-2026");
        assert_eq!(sheet.get_value("E1"), "3º");
        assert_eq!(sheet.get_value("F1"), "PRIMARIA");
        assert_eq!(sheet.get_value("L1"), "A-B-C");
        assert_eq!(sheet.get_value("B3"), "SA4 Toma tu parte");
        assert_eq!(sheet.get_value("B4"), "Justificación");
        assert_eq!(sheet.get_value("O8"), "1. Feedback formativo");
        // template content outside the mapped cells survives
        assert_eq!(sheet.get_value("A7"), "Competencias");
    }

    #[test]
    fn test_run_length_suppression_per_column() {
        let rows = vec![
            row("X", "C1", "Session 1", 0.3),
            row("X", "C2", "Session 2", 0.3),
            row("Y", "C2", "Session 3", 0.4),
        ];
        let book = read_back(render(&plan("SA1", rows), &blank_template()).unwrap());
        let sheet = book.get_sheet(&0).unwrap();

        assert_eq!(sheet.get_value("A8"), "X");
        assert_eq!(sheet.get_value("A9"), "");
        assert_eq!(sheet.get_value("A10"), "Y");

        assert_eq!(sheet.get_value("B8"), "C1");
        assert_eq!(sheet.get_value("B9"), "C2");
        assert_eq!(sheet.get_value("B10"), "");

        // always-written columns repeat on every row
        assert_eq!(sheet.get_value("K8"), "Session 1");
        assert_eq!(sheet.get_value("K9"), "Session 2");
        assert_eq!(sheet.get_value("K10"), "Session 3");
        assert_eq!(sheet.get_value("L10"), "Activities of Session 3");
    }

    #[test]
    fn test_percentage_is_numeric() {
        let rows = vec![row("X", "C1", "Session 1", 0.25), row("X", "C1", "Session 2", 0.75)];
        let book = read_back(render(&plan("SA1", rows), &blank_template()).unwrap());
        let sheet = book.get_sheet(&0).unwrap();
        let cell = sheet.get_cell("I8").unwrap();
        assert_eq!(cell.get_value_number(), Some(0.25));
        assert_eq!(sheet.get_cell("I9").unwrap().get_value_number(), Some(0.75));
    }

    #[test]
    fn test_long_title_is_cut_to_sheet_name_limit() {
        let title = "SA4 Una unidad con un título muy largo";
        assert_eq!(title.chars().count(), 38);
        let title = format!("{title}!!");
        assert_eq!(title.chars().count(), 40);

        let book = read_back(
            render(&plan(&title, vec![row("X", "C", "Session 1", 1.0)]), &blank_template())
                .unwrap(),
        );
        let name = book.get_sheet(&0).unwrap().get_name().to_string();
        assert_eq!(name.chars().count(), SHEET_NAME_MAX_CHARS);
        assert!(title.starts_with(&name));
    }

    #[test]
    fn test_sheet_name_replaces_forbidden_characters() {
        assert_eq!(sheet_name("SA1: Agua/Aire"), "SA1  Agua Aire");
    }

    #[test]
    fn test_sheet_name_keeps_space_at_cut_position() {
        let title = format!("{} {}", "A".repeat(30), "B".repeat(9));
        assert_eq!(title.chars().count(), 40);

        let book = read_back(
            render(&plan(&title, vec![row("X", "C", "Session 1", 1.0)]), &blank_template())
                .unwrap(),
        );
        let name = book.get_sheet(&0).unwrap().get_name().to_string();
        assert_eq!(name.chars().count(), SHEET_NAME_MAX_CHARS);
        assert_eq!(name, format!("{} ", "A".repeat(30)));
        assert_eq!(sheet_name("  SA2"), "  SA2");
    }

    #[test]
    fn test_blank_title_keeps_template_sheet_name() {
        let template = blank_template();
        let original = read_back(template.bytes.to_vec())
            .get_sheet(&0)
            .unwrap()
            .get_name()
            .to_string();
        let book = read_back(
            render(&plan("   ", vec![row("X", "C", "Session 1", 1.0)]), &template).unwrap(),
        );
        assert_eq!(book.get_sheet(&0).unwrap().get_name(), original);
    }

    #[test]
    fn test_changed_empty_value_clears_template_cell() {
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_mut(&0)
            .unwrap()
            .get_cell_mut("B9")
            .set_value("placeholder");
        let mut out = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out).unwrap();
        let template = SpreadsheetTemplate::from_bytes(out.into_inner());

        let rows = vec![row("X", "C1", "Session 1", 0.5), row("X", "", "Session 2", 0.5)];
        let book = read_back(render(&plan("SA1", rows), &template).unwrap());
        let sheet = book.get_sheet(&0).unwrap();
        assert_eq!(sheet.get_value("B8"), "C1");
        assert_eq!(sheet.get_value("B9"), "");
    }

    #[test]
    fn test_data_cells_are_styled() {
        let book = read_back(
            render(&plan("SA1", vec![row("X", "C", "Session 1", 1.0)]), &blank_template())
                .unwrap(),
        );
        let sheet = book.get_sheet(&0).unwrap();
        let style = sheet.get_style("K8");
        let font = style.get_font().unwrap();
        assert_eq!(font.get_name(), CELL_FONT);
        assert_eq!(*font.get_size(), CELL_FONT_SIZE);
        let alignment = style.get_alignment().unwrap();
        assert!(*alignment.get_wrap_text());
        let borders = style.get_borders().unwrap();
        assert_eq!(borders.get_left().get_border_style(), Border::BORDER_THIN);
        assert_eq!(borders.get_bottom().get_border_style(), Border::BORDER_THIN);
    }

    #[test]
    fn test_unreadable_template_is_template_error() {
        let template = SpreadsheetTemplate::from_bytes(b"not a zip archive".to_vec());
        let err = render(&plan("SA1", vec![row("X", "C", "S1", 1.0)]), &template).unwrap_err();
        assert!(matches!(err, PipelineError::Template(_)));
    }

    #[test]
    fn test_from_path_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(SpreadsheetTemplate::from_path(&path).is_err());
        assert!(SpreadsheetTemplate::from_path(dir.path().join("missing.xlsx")).is_err());
    }
}
