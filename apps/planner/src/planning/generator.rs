//! Plan generation — orchestrates the full pipeline.
//!
//! Flow: extract book → extract justification → for each unit:
//!       build prompt → AI invoke → parse plan → render sheet.
//!
//! Units run sequentially. The first unit failure aborts the rest of the
//! batch; results completed before it are kept and returned.

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::extract::{ExtractedText, Extraction, ExtractionProgress, SourceDocument};
use crate::llm_client::{AiProvider, AiRequest};
use crate::planning::models::{GenerationContext, Plan};
use crate::planning::parser::parse_plan;
use crate::planning::prompts::{build_prompt, plan_system_instructions};
use crate::sheet::{render, SpreadsheetTemplate};

/// Used in file names when no subject was given.
const DEFAULT_SUBJECT: &str = "Subject";
const DEFAULT_UNIT: &str = "Unit";

// Progress bands reported to the status tracker.
const BOOK_BAND: (u8, u8) = (5, 25);
const JUSTIFICATION_BAND: (u8, u8) = (30, 40);
const UNITS_BASE: f64 = 40.0;
const UNITS_SPAN: f64 = 45.0;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// One finished unit. Immutable once produced.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub unit_name: String,
    pub spreadsheet_bytes: Bytes,
    pub file_name: String,
}

/// The unit that stopped a batch, and why.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit_name: String,
    pub error: PipelineError,
}

/// Outcome of a batch: every unit completed before the first failure, plus
/// that failure if there was one.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<GenerationResult>,
    pub failure: Option<UnitFailure>,
}

/// Provider, model and credential resolved from the session for one batch.
#[derive(Clone, Copy)]
pub struct AiSession<'a> {
    pub provider: &'a dyn AiProvider,
    pub model: &'a str,
    pub api_key: &'a str,
}

/// Character ceilings applied at extraction time.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub book_max_chars: usize,
    pub justification_max_chars: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Status tracking
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    #[default]
    Idle,
    Extracting,
    CallingAi,
    GeneratingSheet,
    Done,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingState {
    pub stage: ProcessingStage,
    /// 0 – 100
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
}

/// Records every state the pipeline goes through, in order.
#[derive(Debug, Default)]
pub struct StatusTracker {
    history: Vec<ProcessingState>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, stage: ProcessingStage, progress: u8, message: impl Into<String>) {
        self.history.push(ProcessingState {
            stage,
            progress: progress.min(100),
            message: message.into(),
            error: None,
        });
    }

    /// Error resets progress to 0.
    pub fn fail(&mut self, error: &PipelineError) {
        self.history.push(ProcessingState {
            stage: ProcessingStage::Error,
            progress: 0,
            message: "Generation failed".to_string(),
            error: Some(error.to_string()),
        });
    }

    pub fn current(&self) -> ProcessingState {
        self.history.last().cloned().unwrap_or_default()
    }

    pub fn history(&self) -> &[ProcessingState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<ProcessingState> {
        self.history
    }
}

fn band_progress((low, high): (u8, u8), percentage: u8) -> u8 {
    let span = f64::from(high - low);
    low + (f64::from(percentage.min(100)) / 100.0 * span).round() as u8
}

/// Progress while unit `index` of `total` is at `fraction` of its own work.
fn unit_progress(index: usize, total: usize, fraction: f64) -> u8 {
    let total = total.max(1) as f64;
    (UNITS_BASE + ((index as f64 + fraction) / total * UNITS_SPAN).round()) as u8
}

// ────────────────────────────────────────────────────────────────────────────
// Inputs
// ────────────────────────────────────────────────────────────────────────────

/// Splits a comma-separated unit list, dropping blanks: "SA3, SA4," → [SA3, SA4].
pub fn parse_unit_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|unit| !unit.is_empty())
        .map(str::to_string)
        .collect()
}

/// `Plan_{unit}_{subject}.xlsx` with both parts sanitized.
pub fn output_file_name(unit_name: &str, subject: Option<&str>) -> String {
    let unit = Some(sanitize_file_part(unit_name))
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_UNIT.to_string());
    let subject = subject
        .map(sanitize_file_part)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
    format!("Plan_{unit}_{subject}.xlsx")
}

/// Keeps ASCII letters and digits, whitespace and Spanish accented letters.
fn sanitize_file_part(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            c.is_ascii_alphanumeric() || c.is_whitespace() || "áéíóúñüÁÉÍÓÚÑÜ".contains(*c)
        })
        .collect::<String>()
        .trim()
        .to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Runs the whole pipeline. Extraction failures are returned as errors;
/// unit failures end up in the returned `BatchOutcome`.
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    session: AiSession<'_>,
    template: &SpreadsheetTemplate,
    book: SourceDocument,
    justification: SourceDocument,
    limits: ExtractionLimits,
    units: &[String],
    context: &GenerationContext,
    tracker: &mut StatusTracker,
) -> Result<BatchOutcome, PipelineError> {
    let book_text = match extract_stage(book, limits.book_max_chars, BOOK_BAND, tracker).await {
        Ok(text) => text,
        Err(e) => {
            tracker.fail(&e);
            return Err(e);
        }
    };
    let justification_text = match extract_stage(
        justification,
        limits.justification_max_chars,
        JUSTIFICATION_BAND,
        tracker,
    )
    .await
    {
        Ok(text) => text,
        Err(e) => {
            tracker.fail(&e);
            return Err(e);
        }
    };

    Ok(generate_plans(
        session,
        template,
        book_text.as_str(),
        justification_text.as_str(),
        units,
        context,
        tracker,
    )
    .await)
}

/// Extracts one document on the blocking pool and replays its progress into
/// `tracker`, mapped onto `band`.
async fn extract_stage(
    doc: SourceDocument,
    max_chars: usize,
    band: (u8, u8),
    tracker: &mut StatusTracker,
) -> Result<ExtractedText, PipelineError> {
    let file_name = doc.file_name.clone();
    tracker.report(
        ProcessingStage::Extracting,
        band.0,
        format!("Extracting text from {file_name}"),
    );

    let (text, events) = tokio::task::spawn_blocking(move || extract_collecting(doc, max_chars))
        .await
        .map_err(|e| PipelineError::ExtractionFailed {
            file_name: file_name.clone(),
            reason: format!("extraction task failed: {e}"),
        })??;

    let mut last = band.0;
    for event in events {
        let progress = band_progress(band, event.percentage);
        if progress != last {
            tracker.report(
                ProcessingStage::Extracting,
                progress,
                format!(
                    "Extracting text from {file_name} ({}/{})",
                    event.units_processed, event.units_total
                ),
            );
            last = progress;
        }
    }

    info!(
        "Extracted {} characters from {}{}",
        text.char_len(),
        file_name,
        if text.was_truncated() { " (truncated)" } else { "" }
    );
    Ok(text)
}

fn extract_collecting(
    doc: SourceDocument,
    max_chars: usize,
) -> Result<(ExtractedText, Vec<ExtractionProgress>), PipelineError> {
    let mut extraction = Extraction::start(doc)?;
    debug!("Decoding {}", extraction.file_name());
    let events: Vec<ExtractionProgress> = extraction.by_ref().collect();
    Ok((extraction.finish(max_chars), events))
}

/// Generates one spreadsheet per unit, in order, stopping at the first failure.
pub async fn generate_plans(
    session: AiSession<'_>,
    template: &SpreadsheetTemplate,
    book_text: &str,
    justification_text: &str,
    units: &[String],
    context: &GenerationContext,
    tracker: &mut StatusTracker,
) -> BatchOutcome {
    let system = plan_system_instructions();
    let mut outcome = BatchOutcome::default();

    for (index, unit_name) in units.iter().enumerate() {
        let step = UnitStep {
            session,
            template,
            system: &system,
            index,
            total: units.len(),
        };
        match step
            .run(book_text, justification_text, unit_name, context, tracker)
            .await
        {
            Ok(result) => {
                info!("Generated {} for unit {}", result.file_name, unit_name);
                outcome.results.push(result);
            }
            Err(error) => {
                warn!("Unit {} failed, aborting batch: {}", unit_name, error);
                tracker.fail(&error);
                outcome.failure = Some(UnitFailure {
                    unit_name: unit_name.clone(),
                    error,
                });
                return outcome;
            }
        }
    }

    tracker.report(
        ProcessingStage::Done,
        100,
        format!("Generated {} plan(s)", outcome.results.len()),
    );
    outcome
}

struct UnitStep<'a> {
    session: AiSession<'a>,
    template: &'a SpreadsheetTemplate,
    system: &'a str,
    index: usize,
    total: usize,
}

impl UnitStep<'_> {
    async fn run(
        &self,
        book_text: &str,
        justification_text: &str,
        unit_name: &str,
        context: &GenerationContext,
        tracker: &mut StatusTracker,
    ) -> Result<GenerationResult, PipelineError> {
        tracker.report(
            ProcessingStage::CallingAi,
            unit_progress(self.index, self.total, 0.5),
            format!("Generating plan for {unit_name}"),
        );

        let prompt = build_prompt(book_text, justification_text, unit_name, Some(context));
        let request = AiRequest {
            system: self.system,
            prompt: &prompt,
            api_key: self.session.api_key,
        };
        let raw = self
            .session
            .provider
            .invoke(self.session.model, &request)
            .await?;

        let plan = parse_plan(&raw)?;
        warn_on_advisory_checks(unit_name, &plan);

        tracker.report(
            ProcessingStage::GeneratingSheet,
            unit_progress(self.index, self.total, 0.8),
            format!("Writing spreadsheet for {unit_name}"),
        );
        let template = self.template.clone();
        let bytes = tokio::task::spawn_blocking(move || render(&plan, &template))
            .await
            .map_err(|e| PipelineError::Template(format!("rendering task failed: {e}")))??;

        Ok(GenerationResult {
            unit_name: unit_name.to_string(),
            spreadsheet_bytes: Bytes::from(bytes),
            file_name: output_file_name(unit_name, context.subject()),
        })
    }
}

fn warn_on_advisory_checks(unit_name: &str, plan: &Plan) {
    if !plan.has_plausible_percentages() {
        warn!(
            "Plan for {} has percentages summing to {:.3}, outside the expected range",
            unit_name,
            plan.percentage_total()
        );
    }
    if !plan.has_expected_row_count() {
        warn!(
            "Plan for {} has {} rows, outside the expected range",
            unit_name,
            plan.rows.len()
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
