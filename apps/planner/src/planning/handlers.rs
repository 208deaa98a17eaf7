//! Axum route handlers for the Plans API.

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{AppError, PipelineError};
use crate::extract::SourceDocument;
use crate::planning::generator::{
    parse_unit_list, run_pipeline, AiSession, ProcessingState, StatusTracker,
};
use crate::planning::models::GenerationContext;
use crate::planning::parser::ResponseDefect;
use crate::state::{AppState, StoredResult};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// Fields of the multipart generation request.
#[derive(Debug, Default)]
struct PlanUpload {
    book: Option<SourceDocument>,
    justification: Option<SourceDocument>,
    units: Option<String>,
    context: GenerationContext,
}

#[derive(Debug, Serialize)]
pub struct GeneratedPlan {
    pub id: Uuid,
    pub unit_name: String,
    pub file_name: String,
    pub size_bytes: usize,
    pub generated_at: DateTime<Utc>,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub unit_name: String,
    pub code: &'static str,
    /// Set when the AI answer could not be used: truncated, malformed or
    /// structurally wrong.
    pub defect: Option<ResponseDefect>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct GeneratePlansResponse {
    pub results: Vec<GeneratedPlan>,
    pub failure: Option<BatchFailure>,
    pub status: ProcessingState,
    pub history: Vec<ProcessingState>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/plans
///
/// Multipart: `book` and `justification` files, `units` (comma separated),
/// optional `level`, `subject` and `group`. Requires a verified session.
/// A failing unit stops the batch but is reported in the body, not as an
/// HTTP error; extraction failures are HTTP errors.
pub async fn handle_generate_plans(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GeneratePlansResponse>, AppError> {
    let (kind, api_key, model) = {
        let settings = state.settings.read().await;
        let api_key = settings
            .api_key()
            .ok_or_else(|| AppError::Validation("No AI API key configured".to_string()))?
            .to_string();
        if !settings.is_verified() {
            return Err(AppError::NotVerified(
                "Verify the AI API key before generating plans".to_string(),
            ));
        }
        let provider = state.providers.get(settings.provider());
        (
            settings.provider(),
            api_key,
            settings.generation_model(provider.as_ref()),
        )
    };

    let upload = read_upload(multipart).await?;
    let book = upload
        .book
        .ok_or_else(|| AppError::Validation("Missing 'book' file".to_string()))?;
    let justification = upload
        .justification
        .ok_or_else(|| AppError::Validation("Missing 'justification' file".to_string()))?;
    let units = parse_unit_list(upload.units.as_deref().unwrap_or_default());
    if units.is_empty() {
        return Err(AppError::Validation(
            "'units' must name at least one unit".to_string(),
        ));
    }

    info!(
        "Generating {} unit(s) with {} ({})",
        units.len(),
        kind.label(),
        model
    );
    let provider = state.providers.get(kind);
    let session = AiSession {
        provider: provider.as_ref(),
        model: &model,
        api_key: &api_key,
    };
    let mut tracker = StatusTracker::new();
    let outcome = run_pipeline(
        session,
        &state.template,
        book,
        justification,
        state.config.extraction_limits(),
        &units,
        &upload.context,
        &mut tracker,
    )
    .await?;

    let generated_at = Utc::now();
    let mut stored = state.results.write().await;
    let results = outcome
        .results
        .into_iter()
        .map(|result| {
            let id = Uuid::new_v4();
            let plan = GeneratedPlan {
                id,
                unit_name: result.unit_name.clone(),
                file_name: result.file_name.clone(),
                size_bytes: result.spreadsheet_bytes.len(),
                generated_at,
                download_url: format!("/api/v1/plans/{id}"),
            };
            stored.insert(
                id,
                StoredResult {
                    unit_name: result.unit_name,
                    file_name: result.file_name,
                    bytes: result.spreadsheet_bytes,
                    generated_at,
                },
            );
            plan
        })
        .collect();
    debug!("{} plan(s) held for download", stored.len());
    drop(stored);

    let failure = outcome.failure.map(|f| BatchFailure {
        unit_name: f.unit_name,
        code: f.error.code(),
        defect: match &f.error {
            PipelineError::InvalidAiResponse(e) => Some(e.kind()),
            _ => None,
        },
        message: f.error.to_string(),
    });
    debug!("Pipeline went through {} states", tracker.history().len());

    Ok(Json(GeneratePlansResponse {
        results,
        failure,
        status: tracker.current(),
        history: tracker.into_history(),
    }))
}

/// GET /api/v1/plans/:id
///
/// Downloads a generated spreadsheet.
pub async fn handle_download_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let result = state
        .results
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Plan {id} not found")))?;
    debug!(
        "Serving {} for unit {} (generated {})",
        result.file_name, result.unit_name, result.generated_at
    );

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&result.file_name),
            ),
        ],
        result.bytes,
    )
        .into_response())
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn read_upload(mut multipart: Multipart) -> Result<PlanUpload, AppError> {
    let mut upload = PlanUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "book" | "justification" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| name.clone());
                let bytes: Bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Could not read '{name}': {e}")))?;
                let doc = Some(SourceDocument::new(file_name, bytes));
                if name == "book" {
                    upload.book = doc;
                } else {
                    upload.justification = doc;
                }
            }
            "units" | "level" | "subject" | "group" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Could not read '{name}': {e}")))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                match name.as_str() {
                    "units" => upload.units = value,
                    "level" => upload.context.level = value,
                    "subject" => upload.context.subject = value,
                    _ => upload.context.group = value,
                }
            }
            _ => {}
        }
    }

    Ok(upload)
}

/// `attachment` disposition with an ASCII fallback name and the UTF-8 name
/// percent-encoded (RFC 6266).
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String = file_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("Plan_SA4_Subject.xlsx"),
            "attachment; filename=\"Plan_SA4_Subject.xlsx\"; filename*=UTF-8''Plan_SA4_Subject.xlsx"
        );
    }

    #[test]
    fn test_content_disposition_utf8() {
        let value = content_disposition("Plan_SA4_Educación Física.xlsx");
        assert!(value.contains("filename=\"Plan_SA4_Educaci_n F_sica.xlsx\""));
        assert!(value.contains("filename*=UTF-8''Plan_SA4_Educaci%C3%B3n%20F%C3%ADsica.xlsx"));
    }
}
