//! Axum route handlers for the Ranking API.

use std::pin::pin;

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::documents::Document;
use crate::errors::AppError;
use crate::ranking::models::{CriteriaSet, CriterionInput, RankingResult};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ExtractCriteriaResponse {
    pub criteria: CriteriaSet,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/extract-criteria
///
/// Multipart field `file`: one PDF or DOCX job description.
pub async fn handle_extract_criteria(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractCriteriaResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let max_bytes = state.config.max_document_bytes;

    async move {
        let mut document = None;
        while let Some(field) = next_field(&mut multipart).await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" | "job_description" if document.is_none() => {
                    document = Some(read_document(field, max_bytes).await?);
                }
                other => debug!("Ignoring multipart field '{other}'"),
            }
        }

        let document = document
            .ok_or_else(|| AppError::Validation("multipart field 'file' is required".to_string()))?;
        info!(file = %document.name, bytes = document.len(), "Extract criteria requested");

        let criteria = state.pipeline.extract_criteria(&document).await?;
        Ok::<_, AppError>(Json(ExtractCriteriaResponse { criteria }))
    }
    .instrument(info_span!("extract_criteria", %request_id))
    .await
}

/// POST /api/rank-resumes
///
/// Multipart fields: `job_description` (file) or `criteria` (JSON list), plus
/// one or more `resumes` files. Responds 200 with per-resume failures listed
/// separately once criteria are available.
pub async fn handle_rank_resumes(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RankingResult>, AppError> {
    let request_id = Uuid::new_v4();
    let max_bytes = state.config.max_document_bytes;
    let max_resumes = state.config.max_resumes;

    async move {
        let mut job_description = None;
        let mut criteria_field = None;
        let mut resumes = Vec::new();

        while let Some(field) = next_field(&mut multipart).await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "job_description" => {
                    job_description = Some(read_document(field, max_bytes).await?);
                }
                "criteria" | "requirements" => {
                    let raw = field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(format!("unreadable criteria: {e}")))?;
                    criteria_field = Some(raw);
                }
                "resumes" => {
                    if resumes.len() >= max_resumes {
                        return Err(AppError::Validation(format!(
                            "Maximum of {max_resumes} resumes allowed per request"
                        )));
                    }
                    resumes.push(read_document(field, max_bytes).await?);
                }
                other => debug!("Ignoring multipart field '{other}'"),
            }
        }

        if resumes.is_empty() {
            return Err(AppError::Validation(
                "at least one 'resumes' file is required".to_string(),
            ));
        }

        info!(resumes = resumes.len(), "Rank resumes requested");

        let result = match (job_description, criteria_field) {
            (Some(jd), None) => state.pipeline.rank_resumes(&jd, resumes).await?,
            (None, Some(raw)) => {
                let criteria = parse_criteria_field(&raw)?;
                state.pipeline.rank_against_criteria(&criteria, resumes).await
            }
            (Some(_), Some(_)) => {
                return Err(AppError::Validation(
                    "send either 'job_description' or 'criteria', not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "multipart field 'job_description' or 'criteria' is required".to_string(),
                ))
            }
        };

        Ok::<_, AppError>(Json(result))
    }
    .instrument(info_span!("rank_resumes", %request_id))
    .await
}

// ────────────────────────────────────────────────────────────────────────────
// Multipart helpers
// ────────────────────────────────────────────────────────────────────────────

async fn next_field<'a>(multipart: &'a mut Multipart) -> Result<Option<Field<'a>>, AppError> {
    multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("request body exceeds the upload limit".to_string())
        } else {
            AppError::Validation(format!("invalid multipart body: {}", e.body_text()))
        }
    })
}

async fn read_document(field: Field<'_>, max_bytes: usize) -> Result<Document, AppError> {
    let name = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);
    let bytes = read_capped(field, max_bytes, &name, |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("request body exceeds the upload limit".to_string())
        } else {
            AppError::Validation(format!("unreadable upload '{name}': {}", e.body_text()))
        }
    })
    .await?;

    Ok(Document::new(name, content_type, bytes))
}

/// Buffers an upload chunk by chunk, giving up as soon as it grows past `max_bytes`.
async fn read_capped<S, E>(
    chunks: S,
    max_bytes: usize,
    name: &str,
    on_error: impl Fn(E) -> AppError,
) -> Result<Bytes, AppError>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut chunks = pin!(chunks);
    let mut buffer = BytesMut::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(&on_error)?;
        if buffer.len() + chunk.len() > max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "'{name}' exceeds the {max_bytes} byte file size limit"
            )));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Accepts a JSON array of `{label, importance}` objects or plain strings.
fn parse_criteria_field(raw: &str) -> Result<CriteriaSet, AppError> {
    let inputs: Vec<CriterionInput> = serde_json::from_str(raw).map_err(|e| {
        AppError::Validation(format!("'criteria' must be a JSON list of criteria: {e}"))
    })?;
    let criteria = inputs
        .into_iter()
        .filter_map(CriterionInput::into_criterion)
        .collect();
    CriteriaSet::new(criteria)
        .map_err(|_| AppError::Validation("'criteria' must not be empty".to_string()))
}
