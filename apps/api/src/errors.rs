use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of one pipeline step: text extraction, the AI call, or reply parsing.
///
/// Messages are safe to show callers. Raw AI payloads never go in here; the
/// adapter logs them and keeps only a status or short reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Unsupported file type: {0}. Upload PDF or DOCX.")]
    UnsupportedFormat(String),

    #[error("Unreadable document: {0}")]
    CorruptDocument(String),

    #[error("AI service unavailable after {attempts} attempt(s)")]
    AiServiceUnavailable { attempts: u32 },

    #[error("AI service rejected the request: {0}")]
    AiServiceRejected(String),

    #[error("AI service returned an unusable reply: {0}")]
    MalformedResponse(String),

    /// The document was readable but is not what the operation expects
    /// (not a job description, not a resume, or no text at all).
    #[error("Invalid content: {0}")]
    InvalidContent(String),
}

impl PipelineError {
    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            PipelineError::CorruptDocument(_) => "CORRUPT_DOCUMENT",
            PipelineError::AiServiceUnavailable { .. } => "AI_SERVICE_UNAVAILABLE",
            PipelineError::AiServiceRejected(_) => "AI_SERVICE_REJECTED",
            PipelineError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            PipelineError::InvalidContent(_) => "INVALID_CONTENT",
        }
    }

    /// Only service unavailability is worth another attempt; everything else needs new input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::AiServiceUnavailable { .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            PipelineError::UnsupportedFormat(_) | PipelineError::CorruptDocument(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::InvalidContent(_) => StatusCode::BAD_REQUEST,
            PipelineError::MalformedResponse(_) | PipelineError::AiServiceRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::AiServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Seconds a client is asked to wait before repeating a request that failed retryably.
pub const RETRY_AFTER_SECS: u64 = 30;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => {
                tracing::warn!("Rejected request: {msg}");
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::PayloadTooLarge(msg) => {
                tracing::warn!("Rejected request: {msg}");
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::Pipeline(e) => {
                let status = e.status();
                if status.is_server_error() {
                    tracing::error!(kind = e.kind(), "Request failed: {e}");
                } else {
                    tracing::warn!(kind = e.kind(), "Request failed: {e}");
                }
                (status, e.kind(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        let mut response = (status, body).into_response();
        if matches!(&self, AppError::Pipeline(e) if e.is_retryable()) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}
