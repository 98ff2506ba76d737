/// LLM Client: the single point of contact with the generative-text service.
///
/// ARCHITECTURAL RULE: No other module may make network calls to the AI service.
/// Everything goes through `CompletionProvider`, which `LlmClient` implements.
///
/// Model: gemini-2.0-flash (fixed, not configurable)
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::PipelineError;

pub mod prompts;

/// The model used for all calls. Intentionally hardcoded.
pub const MODEL: &str = "gemini-2.0-flash";
const MAX_OUTPUT_TOKENS: u32 = 2048;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transient failures (timeouts, 429, 5xx) persisted through every attempt.
    #[error("AI service unavailable after {attempts} attempt(s): {last}")]
    Unavailable { attempts: u32, last: String },

    /// Non-transient HTTP failure (bad request, auth). Never retried.
    #[error("AI service rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode AI service response: {0}")]
    Decode(String),

    #[error("AI service returned empty content")]
    EmptyContent,
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Unavailable { attempts, .. } => {
                PipelineError::AiServiceUnavailable { attempts }
            }
            LlmError::Rejected { status, .. } => {
                PipelineError::AiServiceRejected(format!("status {status}"))
            }
            LlmError::Decode(_) => {
                PipelineError::AiServiceRejected("unexpected response shape".to_string())
            }
            LlmError::EmptyContent => {
                PipelineError::MalformedResponse("reply contained no text".to_string())
            }
        }
    }
}

/// One prompt in, one text reply out. Carried by the pipeline as `Arc<dyn CompletionProvider>`
/// so tests can script replies without a network.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (0-based). Attempt 0 never waits: base, 2×base, 4×base…
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
    }
}

/// Outcome of a single attempt, as seen by the retry loop.
#[derive(Debug)]
enum AttemptError {
    Transient(String),
    Fatal(LlmError),
}

/// Runs `op` until it succeeds, fails fatally, or the policy's attempts are spent.
async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = policy.delay_before(attempt);
            warn!(
                "AI call attempt {} failed ({}), retrying after {}ms...",
                attempt,
                last,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Transient(reason)) => last = reason,
        }
    }

    Err(LlmError::Unavailable {
        attempts: max_attempts,
        last,
    })
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types (generateContent)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// The production completion provider.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, MODEL)
    }

    async fn attempt(&self, body: &GenerateRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_builder() => {
                return Err(AttemptError::Fatal(LlmError::Rejected {
                    status: 0,
                    message: e.to_string(),
                }))
            }
            Err(e) => return Err(AttemptError::Transient(format!("transport: {e}"))),
        };

        let status = response.status();

        if is_transient_status(status) {
            let body = response.text().await.unwrap_or_default();
            debug!("AI service returned {}: {}", status, body);
            return Err(AttemptError::Transient(format!("status {}", status.as_u16())));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AttemptError::Fatal(LlmError::Rejected {
                status: status.as_u16(),
                message,
            }));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(LlmError::Decode(e.to_string())))?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                "AI call succeeded: prompt_tokens={}, output_tokens={}",
                usage.prompt_token_count, usage.candidates_token_count
            );
        }

        parsed
            .text()
            .ok_or(AttemptError::Fatal(LlmError::EmptyContent))
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    /// Retries on transport errors, 408, 429 and 5xx with exponential backoff.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        with_retry(self.retry, |_| self.attempt(&body)).await
    }
}

/// Strips ```lang ... ``` or ``` ... ``` code fences from model output.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) if !rest[..newline].trim().contains(' ') => &rest[newline + 1..],
        _ => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn client_for(server: &MockServer, max_attempts: u32) -> LlmClient {
        LlmClient::new(
            "test-key".to_string(),
            server.uri(),
            Duration::from_secs(5),
            fast_retry(max_attempts),
        )
        .unwrap()
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}
        })
    }

    fn endpoint_path() -> String {
        format!("/models/{MODEL}:generateContent")
    }

    #[test]
    fn test_strip_code_fences_with_tag() {
        assert_eq!(strip_code_fences("```text\nSCORE | 5\n```"), "SCORE | 5");
    }

    #[test]
    fn test_strip_code_fences_without_tag() {
        assert_eq!(strip_code_fences("```\nREQUIRED | Rust\n```"), "REQUIRED | Rust");
    }

    #[test]
    fn test_strip_code_fences_no_fences() {
        assert_eq!(strip_code_fences("  SCORE | 5 \n"), "SCORE | 5");
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before(3), Duration::from_millis(400));
    }

    #[test]
    fn test_transient_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_llm_error_maps_to_pipeline_kinds() {
        let unavailable: PipelineError = LlmError::Unavailable {
            attempts: 3,
            last: "status 503".into(),
        }
        .into();
        assert_eq!(unavailable, PipelineError::AiServiceUnavailable { attempts: 3 });

        let rejected: PipelineError = LlmError::Rejected {
            status: 401,
            message: "API key not valid".into(),
        }
        .into();
        assert_eq!(rejected.kind(), "AI_SERVICE_REJECTED");
        assert!(!rejected.to_string().contains("API key not valid"));

        let empty: PipelineError = LlmError::EmptyContent.into();
        assert_eq!(empty.kind(), "MALFORMED_RESPONSE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_waits_with_backoff_then_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        };
        let started = tokio::time::Instant::now();

        let result: Result<(), LlmError> = with_retry(policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Transient("status 503".to_string())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(LlmError::Unavailable { attempts: 3, .. })
        ));
        // 1s + 2s of backoff on the paused clock.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retry(fast_retry(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptError::Fatal(LlmError::Rejected {
                    status: 400,
                    message: "bad".into(),
                }))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(LlmError::Rejected { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let result = with_retry(fast_retry(3), |attempt| async move {
            if attempt < 2 {
                Err(AttemptError::Transient("status 429".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_complete_returns_text_and_sends_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("SCORE | 80")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, 3).complete("prompt", "system").await.unwrap();
        assert_eq!(text, "SCORE | 80");
    }

    #[tokio::test]
    async fn test_complete_retries_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("ok")))
            .mount(&server)
            .await;

        let text = client_for(&server, 3).complete("p", "s").await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_complete_exhausts_attempts_on_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, 3).complete("p", "s").await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_complete_does_not_retry_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 3).complete("p", "s").await.unwrap_err();
        match err {
            LlmError::Rejected { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_empty_candidates_is_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint_path()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 3).complete("p", "s").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyContent));
    }
}
