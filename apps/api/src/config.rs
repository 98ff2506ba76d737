use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_AI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Application configuration loaded from environment variables.
/// Startup fails if the AI credential is missing or a numeric variable is malformed.
#[derive(Clone)]
pub struct Config {
    pub google_api_key: String,
    pub ai_base_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Optional append-only log file, written alongside stdout.
    pub log_file: Option<String>,
    pub max_document_bytes: usize,
    pub max_resumes: usize,
    pub scoring_concurrency: usize,
    pub ai_max_attempts: u32,
    pub ai_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let google_api_key = lookup("GOOGLE_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .context("Required environment variable 'GOOGLE_API_KEY' is not set")?;

        Ok(Config {
            google_api_key,
            ai_base_url: lookup("AI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_AI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            port: parse_or(&lookup, "PORT", 8000)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_file: lookup("LOG_FILE").filter(|v| !v.trim().is_empty()),
            max_document_bytes: parse_or(&lookup, "MAX_DOCUMENT_BYTES", 5 * 1024 * 1024)?,
            max_resumes: parse_or(&lookup, "MAX_RESUMES", 50)?,
            scoring_concurrency: parse_or::<usize, _>(&lookup, "SCORING_CONCURRENCY", 4)?.max(1),
            ai_max_attempts: parse_or::<u32, _>(&lookup, "AI_MAX_ATTEMPTS", 3)?.max(1),
            ai_timeout: Duration::from_secs(parse_or(&lookup, "AI_TIMEOUT_SECS", 60)?),
        })
    }

    /// Upper bound on a whole multipart request: one job description plus the resume cap.
    pub fn max_request_bytes(&self) -> usize {
        self.max_document_bytes
            .saturating_mul(self.max_resumes.saturating_add(1))
    }
}

// Hand-written so the credential never reaches a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("google_api_key", &"<redacted>")
            .field("ai_base_url", &self.ai_base_url)
            .field("port", &self.port)
            .field("rust_log", &self.rust_log)
            .field("log_file", &self.log_file)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("max_resumes", &self.max_resumes)
            .field("scoring_concurrency", &self.scoring_concurrency)
            .field("ai_max_attempts", &self.ai_max_attempts)
            .field("ai_timeout", &self.ai_timeout)
            .finish()
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
