use anyhow::{Context, Result};

/// Hard ceiling on uploaded resume size unless overridden by env.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Below this many extracted characters a PDF is treated as scanned and
/// routed through OCR.
pub const DEFAULT_MIN_PARSABLE_CHARS: usize = 120;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Secret used to mint and verify channel bearer tokens.
    pub channel_secret: String,
    /// OCR sidecar endpoint. When unset, scanned PDFs fail the parsability
    /// check instead of being re-processed.
    pub ocr_endpoint: Option<String>,
    /// Anthropic key, required only when ENABLE_LLM_GRADING is set.
    pub anthropic_api_key: Option<String>,
    /// Swaps the deterministic heuristic grader for the LLM-backed one.
    pub enable_llm_grading: bool,
    pub max_file_size_bytes: usize,
    pub min_parsable_chars: usize,
    /// Per-stage timeout applied to extraction, OCR and grading.
    pub stage_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            channel_secret: require_env("CHANNEL_SECRET")?,
            ocr_endpoint: optional_env("OCR_ENDPOINT"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            enable_llm_grading: optional_env("ENABLE_LLM_GRADING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_file_size_bytes: parse_env("MAX_FILE_SIZE_BYTES", DEFAULT_MAX_FILE_SIZE_BYTES)?,
            min_parsable_chars: parse_env("MIN_PARSABLE_CHARS", DEFAULT_MIN_PARSABLE_CHARS)?,
            stage_timeout_secs: parse_env("STAGE_TIMEOUT_SECS", 120u64)?,
            port: parse_env("PORT", 8080u16)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid number")),
        Err(_) => Ok(default),
    }
}
