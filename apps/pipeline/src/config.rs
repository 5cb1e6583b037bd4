use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_api_url: Option<String>,
    pub parse_model: String,
    pub score_model: String,
    pub store_token: String,
    pub store_base_id: String,
    pub store_api_url: Option<String>,
    pub jobs_table: String,
    pub candidate_table: String,
    pub prompt_dir: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            llm_api_key: require_env("LLM_API_KEY")?,
            llm_api_url: std::env::var("LLM_API_URL").ok(),
            parse_model: env_or("PARSE_MODEL", "gpt-4o-mini"),
            score_model: env_or("SCORE_MODEL", "gpt-4o-mini"),
            store_token: require_env("RECORD_STORE_TOKEN")?,
            store_base_id: require_env("RECORD_STORE_BASE_ID")?,
            store_api_url: std::env::var("RECORD_STORE_API_URL").ok(),
            jobs_table: env_or("JOBS_TABLE", "Jobs"),
            candidate_table: env_or("CANDIDATE_TABLE", "CandidateProfile"),
            prompt_dir: env_or("PROMPT_DIR", "prompts"),
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
