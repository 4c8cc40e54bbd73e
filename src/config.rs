//! Worker configuration from environment variables.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingVar(&'static str),
}

/// All worker configuration. Loaded once at startup; missing required
/// variables are fatal.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub worker_api_key: String,
    pub firecrawl_api_key: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub resend_api_key: String,
    pub resend_from_email: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_or("PORT", "8081")
                .parse()
                .unwrap_or(8081),
            database_url: required("DATABASE_URL")?,
            worker_api_key: required("WORKER_API_KEY")?,
            firecrawl_api_key: required("FIRECRAWL_API_KEY")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            resend_from_email: env_or(
                "RESEND_FROM_EMAIL",
                "Blueprinter <notifications@notify.blueprinter.io>",
            ),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
