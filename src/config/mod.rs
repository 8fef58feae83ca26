//! Application configuration.
//!
//! Everything loads from the environment (with `.env` support) through one
//! helper that tolerates inline comments and stray whitespace. There is no
//! global config instance; construct one and pass it where it is needed.

use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::llm::{DEFAULT_TIMEOUT_SECS, ProviderKind, ProviderSettings};

#[derive(Debug, Clone)]
pub struct PrismConfig {
    // ── Provider Configuration
    pub default_provider: String,
    pub api_key: String,
    /// Empty means "use the provider's default model".
    pub model: String,
    /// Empty means "use the provider's public endpoint".
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    pub prompt_token_budget: usize,

    // ── Database Configuration
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Cache TTLs (days; zero or negative disables expiry)
    pub analysis_ttl_days: i64,
    pub error_ttl_days: i64,
    pub pattern_ttl_days: i64,

    // ── Batch Configuration
    pub max_batch_size: usize,
    pub batch_concurrency: usize,
}

/// Parse an env var, tolerating values like `10 # comment`. Missing vars
/// fall back silently; unparseable ones fall back with a warning.
fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            match clean.parse::<T>() {
                Ok(parsed) => {
                    debug!("config: {} = {} (from environment)", key, clean);
                    parsed
                }
                Err(_) => {
                    warn!("config: {} = '{}' failed to parse, using default", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl PrismConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            debug!("no .env file found, using process environment and defaults");
        }

        Self {
            default_provider: env_var_or("PRISM_PROVIDER", "openai".to_string()),
            api_key: env_var_or("PRISM_API_KEY", String::new()),
            model: env_var_or("PRISM_MODEL", String::new()),
            base_url: env_var_or("PRISM_BASE_URL", String::new()),
            temperature: env_var_or("PRISM_TEMPERATURE", 0.3),
            max_output_tokens: env_var_or("PRISM_MAX_OUTPUT_TOKENS", 4096),
            request_timeout_secs: env_var_or("PRISM_REQUEST_TIMEOUT", DEFAULT_TIMEOUT_SECS),
            prompt_token_budget: env_var_or("PRISM_PROMPT_TOKEN_BUDGET", 12000),
            database_url: env_var_or(
                "PRISM_DATABASE_URL",
                "sqlite:./prism.db?mode=rwc".to_string(),
            ),
            sqlite_max_connections: env_var_or("PRISM_SQLITE_MAX_CONNECTIONS", 5),
            analysis_ttl_days: env_var_or("PRISM_ANALYSIS_TTL_DAYS", 30),
            error_ttl_days: env_var_or("PRISM_ERROR_TTL_DAYS", 1),
            pattern_ttl_days: env_var_or("PRISM_PATTERN_TTL_DAYS", 7),
            max_batch_size: env_var_or("PRISM_MAX_BATCH_SIZE", 10),
            batch_concurrency: env_var_or("PRISM_BATCH_CONCURRENCY", 3),
        }
    }

    // --- Convenience Methods ---

    /// Default provider settings for analysis calls. The dashboard can
    /// override any of these per request.
    pub fn provider_settings(&self) -> ProviderSettings {
        let provider = self
            .default_provider
            .parse::<ProviderKind>()
            .unwrap_or_else(|_| {
                warn!(
                    "unknown provider '{}', falling back to openai",
                    self.default_provider
                );
                ProviderKind::OpenAi
            });

        let model = if self.model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            self.model.trim().to_string()
        };
        let base_url = if self.base_url.trim().is_empty() {
            None
        } else {
            Some(self.base_url.trim().to_string())
        };

        ProviderSettings {
            provider,
            api_key: self.api_key.clone(),
            model,
            base_url,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
