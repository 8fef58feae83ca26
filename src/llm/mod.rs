//! LLM provider adapters for review analysis.
//!
//! One module per vendor; shared types, the error taxonomy, and the two
//! trait seams live here. `LlmProvider` is the per-vendor HTTP boundary;
//! `ReviewBackend` is what the orchestrator talks to.

mod anthropic;
mod gemini;
mod openai;

pub mod client;
pub mod parse;
pub mod prompt;

pub use anthropic::AnthropicProvider;
pub use client::ReviewClient;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::github::PullRequest;
use crate::review::{AnalysisResult, PatternAnalysisResult};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// Core Types
// ============================================================================

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Model used when the caller leaves the model field empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::Gemini => "gemini-2.5-flash",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open-ai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(ReviewError::Configuration(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Per-call provider selection. Assembled from config defaults, overridable
/// by the caller (the dashboard's provider/model/key picker).
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Overrides the vendor host, e.g. for a local proxy or test server.
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ProviderSettings {
    /// Fail fast before any network call. An empty key or model is a caller
    /// mistake that must surface, never degrade.
    pub fn validate(&self) -> Result<(), ReviewError> {
        if self.api_key.trim().is_empty() {
            return Err(ReviewError::Configuration("API key is not set".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ReviewError::Configuration("model is not set".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error taxonomy for the analysis boundary.
///
/// Only user-actionable conditions propagate as `Err`; transport and parse
/// failures on single-PR analysis are converted to degraded results at the
/// client layer.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to parse model response: {message}")]
    Parse { message: String, raw: String },

    #[error("No analyzed pull requests available for pattern analysis")]
    NoEligiblePrs,

    #[error("Analysis already in progress for PR {0}")]
    AlreadyAnalyzing(i64),
}

// ============================================================================
// Trait seams
// ============================================================================

/// One vendor's HTTP surface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Single-shot completion: system instructions plus one user prompt in,
    /// raw response text out.
    async fn generate(&self, system: &str, user: &str) -> Result<String, ReviewError>;

    /// Models selectable for this provider. Static for most vendors;
    /// OpenAI queries its models endpoint.
    async fn list_models(&self) -> Result<Vec<String>, ReviewError>;
}

/// The orchestrator-facing analysis seam. Implemented by [`ReviewClient`]
/// against real vendors and by mocks in tests.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// Analyze one PR. Transport/API/parse failures come back as `Ok` with
    /// a degraded result (`error` set); configuration problems are `Err`.
    async fn analyze_pull_request(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
    ) -> Result<AnalysisResult, ReviewError>;

    /// Synthesize cross-PR patterns from prior analysis results. Unlike
    /// single-PR analysis there is no degraded shape to return, so any
    /// failure is `Err`.
    async fn analyze_patterns(
        &self,
        results: &[AnalysisResult],
        settings: &ProviderSettings,
    ) -> Result<PatternAnalysisResult, ReviewError>;
}
