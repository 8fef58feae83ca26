//! Orchestrator configuration and outcome types.

use crate::config::PrismConfig;

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for the analysis lifecycle, split out from the application
/// config so tests can construct them directly.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// TTL for successful analyses, in days. Zero or negative disables expiry.
    pub analysis_ttl_days: i64,
    /// TTL for errored analyses. Short, so failures retry soon but do not
    /// hammer the provider.
    pub error_ttl_days: i64,
    /// TTL for cross-PR pattern syntheses.
    pub pattern_ttl_days: i64,
    /// How many analyses run at once within a batch.
    pub batch_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            analysis_ttl_days: 30,
            error_ttl_days: 1,
            pattern_ttl_days: 7,
            batch_concurrency: 3,
        }
    }
}

impl From<&PrismConfig> for OrchestratorConfig {
    fn from(config: &PrismConfig) -> Self {
        Self {
            analysis_ttl_days: config.analysis_ttl_days,
            error_ttl_days: config.error_ttl_days,
            pattern_ttl_days: config.pattern_ttl_days,
            batch_concurrency: config.batch_concurrency,
        }
    }
}

// ============================================================================
// Batch Outcome
// ============================================================================

/// What a batch run actually did.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// PRs the caller submitted.
    pub requested: usize,
    /// PRs skipped because they were already analyzed, already running,
    /// or over the batch cap.
    pub skipped: usize,
    /// Results for the PRs that ran, in completion order per chunk.
    pub results: Vec<crate::review::AnalysisResult>,
}

impl BatchOutcome {
    pub fn analyzed(&self) -> usize {
        self.results.len()
    }
}
