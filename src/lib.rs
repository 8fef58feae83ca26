//! Cached AI code-review insights engine for pull request dashboards.
//!
//! The pipeline: pull requests go through an LLM provider for structured
//! feedback, results land in a two-tier cache (SQLite + in-memory
//! fallback), an orchestrator enforces analyze-once semantics per
//! developer, and an aggregator merges per-PR feedback into ranked themes.

pub mod cache;
pub mod config;
pub mod github;
pub mod llm;
pub mod orchestrator;
pub mod review;
pub mod state;

pub use cache::{AnalysisCache, CacheBackend, CacheEntry, CacheScope};
pub use config::PrismConfig;
pub use github::{PullRequest, PullRequestFile};
pub use llm::{ProviderKind, ProviderSettings, ReviewBackend, ReviewClient, ReviewError};
pub use orchestrator::{AnalysisOrchestrator, BatchOutcome, OrchestratorConfig};
pub use review::{
    AggregatedTheme, AnalysisResult, Feedback, FeedbackItem, FeedbackSummary,
    PatternAnalysisResult, aggregate,
};
pub use state::{AppState, create_app_state};
