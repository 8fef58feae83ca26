// src/review/types.rs
// Canonical feedback schema shared by the cache, aggregator, and providers

use serde::{Deserialize, Serialize};

use crate::github::PullRequest;

/// Where a piece of feedback points in the diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeContext {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// At most 10 lines; clamped at the parse boundary.
    pub code_snippet: String,
}

/// A single piece of categorized feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_context: Option<CodeContext>,
}

impl FeedbackItem {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code_context: None,
        }
    }
}

/// The three feedback categories every analysis produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    #[serde(default)]
    pub strengths: Vec<FeedbackItem>,
    #[serde(default)]
    pub refinement_needs: Vec<FeedbackItem>,
    #[serde(default)]
    pub learning_pathways: Vec<FeedbackItem>,
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.strengths.is_empty()
            && self.refinement_needs.is_empty()
            && self.learning_pathways.is_empty()
    }
}

/// Feedback for one pull request. Immutable once created; re-analysis
/// replaces the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub pr_id: i64,
    pub pr_number: i64,
    pub pr_title: String,
    pub pr_url: String,
    pub feedback: Feedback,
    /// 0-10 continuous; model output is clamped into this range.
    pub overall_quality: f32,
    pub career_impact_summary: String,
    /// Set when the analysis attempt failed. Errored results are still
    /// cached (short TTL) to damp refetch storms, but never aggregated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    /// A degraded result standing in for a failed attempt.
    pub fn failed(pr: &PullRequest, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            pr_id: pr.id,
            pr_number: pr.number,
            pr_title: pr.title.clone(),
            pr_url: pr.url.clone(),
            feedback: Feedback::default(),
            overall_quality: 0.0,
            career_impact_summary: format!("Analysis could not be completed: {}", reason),
            error: Some(reason),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// Pattern analysis (cross-PR synthesis)
// ============================================================================

/// Which feedback category a recurring pattern was observed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Strength,
    Refinement,
    Learning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringPattern {
    pub category: PatternCategory,
    pub name: String,
    pub description: String,
    /// How many analyzed PRs exhibited the pattern.
    pub frequency: u32,
    pub impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FocusArea {
    pub area: String,
    pub rationale: String,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DevelopmentTrajectory {
    #[serde(default)]
    pub current_level: String,
    #[serde(default)]
    pub next_milestone: String,
    #[serde(default)]
    pub key_actions: Vec<String>,
}

/// Free-text guidance aimed at the developer's manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManagerialInsights {
    #[serde(default)]
    pub delegation_readiness: String,
    #[serde(default)]
    pub review_attention: String,
    #[serde(default)]
    pub growth_support: String,
}

/// Cross-PR synthesis for one developer. `analyzed_pr_ids` records the
/// exact input set so staleness is an order-insensitive set comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatternAnalysisResult {
    #[serde(default)]
    pub recurring_patterns: Vec<RecurringPattern>,
    #[serde(default)]
    pub recommended_focus_areas: Vec<FocusArea>,
    #[serde(default)]
    pub development_trajectory: DevelopmentTrajectory,
    #[serde(default)]
    pub managerial_insights: ManagerialInsights,
    #[serde(default)]
    pub analyzed_pr_ids: Vec<i64>,
}
