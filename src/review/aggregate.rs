//! Frequency aggregation - merges per-PR feedback into ranked common themes.
//!
//! Pure and synchronous: no I/O, no mutation of inputs. Cheap enough to
//! re-run on every state change for the expected scale (tens of PRs with
//! dozens of feedback items each).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{AnalysisResult, CodeContext, Feedback, FeedbackItem};

/// One contributing occurrence of a theme, traceable back to its PR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackInstance {
    pub pr_id: i64,
    pub pr_url: String,
    pub pr_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_context: Option<CodeContext>,
}

/// A group of equivalent feedback items across PRs.
///
/// Invariant: `count == instances.len()`. Each PR contributes at most one
/// instance per theme; the first occurrence within a PR wins and keeps its
/// code context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedTheme {
    /// Display text from the first occurrence, trimmed.
    pub text: String,
    pub count: usize,
    pub instances: Vec<FeedbackInstance>,
}

/// Ranked themes per category plus the score rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSummary {
    pub strengths: Vec<AggregatedTheme>,
    pub refinement_needs: Vec<AggregatedTheme>,
    pub learning_pathways: Vec<AggregatedTheme>,
    /// Arithmetic mean of `overall_quality` over non-error results,
    /// 0.0 when there are none.
    pub average_score: f32,
    /// Number of results that contributed.
    pub analyzed_count: usize,
}

/// Merge analysis results into a ranked summary.
///
/// Errored results are excluded entirely. Texts are grouped after
/// normalization (trim + lowercase); groups are sorted by descending count
/// with ties keeping first-seen order.
pub fn aggregate(results: &[AnalysisResult]) -> FeedbackSummary {
    let valid: Vec<&AnalysisResult> = results.iter().filter(|r| !r.is_error()).collect();

    let average_score = if valid.is_empty() {
        0.0
    } else {
        valid.iter().map(|r| r.overall_quality).sum::<f32>() / valid.len() as f32
    };

    FeedbackSummary {
        strengths: aggregate_category(&valid, |f| &f.strengths),
        refinement_needs: aggregate_category(&valid, |f| &f.refinement_needs),
        learning_pathways: aggregate_category(&valid, |f| &f.learning_pathways),
        average_score,
        analyzed_count: valid.len(),
    }
}

fn aggregate_category<F>(results: &[&AnalysisResult], select: F) -> Vec<AggregatedTheme>
where
    F: Fn(&Feedback) -> &[FeedbackItem],
{
    // Insertion order is tracked separately so ties rank deterministically.
    let mut order: Vec<String> = Vec::new();
    let mut themes: HashMap<String, AggregatedTheme> = HashMap::new();
    let mut seen: HashSet<(String, i64)> = HashSet::new();

    for result in results {
        for item in select(&result.feedback) {
            let normalized = item.text.trim().to_lowercase();
            if normalized.is_empty() {
                debug!("skipping blank feedback item from PR #{}", result.pr_number);
                continue;
            }
            // One instance per PR per theme
            if !seen.insert((normalized.clone(), result.pr_id)) {
                continue;
            }

            let theme = themes.entry(normalized.clone()).or_insert_with(|| {
                order.push(normalized.clone());
                AggregatedTheme {
                    text: item.text.trim().to_string(),
                    count: 0,
                    instances: Vec::new(),
                }
            });
            theme.count += 1;
            theme.instances.push(FeedbackInstance {
                pr_id: result.pr_id,
                pr_url: result.pr_url.clone(),
                pr_title: result.pr_title.clone(),
                code_context: item.code_context.clone(),
            });
        }
    }

    let mut ranked: Vec<AggregatedTheme> = order
        .into_iter()
        .filter_map(|key| themes.remove(&key))
        .collect();
    // Stable sort: equal counts keep first-seen order
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked
}
