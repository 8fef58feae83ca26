//! Response parsing.
//!
//! Models wrap JSON in prose or markdown fences despite instructions, so
//! extraction runs a fixed sequence of strategies. Legacy field spellings
//! from older prompt revisions are folded into the canonical shape here
//! and never escape this module.

use serde_json::Value;
use tracing::{debug, error};

use crate::github::PullRequest;
use crate::review::{
    AnalysisResult, CodeContext, DevelopmentTrajectory, Feedback, FeedbackItem, FocusArea,
    ManagerialInsights, PatternAnalysisResult, PatternCategory, RecurringPattern,
};

use super::ReviewError;

const MAX_SNIPPET_LINES: usize = 10;
const RAW_SAMPLE_CHARS: usize = 200;

// ============================================================================
// Extraction strategies
// ============================================================================

/// Strategy 1: the whole response is already a JSON object.
fn whole_response(response: &str) -> Option<Value> {
    serde_json::from_str(response.trim())
        .ok()
        .filter(|v: &Value| v.is_object())
}

/// Strategy 2: a markdown fence tagged `json`. Counts the opening backticks
/// so ````-fenced blocks close on ```` rather than on the first ```.
fn fenced_block(response: &str) -> Option<Value> {
    let opening = response.find("```")?;
    let backticks = response[opening..].chars().take_while(|&c| c == '`').count();

    let after_fence = &response[opening + backticks..];
    let tag_end = after_fence.find("json")?;
    if !after_fence[..tag_end].trim().is_empty() {
        return None;
    }

    let body_start = opening + backticks + tag_end + "json".len();
    let closing = "`".repeat(backticks);
    let body_len = response[body_start..].find(&closing)?;

    serde_json::from_str(response[body_start..body_start + body_len].trim())
        .ok()
        .filter(|v: &Value| v.is_object())
}

/// Strategy 3: everything between the first `{` and the last `}`.
fn bare_object(response: &str) -> Option<Value> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&response[start..=end])
        .ok()
        .filter(|v: &Value| v.is_object())
}

/// Run the extraction strategies in order.
pub fn extract_json(response: &str) -> Result<Value, ReviewError> {
    if let Some(value) = whole_response(response) {
        return Ok(value);
    }
    if let Some(value) = fenced_block(response) {
        return Ok(value);
    }
    if let Some(value) = bare_object(response) {
        return Ok(value);
    }

    error!(
        "no JSON object in model response, starts with: {}",
        raw_sample(response)
    );
    Err(ReviewError::Parse {
        message: "no JSON object found in model response".into(),
        raw: raw_sample(response),
    })
}

fn raw_sample(response: &str) -> String {
    response.chars().take(RAW_SAMPLE_CHARS).collect()
}

// ============================================================================
// Review analysis
// ============================================================================

/// Normalize a raw review response into an [`AnalysisResult`] for `pr`.
pub fn parse_analysis(response: &str, pr: &PullRequest) -> Result<AnalysisResult, ReviewError> {
    let value = extract_json(response)?;

    // Some models nest the categories under "feedback", some emit them at
    // the top level.
    let categories = value
        .get("feedback")
        .filter(|v| v.is_object())
        .unwrap_or(&value);

    let feedback = Feedback {
        strengths: collect_items(categories.get("strengths")),
        refinement_needs: collect_items(
            categories
                .get("refinement_needs")
                .or_else(|| categories.get("areas_for_improvement")),
        ),
        learning_pathways: collect_items(
            categories
                .get("learning_pathways")
                .or_else(|| categories.get("growth_opportunities")),
        ),
    };

    let overall_quality = value
        .get("overall_quality")
        .or_else(|| value.get("quality_score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 10.0) as f32;

    let career_impact_summary = value
        .get("career_impact_summary")
        .or_else(|| value.get("summary"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(AnalysisResult {
        pr_id: pr.id,
        pr_number: pr.number,
        pr_title: pr.title.clone(),
        pr_url: pr.url.clone(),
        feedback,
        overall_quality,
        career_impact_summary,
        error: None,
    })
}

/// Items arrive as plain strings or as objects with optional code context.
fn collect_items(value: Option<&Value>) -> Vec<FeedbackItem> {
    let Some(Value::Array(raw)) = value else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for entry in raw {
        match entry {
            Value::String(text) => {
                if text.trim().is_empty() {
                    debug!("skipping blank feedback item");
                    continue;
                }
                items.push(FeedbackItem::plain(text.trim()));
            }
            Value::Object(_) => {
                let text = entry.get("text").and_then(Value::as_str).unwrap_or_default();
                if text.trim().is_empty() {
                    debug!("skipping feedback item without text");
                    continue;
                }
                items.push(FeedbackItem {
                    text: text.trim().to_string(),
                    code_context: parse_context(entry.get("code_context")),
                });
            }
            other => {
                debug!("skipping non-text feedback item: {}", other);
            }
        }
    }
    items
}

fn parse_context(value: Option<&Value>) -> Option<CodeContext> {
    let value = value?;
    let file_path = value.get("file_path").and_then(Value::as_str)?.to_string();
    let start_line = value.get("start_line").and_then(Value::as_u64).unwrap_or(0) as u32;
    let end_line = value
        .get("end_line")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(start_line);
    let code_snippet = clamp_snippet(
        value
            .get("code_snippet")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );

    Some(CodeContext {
        file_path,
        start_line,
        end_line,
        code_snippet,
    })
}

fn clamp_snippet(snippet: &str) -> String {
    snippet
        .lines()
        .take(MAX_SNIPPET_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Pattern analysis
// ============================================================================

/// Normalize a raw pattern-synthesis response. `analyzed_pr_ids` is left
/// empty; the caller fills it from the results it submitted.
pub fn parse_patterns(response: &str) -> Result<PatternAnalysisResult, ReviewError> {
    let value = extract_json(response)?;

    let recurring_patterns = value
        .get("recurring_patterns")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_pattern).collect())
        .unwrap_or_default();

    let recommended_focus_areas = value
        .get("recommended_focus_areas")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|v| FocusArea {
                    area: str_field(v, "area"),
                    rationale: str_field(v, "rationale"),
                    resources: str_list(v.get("resources")),
                })
                .filter(|f| !f.area.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let development_trajectory = value
        .get("development_trajectory")
        .map(|v| DevelopmentTrajectory {
            current_level: str_field(v, "current_level"),
            next_milestone: str_field(v, "next_milestone"),
            key_actions: str_list(v.get("key_actions")),
        })
        .unwrap_or_default();

    let managerial_insights = value
        .get("managerial_insights")
        .map(|v| ManagerialInsights {
            delegation_readiness: str_field(v, "delegation_readiness"),
            review_attention: str_field(v, "review_attention"),
            growth_support: str_field(v, "growth_support"),
        })
        .unwrap_or_default();

    Ok(PatternAnalysisResult {
        recurring_patterns,
        recommended_focus_areas,
        development_trajectory,
        managerial_insights,
        analyzed_pr_ids: Vec::new(),
    })
}

fn parse_pattern(value: &Value) -> Option<RecurringPattern> {
    let raw_category = value.get("category").and_then(Value::as_str)?.to_lowercase();
    let category = if raw_category.starts_with("strength") {
        PatternCategory::Strength
    } else if raw_category.starts_with("refinement") || raw_category.starts_with("improvement") {
        PatternCategory::Refinement
    } else if raw_category.starts_with("learning") || raw_category.starts_with("growth") {
        PatternCategory::Learning
    } else {
        debug!("skipping pattern with unknown category '{}'", raw_category);
        return None;
    };

    Some(RecurringPattern {
        category,
        name: str_field(value, "name"),
        description: str_field(value, "description"),
        frequency: value.get("frequency").and_then(Value::as_u64).unwrap_or(1) as u32,
        impact: str_field(value, "impact"),
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn str_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pr() -> PullRequest {
        PullRequest {
            id: 42,
            number: 7,
            title: "Add retry logic".into(),
            url: "https://example.com/pull/7".into(),
            author: Some("dev".into()),
            files: vec![],
        }
    }

    #[test]
    fn test_extracts_direct_json() {
        let value = extract_json(r#"{"overall_quality": 8}"#).unwrap();
        assert_eq!(value["overall_quality"], 8);
    }

    #[test]
    fn test_extracts_fenced_json() {
        let response = "Here is the review:\n```json\n{\"overall_quality\": 7}\n```\nDone.";
        let value = extract_json(response).unwrap();
        assert_eq!(value["overall_quality"], 7);
    }

    #[test]
    fn test_extracts_four_backtick_fence() {
        let response = "````json\n{\"a\": 1}\n````";
        let value = extract_json(response).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_extracts_bare_object_from_prose() {
        let response = "Sure! The result is {\"overall_quality\": 6.5} as requested.";
        let value = extract_json(response).unwrap();
        assert_eq!(value["overall_quality"], 6.5);
    }

    #[test]
    fn test_unfenced_array_is_rejected() {
        assert!(extract_json("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_no_json_is_parse_error() {
        let err = extract_json("I could not produce a review.").unwrap_err();
        match err {
            ReviewError::Parse { raw, .. } => assert!(raw.contains("could not")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_analysis_nested_feedback() {
        let response = r#"{
            "overall_quality": 8.5,
            "career_impact_summary": "Strong systems thinking.",
            "feedback": {
                "strengths": ["Good test coverage"],
                "refinement_needs": [{"text": "Error handling", "code_context": {"file_path": "src/lib.rs", "start_line": 10, "end_line": 12, "code_snippet": "let x = y?;"}}],
                "learning_pathways": []
            }
        }"#;

        let result = parse_analysis(response, &sample_pr()).unwrap();
        assert_eq!(result.pr_id, 42);
        assert_eq!(result.overall_quality, 8.5);
        assert_eq!(result.feedback.strengths[0].text, "Good test coverage");
        let ctx = result.feedback.refinement_needs[0]
            .code_context
            .as_ref()
            .unwrap();
        assert_eq!(ctx.file_path, "src/lib.rs");
        assert_eq!(ctx.end_line, 12);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_parse_analysis_legacy_field_names() {
        let response = r#"{
            "quality_score": 6,
            "summary": "Solid work.",
            "strengths": ["Clear naming"],
            "areas_for_improvement": ["More tests"],
            "growth_opportunities": ["Study async patterns"]
        }"#;

        let result = parse_analysis(response, &sample_pr()).unwrap();
        assert_eq!(result.overall_quality, 6.0);
        assert_eq!(result.career_impact_summary, "Solid work.");
        assert_eq!(result.feedback.refinement_needs[0].text, "More tests");
        assert_eq!(
            result.feedback.learning_pathways[0].text,
            "Study async patterns"
        );
    }

    #[test]
    fn test_blank_items_are_skipped() {
        let response = r#"{
            "overall_quality": 5,
            "feedback": {"strengths": ["", "  ", "Real one", {"text": "   "}]}
        }"#;

        let result = parse_analysis(response, &sample_pr()).unwrap();
        assert_eq!(result.feedback.strengths.len(), 1);
        assert_eq!(result.feedback.strengths[0].text, "Real one");
    }

    #[test]
    fn test_quality_is_clamped() {
        let high = parse_analysis(r#"{"overall_quality": 15}"#, &sample_pr()).unwrap();
        assert_eq!(high.overall_quality, 10.0);
        let low = parse_analysis(r#"{"overall_quality": -3}"#, &sample_pr()).unwrap();
        assert_eq!(low.overall_quality, 0.0);
    }

    #[test]
    fn test_snippet_clamped_to_ten_lines() {
        let snippet: String = (1..=14).map(|n| format!("line {}\n", n)).collect();
        let response = format!(
            r#"{{"feedback": {{"strengths": [{{"text": "t", "code_context": {{"file_path": "a.rs", "code_snippet": {}}}}}]}}}}"#,
            serde_json::to_string(&snippet).unwrap()
        );

        let result = parse_analysis(&response, &sample_pr()).unwrap();
        let ctx = result.feedback.strengths[0].code_context.as_ref().unwrap();
        assert_eq!(ctx.code_snippet.lines().count(), 10);
    }

    #[test]
    fn test_parse_patterns_full() {
        let response = r#"{
            "recurring_patterns": [
                {"category": "strength", "name": "Testing discipline", "description": "Tests ship with every change", "frequency": 4, "impact": "High"},
                {"category": "mystery", "name": "Ignored", "description": "", "frequency": 1, "impact": ""}
            ],
            "recommended_focus_areas": [{"area": "Observability", "rationale": "Few log lines in recent PRs", "resources": ["Tracing docs"]}],
            "development_trajectory": {"current_level": "Mid", "next_milestone": "Senior", "key_actions": ["Lead a design review"]},
            "managerial_insights": {"delegation_readiness": "Ready for medium projects", "review_attention": "Error paths", "growth_support": "Pair on architecture"}
        }"#;

        let patterns = parse_patterns(response).unwrap();
        assert_eq!(patterns.recurring_patterns.len(), 1);
        assert_eq!(
            patterns.recurring_patterns[0].category,
            PatternCategory::Strength
        );
        assert_eq!(patterns.recurring_patterns[0].frequency, 4);
        assert_eq!(patterns.recommended_focus_areas[0].area, "Observability");
        assert_eq!(patterns.development_trajectory.next_milestone, "Senior");
        assert_eq!(
            patterns.managerial_insights.review_attention,
            "Error paths"
        );
        assert!(patterns.analyzed_pr_ids.is_empty());
    }

    #[test]
    fn test_parse_patterns_category_aliases() {
        let response = r#"{
            "recurring_patterns": [
                {"category": "improvement", "name": "a"},
                {"category": "growth area", "name": "b"},
                {"category": "Strengths", "name": "c"}
            ]
        }"#;

        let patterns = parse_patterns(response).unwrap();
        let categories: Vec<PatternCategory> = patterns
            .recurring_patterns
            .iter()
            .map(|p| p.category)
            .collect();
        assert_eq!(
            categories,
            vec![
                PatternCategory::Refinement,
                PatternCategory::Learning,
                PatternCategory::Strength
            ]
        );
    }
}
