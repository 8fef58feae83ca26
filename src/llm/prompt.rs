//! Prompt assembly.
//!
//! Prompts are bounded by a character budget derived from the configured
//! token budget (roughly 4 characters per token). Assembly is deterministic
//! for a given input: smaller files pack first, the first file that does
//! not fit contributes a truncated excerpt, and everything else is named
//! in an omission marker so the model knows the diff is partial.

use crate::github::{PullRequest, PullRequestFile};
use crate::review::AnalysisResult;

const CHARS_PER_TOKEN: usize = 4;
const TRUNCATION_MARKER: &str = "... [diff truncated]";
/// Partial excerpts below this size carry no signal; omit the file instead.
const MIN_EXCERPT_CHARS: usize = 200;

pub const REVIEW_SYSTEM_PROMPT: &str = r#"You are an experienced engineering mentor reviewing a colleague's pull request. Assess the change for code quality, test coverage, design judgment, and what it signals about the author's growth.

Respond with a single JSON object and no surrounding prose:
{
  "overall_quality": <number, 1-10>,
  "career_impact_summary": "<2-3 sentences on what this PR signals about the author's trajectory>",
  "feedback": {
    "strengths": [<items>],
    "refinement_needs": [<items>],
    "learning_pathways": [<items>]
  }
}

Each item is either a plain string or an object:
{"text": "<the feedback>", "code_context": {"file_path": "<path>", "start_line": <n>, "end_line": <n>, "code_snippet": "<at most 10 lines>"}}

Keep each feedback text short and reusable. The dashboard groups identical texts across pull requests, so prefer phrasing like "Good test coverage" over sentences tied to this specific diff."#;

pub const PATTERN_SYSTEM_PROMPT: &str = r#"You are reviewing a developer's accumulated pull request feedback to identify longer-term patterns for them and their manager.

Respond with a single JSON object and no surrounding prose:
{
  "recurring_patterns": [{"category": "strength|refinement|learning", "name": "<short name>", "description": "<what keeps happening>", "frequency": <number of PRs showing it>, "impact": "<why it matters>"}],
  "recommended_focus_areas": [{"area": "<skill>", "rationale": "<why now>", "resources": ["<book, talk, or practice>"]}],
  "development_trajectory": {"current_level": "<one line>", "next_milestone": "<one line>", "key_actions": ["<action>"]},
  "managerial_insights": {"delegation_readiness": "<one line>", "review_attention": "<where reviews should focus>", "growth_support": "<how to support growth>"}
}"#;

/// Rough token count for budget decisions.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Build the (system, user) prompt pair for a single-PR review.
pub fn review_prompt(pr: &PullRequest, token_budget: usize) -> (String, String) {
    let header = format!(
        "Pull request #{}: {}\nFiles changed: {}\nTotal churn: {} lines\n\n## Diff\n\n",
        pr.number,
        pr.title,
        pr.files.len(),
        pr.total_changes(),
    );

    let char_budget = token_budget.saturating_mul(CHARS_PER_TOKEN);
    let diff_budget = char_budget.saturating_sub(REVIEW_SYSTEM_PROMPT.len() + header.len());
    let diff = render_diff(&pr.files, diff_budget);

    (REVIEW_SYSTEM_PROMPT.to_string(), format!("{}{}", header, diff))
}

fn render_diff(files: &[PullRequestFile], char_budget: usize) -> String {
    // Binary files carry no patch; they go straight to the omission list.
    let mut omitted: Vec<&str> = files
        .iter()
        .filter(|f| f.patch.is_none())
        .map(|f| f.filename.as_str())
        .collect();

    let mut with_patch: Vec<&PullRequestFile> =
        files.iter().filter(|f| f.patch.is_some()).collect();
    with_patch.sort_by_key(|f| f.patch.as_deref().map(str::len).unwrap_or(0));

    let mut out = String::new();
    let mut exhausted = false;

    for file in with_patch {
        let Some(patch) = file.patch.as_deref() else {
            continue;
        };
        if exhausted {
            omitted.push(&file.filename);
            continue;
        }

        let header = format!(
            "### {} (+{} -{})\n",
            file.filename, file.additions, file.deletions
        );
        if out.len() + header.len() + patch.len() + 2 <= char_budget {
            out.push_str(&header);
            out.push_str(patch);
            out.push_str("\n\n");
        } else {
            let room = char_budget
                .saturating_sub(out.len() + header.len() + TRUNCATION_MARKER.len() + 2);
            if room >= MIN_EXCERPT_CHARS {
                out.push_str(&header);
                out.push_str(&truncate_chars(patch, room));
                out.push('\n');
                out.push_str(TRUNCATION_MARKER);
                out.push_str("\n\n");
            } else {
                omitted.push(&file.filename);
            }
            exhausted = true;
        }
    }

    if !omitted.is_empty() {
        out.push_str(&format!(
            "[{} file(s) omitted to fit the analysis window: {}]\n",
            omitted.len(),
            omitted.join(", ")
        ));
    }
    out
}

/// Build the (system, user) prompt pair for cross-PR pattern synthesis.
pub fn pattern_prompt(results: &[AnalysisResult], token_budget: usize) -> (String, String) {
    let char_budget = token_budget
        .saturating_mul(CHARS_PER_TOKEN)
        .saturating_sub(PATTERN_SYSTEM_PROMPT.len());

    let mut digest = String::from("Prior pull request analyses:\n\n");
    let mut included = 0usize;
    for result in results {
        let block = render_result_digest(result);
        if digest.len() + block.len() > char_budget {
            break;
        }
        digest.push_str(&block);
        included += 1;
    }
    if included < results.len() {
        digest.push_str(&format!(
            "[{} more analyses omitted to fit the window]\n",
            results.len() - included
        ));
    }

    (PATTERN_SYSTEM_PROMPT.to_string(), digest)
}

fn render_result_digest(result: &AnalysisResult) -> String {
    let mut block = format!(
        "## PR #{}: {} (quality {:.1})\n",
        result.pr_number, result.pr_title, result.overall_quality
    );
    let categories = [
        ("Strengths", &result.feedback.strengths),
        ("Refinement needs", &result.feedback.refinement_needs),
        ("Learning pathways", &result.feedback.learning_pathways),
    ];
    for (label, items) in categories {
        if items.is_empty() {
            continue;
        }
        block.push_str(label);
        block.push_str(":\n");
        for item in items {
            block.push_str("- ");
            block.push_str(&item.text);
            block.push('\n');
        }
    }
    block.push('\n');
    block
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
