//! Pull request input types.
//!
//! Field names mirror the GitHub REST payloads so dashboard code can
//! deserialize API responses straight into these structs. The file list
//! comes from the separate `/pulls/{number}/files` endpoint, so it
//! defaults to empty when absent.

use serde::{Deserialize, Serialize};

/// A pull request as handed to the analysis engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    /// Repository-unique identifier from the hosting provider.
    pub id: i64,
    /// Human-facing PR number.
    pub number: i64,
    pub title: String,
    /// Web link for the PR, used verbatim in aggregated feedback.
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub files: Vec<PullRequestFile>,
}

/// One changed file within a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestFile {
    pub filename: String,
    pub additions: i64,
    pub deletions: i64,
    /// Unified diff text. Absent for binary files.
    #[serde(default)]
    pub patch: Option<String>,
}

impl PullRequest {
    /// Total churn across all files, used for logging and prompt headers.
    pub fn total_changes(&self) -> i64 {
        self.files.iter().map(|f| f.additions + f.deletions).sum()
    }
}
