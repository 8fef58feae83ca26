//! Vendor-neutral review client.
//!
//! Owns prompt assembly, provider dispatch, and the degraded-result policy.
//! Configuration mistakes propagate as errors; transport and parse failures
//! on a single PR come back as `Ok` results carrying an error marker so one
//! bad response cannot wedge a whole batch.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use crate::github::PullRequest;
use crate::review::{AnalysisResult, PatternAnalysisResult};

use super::{
    AnthropicProvider, GeminiProvider, LlmProvider, OpenAiProvider, ProviderKind,
    ProviderSettings, ReviewBackend, ReviewError, parse, prompt,
};

pub struct ReviewClient {
    http: Client,
    prompt_token_budget: usize,
}

impl ReviewClient {
    pub fn new(http: Client, prompt_token_budget: usize) -> Self {
        Self {
            http,
            prompt_token_budget,
        }
    }

    fn provider_for(&self, settings: &ProviderSettings) -> Box<dyn LlmProvider> {
        match settings.provider {
            ProviderKind::OpenAi => Box::new(OpenAiProvider::new(self.http.clone(), settings)),
            ProviderKind::Anthropic => {
                Box::new(AnthropicProvider::new(self.http.clone(), settings))
            }
            ProviderKind::Gemini => Box::new(GeminiProvider::new(self.http.clone(), settings)),
        }
    }

    /// Models selectable for the configured provider.
    pub async fn list_models(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Vec<String>, ReviewError> {
        settings.validate()?;
        self.provider_for(settings).list_models().await
    }
}

#[async_trait]
impl ReviewBackend for ReviewClient {
    async fn analyze_pull_request(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
    ) -> Result<AnalysisResult, ReviewError> {
        settings.validate()?;

        let provider = self.provider_for(settings);
        let (system, user) = prompt::review_prompt(pr, self.prompt_token_budget);
        info!(
            "analyzing PR #{} via {} (~{} prompt tokens)",
            pr.number,
            provider.name(),
            prompt::estimate_tokens(&user),
        );

        let response = match provider.generate(&system, &user).await {
            Ok(response) => response,
            Err(err @ ReviewError::Configuration(_)) => return Err(err),
            Err(err) => {
                warn!("analysis of PR #{} failed: {}", pr.number, err);
                return Ok(AnalysisResult::failed(pr, err.to_string()));
            }
        };

        match parse::parse_analysis(&response, pr) {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!("unparseable analysis for PR #{}: {}", pr.number, err);
                Ok(AnalysisResult::failed(pr, err.to_string()))
            }
        }
    }

    async fn analyze_patterns(
        &self,
        results: &[AnalysisResult],
        settings: &ProviderSettings,
    ) -> Result<PatternAnalysisResult, ReviewError> {
        settings.validate()?;
        if results.is_empty() {
            return Err(ReviewError::NoEligiblePrs);
        }

        let provider = self.provider_for(settings);
        let (system, user) = prompt::pattern_prompt(results, self.prompt_token_budget);
        info!(
            "synthesizing patterns across {} analyses via {}",
            results.len(),
            provider.name(),
        );

        let response = provider.generate(&system, &user).await?;
        let mut patterns = parse::parse_patterns(&response)?;
        patterns.analyzed_pr_ids = results.iter().map(|r| r.pr_id).collect();
        Ok(patterns)
    }
}
