//! Analysis orchestrator.
//!
//! Owns the analyze-once lifecycle around the cache and the review backend:
//! tracks which PRs are analyzing, analyzed, and selected, dedupes repeat
//! requests per PR, fans batches out with bounded concurrency, and publishes
//! the aggregated feedback summary over a watch channel whenever the
//! underlying data changes.

mod types;

pub use types::{BatchOutcome, OrchestratorConfig};

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::cache::AnalysisCache;
use crate::github::PullRequest;
use crate::llm::{ProviderSettings, ReviewBackend, ReviewError};
use crate::review::{AnalysisResult, FeedbackSummary, PatternAnalysisResult, aggregate};

/// Membership sets guarded by one lock so transitions stay atomic.
#[derive(Debug, Default)]
struct IdentitySets {
    /// PRs with an analysis currently running.
    analyzing: HashSet<i64>,
    /// PRs with a clean analysis available in the cache.
    analyzed: HashSet<i64>,
    /// `None` means no selection; summaries cover everything analyzed.
    selected: Option<HashSet<i64>>,
}

/// Per-developer analysis coordinator. One instance per dashboard session;
/// clones of the Arc-wrapped dependencies are cheap.
pub struct AnalysisOrchestrator {
    developer_id: String,
    cache: Arc<AnalysisCache>,
    backend: Arc<dyn ReviewBackend>,
    config: OrchestratorConfig,
    sets: Mutex<IdentitySets>,
    summary_tx: watch::Sender<FeedbackSummary>,
}

impl AnalysisOrchestrator {
    pub fn new(
        developer_id: impl Into<String>,
        cache: Arc<AnalysisCache>,
        backend: Arc<dyn ReviewBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        let (summary_tx, _) = watch::channel(FeedbackSummary::default());
        Self {
            developer_id: developer_id.into(),
            cache,
            backend,
            config,
            sets: Mutex::new(IdentitySets::default()),
            summary_tx,
        }
    }

    pub fn developer_id(&self) -> &str {
        &self.developer_id
    }

    /// Watch the aggregated summary. The receiver observes the current
    /// value immediately and every refresh after that.
    pub fn subscribe(&self) -> watch::Receiver<FeedbackSummary> {
        self.summary_tx.subscribe()
    }

    pub fn latest_summary(&self) -> FeedbackSummary {
        self.summary_tx.borrow().clone()
    }

    // ========================================================================
    // Single-PR lifecycle
    // ========================================================================

    /// Analyze one PR, serving from cache when a result (clean or errored)
    /// is already stored.
    pub async fn analyze_one(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
    ) -> Result<AnalysisResult, ReviewError> {
        self.analyze_inner(pr, settings, false).await
    }

    /// Analyze one PR bypassing the cache. The stored entry is dropped
    /// before the new run so a crash cannot leave the old result looking
    /// current.
    pub async fn reanalyze(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
    ) -> Result<AnalysisResult, ReviewError> {
        self.analyze_inner(pr, settings, true).await
    }

    async fn analyze_inner(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
        force: bool,
    ) -> Result<AnalysisResult, ReviewError> {
        settings.validate()?;

        {
            let mut sets = self.sets.lock().await;
            if !sets.analyzing.insert(pr.id) {
                debug!("PR #{} already being analyzed, skipping", pr.number);
                return Err(ReviewError::AlreadyAnalyzing(pr.id));
            }
        }

        let outcome = self.run_analysis(pr, settings, force).await;

        {
            let mut sets = self.sets.lock().await;
            sets.analyzing.remove(&pr.id);
            if let Ok(result) = &outcome {
                if !result.is_error() {
                    sets.analyzed.insert(pr.id);
                }
                // A failed reanalysis leaves the PR analyzed; its feedback
                // just stops counting until a clean run replaces it.
            }
        }

        if outcome.is_ok() {
            self.refresh_summary().await;
        }
        outcome
    }

    async fn run_analysis(
        &self,
        pr: &PullRequest,
        settings: &ProviderSettings,
        force: bool,
    ) -> Result<AnalysisResult, ReviewError> {
        if force {
            self.cache
                .delete_pr_analysis(&self.developer_id, pr.id)
                .await;
        } else if let Some(hit) = self.cache.load_pr_analysis(&self.developer_id, pr.id).await {
            debug!("cache hit for PR #{}", pr.number);
            return Ok(hit);
        }

        let result = self.backend.analyze_pull_request(pr, settings).await?;
        let ttl_days = if result.is_error() {
            self.config.error_ttl_days
        } else {
            self.config.analysis_ttl_days
        };
        self.cache
            .put_pr_analysis(&self.developer_id, &result, ttl_days)
            .await;
        Ok(result)
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Analyze a set of PRs, skipping ones already analyzed or in flight and
    /// truncating to `max_count`. Within the batch, analyses run in chunks
    /// of `batch_concurrency`.
    pub async fn analyze_many(
        &self,
        prs: &[PullRequest],
        settings: &ProviderSettings,
        max_count: usize,
    ) -> Result<BatchOutcome, ReviewError> {
        settings.validate()?;

        let eligible: Vec<&PullRequest> = {
            let sets = self.sets.lock().await;
            prs.iter()
                .filter(|pr| !sets.analyzed.contains(&pr.id) && !sets.analyzing.contains(&pr.id))
                .collect()
        };

        let capped: Vec<&PullRequest> = eligible.into_iter().take(max_count).collect();
        let mut outcome = BatchOutcome {
            requested: prs.len(),
            skipped: prs.len() - capped.len(),
            results: Vec::with_capacity(capped.len()),
        };

        for chunk in capped.chunks(self.config.batch_concurrency.max(1)) {
            let runs = chunk.iter().map(|pr| self.analyze_one(pr, settings));
            for run in join_all(runs).await {
                match run {
                    Ok(result) => outcome.results.push(result),
                    // Lost a race with a direct analyze call; the PR is
                    // covered either way.
                    Err(ReviewError::AlreadyAnalyzing(_)) => outcome.skipped += 1,
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            "batch finished: {} analyzed, {} skipped of {} requested",
            outcome.analyzed(),
            outcome.skipped,
            outcome.requested
        );
        Ok(outcome)
    }

    // ========================================================================
    // Cache discovery
    // ========================================================================

    /// Mark PRs that already have a clean cached analysis as analyzed,
    /// without touching any provider. Returns how many were newly marked.
    pub async fn discover_cached(&self, prs: &[PullRequest]) -> usize {
        let unknown: Vec<i64> = {
            let sets = self.sets.lock().await;
            prs.iter()
                .map(|pr| pr.id)
                .filter(|id| !sets.analyzed.contains(id))
                .collect()
        };

        let mut found = Vec::new();
        for id in unknown {
            if let Some(result) = self.cache.load_pr_analysis(&self.developer_id, id).await {
                if !result.is_error() {
                    found.push(id);
                }
            }
        }

        let added = {
            let mut sets = self.sets.lock().await;
            found.iter().filter(|id| sets.analyzed.insert(**id)).count()
        };

        if added > 0 {
            info!("discovered {} cached analyses", added);
            self.refresh_summary().await;
        }
        added
    }

    /// Rebuild the analyzed set from the cache index. For a fresh
    /// orchestrator attaching to an existing store.
    pub async fn hydrate(&self) -> usize {
        let ids = self.cache.cached_pr_ids(&self.developer_id).await;
        let added = {
            let mut sets = self.sets.lock().await;
            ids.iter().filter(|id| sets.analyzed.insert(**id)).count()
        };

        if added > 0 {
            info!("hydrated {} analyses from cache", added);
            self.refresh_summary().await;
        }
        added
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Scope summaries and pattern synthesis to a subset of PRs. Ids
    /// outside the analyzed set are kept; they start counting if those
    /// PRs get analyzed later.
    pub async fn set_selection(&self, ids: impl IntoIterator<Item = i64>) {
        {
            let mut sets = self.sets.lock().await;
            sets.selected = Some(ids.into_iter().collect());
        }
        self.refresh_summary().await;
    }

    pub async fn clear_selection(&self) {
        {
            let mut sets = self.sets.lock().await;
            sets.selected = None;
        }
        self.refresh_summary().await;
    }

    // ========================================================================
    // Summary
    // ========================================================================

    /// Recompute the aggregate over the effective id set and publish it to
    /// all watchers. Last write wins; there is no partial-order tracking.
    pub async fn refresh_summary(&self) -> FeedbackSummary {
        let ids = self.effective_ids().await;
        let results = self.load_results(&ids).await;
        let summary = aggregate(&results);
        self.summary_tx.send_replace(summary.clone());
        summary
    }

    /// Selected ∩ analyzed when a selection exists, otherwise everything
    /// analyzed. Sorted so downstream work is deterministic.
    async fn effective_ids(&self) -> Vec<i64> {
        let sets = self.sets.lock().await;
        let mut ids: Vec<i64> = match &sets.selected {
            Some(selected) => sets.analyzed.intersection(selected).copied().collect(),
            None => sets.analyzed.iter().copied().collect(),
        };
        ids.sort_unstable();
        ids
    }

    async fn load_results(&self, ids: &[i64]) -> Vec<AnalysisResult> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            // Read through the single-flight flag: a contention miss here
            // would drop an analyzed PR from the aggregate, and nothing
            // later would repair the published value.
            if let Some(result) = self.cache.load_pr_analysis(&self.developer_id, id).await {
                if !result.is_error() {
                    results.push(result);
                }
            }
        }
        results
    }

    // ========================================================================
    // Pattern analysis
    // ========================================================================

    /// Synthesize cross-PR patterns over the same selection-scoped id set
    /// the summary covers. Serves the cached synthesis as long as it covers
    /// exactly that set; any membership change makes it stale.
    pub async fn analyze_patterns(
        &self,
        settings: &ProviderSettings,
    ) -> Result<PatternAnalysisResult, ReviewError> {
        settings.validate()?;

        let ids = self.effective_ids().await;
        let results = self.load_results(&ids).await;
        if results.is_empty() {
            return Err(ReviewError::NoEligiblePrs);
        }

        let current: HashSet<i64> = results.iter().map(|r| r.pr_id).collect();
        if let Some(cached) = self.cache.load_pattern_analysis(&self.developer_id).await {
            let covered: HashSet<i64> = cached.analyzed_pr_ids.iter().copied().collect();
            if covered == current {
                debug!("pattern analysis still covers the current input set, serving cached");
                return Ok(cached);
            }
        }

        let patterns = self.backend.analyze_patterns(&results, settings).await?;
        self.cache
            .put_pattern_analysis(&self.developer_id, &patterns, self.config.pattern_ttl_days)
            .await;
        Ok(patterns)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn analyzed_ids(&self) -> Vec<i64> {
        let sets = self.sets.lock().await;
        let mut ids: Vec<i64> = sets.analyzed.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn analyzing_ids(&self) -> Vec<i64> {
        let sets = self.sets.lock().await;
        let mut ids: Vec<i64> = sets.analyzing.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn selected_ids(&self) -> Option<Vec<i64>> {
        let sets = self.sets.lock().await;
        sets.selected.as_ref().map(|selected| {
            let mut ids: Vec<i64> = selected.iter().copied().collect();
            ids.sort_unstable();
            ids
        })
    }

    pub async fn is_analyzing(&self, pr_id: i64) -> bool {
        let sets = self.sets.lock().await;
        sets.analyzing.contains(&pr_id)
    }
}
