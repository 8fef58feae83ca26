// tests/orchestrator_test.rs
//
// Analyze-once lifecycle, batch semantics, cache discovery, selection, and
// pattern staleness, all against a mock review backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use prism::cache::{AnalysisCache, CacheBackend, CacheEntry, CacheScope, MemoryCacheStore};
use prism::github::PullRequest;
use prism::llm::{ProviderKind, ProviderSettings, ReviewBackend, ReviewError};
use prism::orchestrator::{AnalysisOrchestrator, OrchestratorConfig};
use prism::review::{AnalysisResult, Feedback, FeedbackItem, PatternAnalysisResult};

// ============================================================================
// Mock backends
// ============================================================================

struct MockBackend {
    calls: AtomicUsize,
    pattern_calls: AtomicUsize,
    fail_ids: Vec<i64>,
    delay: Duration,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            pattern_calls: AtomicUsize::new(0),
            fail_ids: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    fn failing_on(ids: Vec<i64>) -> Self {
        Self {
            fail_ids: ids,
            ..Self::new()
        }
    }

    fn with_delay(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pattern_calls(&self) -> usize {
        self.pattern_calls.load(Ordering::SeqCst)
    }
}

fn clean_result(pr: &PullRequest) -> AnalysisResult {
    AnalysisResult {
        pr_id: pr.id,
        pr_number: pr.number,
        pr_title: pr.title.clone(),
        pr_url: pr.url.clone(),
        feedback: Feedback {
            strengths: vec![FeedbackItem::plain("Good test coverage")],
            refinement_needs: vec![],
            learning_pathways: vec![],
        },
        overall_quality: 8.0,
        career_impact_summary: "Steady progress.".to_string(),
        error: None,
    }
}

#[async_trait]
impl ReviewBackend for MockBackend {
    async fn analyze_pull_request(
        &self,
        pr: &PullRequest,
        _settings: &ProviderSettings,
    ) -> Result<AnalysisResult, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_ids.contains(&pr.id) {
            return Ok(AnalysisResult::failed(pr, "mock provider failure"));
        }
        Ok(clean_result(pr))
    }

    async fn analyze_patterns(
        &self,
        results: &[AnalysisResult],
        _settings: &ProviderSettings,
    ) -> Result<PatternAnalysisResult, ReviewError> {
        self.pattern_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PatternAnalysisResult {
            analyzed_pr_ids: results.iter().map(|r| r.pr_id).collect(),
            ..PatternAnalysisResult::default()
        })
    }
}

/// Cache tier that delays PR reads so summary rebuilds can overlap.
struct SlowStore {
    inner: MemoryCacheStore,
    delay: Duration,
}

#[async_trait]
impl CacheBackend for SlowStore {
    async fn get_pr_analysis(
        &self,
        developer_id: &str,
        pr_id: i64,
    ) -> Result<Option<CacheEntry<AnalysisResult>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_pr_analysis(developer_id, pr_id).await
    }

    async fn put_pr_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<AnalysisResult>,
    ) -> Result<()> {
        self.inner.put_pr_analysis(developer_id, entry).await
    }

    async fn delete_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Result<()> {
        self.inner.delete_pr_analysis(developer_id, pr_id).await
    }

    async fn get_pattern_analysis(
        &self,
        developer_id: &str,
    ) -> Result<Option<CacheEntry<PatternAnalysisResult>>> {
        self.inner.get_pattern_analysis(developer_id).await
    }

    async fn put_pattern_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<PatternAnalysisResult>,
    ) -> Result<()> {
        self.inner.put_pattern_analysis(developer_id, entry).await
    }

    async fn delete_pattern_analysis(&self, developer_id: &str) -> Result<()> {
        self.inner.delete_pattern_analysis(developer_id).await
    }

    async fn clear(&self, scope: CacheScope) -> Result<()> {
        self.inner.clear(scope).await
    }

    async fn cached_pr_ids(&self, developer_id: &str) -> Result<Vec<i64>> {
        self.inner.cached_pr_ids(developer_id).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn sample_pr(id: i64) -> PullRequest {
    PullRequest {
        id,
        number: id,
        title: format!("Change {}", id),
        url: format!("https://example.com/pull/{}", id),
        author: Some("dev".to_string()),
        files: vec![],
    }
}

fn settings() -> ProviderSettings {
    ProviderSettings {
        provider: ProviderKind::OpenAi,
        api_key: "test-key".to_string(),
        model: "gpt-4o".to_string(),
        base_url: None,
        temperature: 0.3,
        max_output_tokens: 512,
    }
}

fn orchestrator_with(backend: Arc<MockBackend>) -> (AnalysisOrchestrator, Arc<AnalysisCache>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let cache = Arc::new(AnalysisCache::memory_only());
    let orchestrator = AnalysisOrchestrator::new(
        "dev-1",
        cache.clone(),
        backend,
        OrchestratorConfig::default(),
    );
    (orchestrator, cache)
}

// ============================================================================
// Analyze-once
// ============================================================================

#[tokio::test]
async fn test_second_analysis_serves_cache() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());
    let pr = sample_pr(1);

    let first = orchestrator.analyze_one(&pr, &settings()).await.unwrap();
    let second = orchestrator.analyze_one(&pr, &settings()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.calls(), 1);
    assert_eq!(orchestrator.analyzed_ids().await, vec![1]);
}

#[tokio::test]
async fn test_concurrent_requests_dedup_to_one_call() {
    let backend = Arc::new(MockBackend::with_delay(100));
    let (orchestrator, _) = orchestrator_with(backend.clone());
    let pr = sample_pr(1);
    let s = settings();

    let (a, b) = tokio::join!(
        orchestrator.analyze_one(&pr, &s),
        orchestrator.analyze_one(&pr, &s),
    );

    let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1);
    let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(err, ReviewError::AlreadyAnalyzing(1)));
    assert_eq!(backend.calls(), 1);

    // The loser can retry once the winner finishes; the cache answers.
    assert!(orchestrator.analyze_one(&pr, &s).await.is_ok());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_invalid_settings_rejected_before_any_state_change() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());
    let pr = sample_pr(1);

    let mut bad = settings();
    bad.api_key = String::new();

    let err = orchestrator.analyze_one(&pr, &bad).await.unwrap_err();
    assert!(matches!(err, ReviewError::Configuration(_)));
    assert_eq!(backend.calls(), 0);
    assert!(!orchestrator.is_analyzing(1).await);
    assert!(orchestrator.analyzed_ids().await.is_empty());
}

#[tokio::test]
async fn test_failed_analysis_is_cached_but_not_analyzed() {
    let backend = Arc::new(MockBackend::failing_on(vec![1]));
    let (orchestrator, _) = orchestrator_with(backend.clone());
    let pr = sample_pr(1);

    let result = orchestrator.analyze_one(&pr, &settings()).await.unwrap();
    assert!(result.is_error());
    assert!(orchestrator.analyzed_ids().await.is_empty());

    // The errored result damps refetching: the second request is served
    // from cache without another provider call.
    let again = orchestrator.analyze_one(&pr, &settings()).await.unwrap();
    assert!(again.is_error());
    assert_eq!(backend.calls(), 1);

    // And it never reaches the aggregate.
    assert_eq!(orchestrator.latest_summary().analyzed_count, 0);
}

#[tokio::test]
async fn test_reanalyze_bypasses_cache() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());
    let pr = sample_pr(1);

    orchestrator.analyze_one(&pr, &settings()).await.unwrap();
    assert_eq!(backend.calls(), 1);

    let fresh = orchestrator.reanalyze(&pr, &settings()).await.unwrap();
    assert_eq!(backend.calls(), 2);
    assert!(!fresh.is_error());
    assert_eq!(orchestrator.analyzed_ids().await, vec![1]);
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test]
async fn test_batch_skips_known_prs_and_respects_cap() {
    let backend = Arc::new(MockBackend::new());
    let cache = Arc::new(AnalysisCache::memory_only());
    let orchestrator = AnalysisOrchestrator::new(
        "dev-1",
        cache,
        backend.clone(),
        OrchestratorConfig {
            batch_concurrency: 2,
            ..OrchestratorConfig::default()
        },
    );

    orchestrator
        .analyze_one(&sample_pr(1), &settings())
        .await
        .unwrap();
    assert_eq!(backend.calls(), 1);

    let prs: Vec<PullRequest> = (1..=4).map(sample_pr).collect();
    let outcome = orchestrator
        .analyze_many(&prs, &settings(), 2)
        .await
        .unwrap();

    // PR 1 was already analyzed; of 2, 3, 4 only two fit under the cap.
    assert_eq!(outcome.requested, 4);
    assert_eq!(outcome.analyzed(), 2);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(backend.calls(), 3);
    assert_eq!(orchestrator.analyzed_ids().await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_batch_with_invalid_settings_runs_nothing() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());

    let mut bad = settings();
    bad.model = "  ".to_string();

    let prs = vec![sample_pr(1), sample_pr(2)];
    let err = orchestrator
        .analyze_many(&prs, &bad, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::Configuration(_)));
    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Cache discovery
// ============================================================================

#[tokio::test]
async fn test_discover_cached_marks_clean_hits_only() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, cache) = orchestrator_with(backend.clone());

    cache
        .put_pr_analysis("dev-1", &clean_result(&sample_pr(1)), 30)
        .await;
    cache
        .put_pr_analysis(
            "dev-1",
            &AnalysisResult::failed(&sample_pr(2), "stale failure"),
            1,
        )
        .await;

    let prs = vec![sample_pr(1), sample_pr(2), sample_pr(3)];
    let added = orchestrator.discover_cached(&prs).await;

    assert_eq!(added, 1);
    assert_eq!(orchestrator.analyzed_ids().await, vec![1]);
    assert_eq!(backend.calls(), 0);

    // Idempotent: nothing new on the second pass.
    assert_eq!(orchestrator.discover_cached(&prs).await, 0);
}

#[tokio::test]
async fn test_hydrate_restores_analyzed_set() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, cache) = orchestrator_with(backend.clone());

    cache
        .put_pr_analysis("dev-1", &clean_result(&sample_pr(1)), 30)
        .await;
    cache
        .put_pr_analysis("dev-1", &clean_result(&sample_pr(2)), 30)
        .await;
    cache
        .put_pr_analysis(
            "dev-1",
            &AnalysisResult::failed(&sample_pr(3), "stale failure"),
            1,
        )
        .await;

    assert_eq!(orchestrator.hydrate().await, 2);
    assert_eq!(orchestrator.analyzed_ids().await, vec![1, 2]);
    assert_eq!(orchestrator.latest_summary().analyzed_count, 2);
}

// ============================================================================
// Selection and summaries
// ============================================================================

#[tokio::test]
async fn test_selection_scopes_the_summary() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend);
    for id in 1..=3 {
        orchestrator
            .analyze_one(&sample_pr(id), &settings())
            .await
            .unwrap();
    }
    assert_eq!(orchestrator.latest_summary().analyzed_count, 3);

    // 99 is not analyzed; it is kept in the selection but contributes
    // nothing until it is.
    orchestrator.set_selection([1, 3, 99]).await;
    assert_eq!(orchestrator.latest_summary().analyzed_count, 2);
    assert_eq!(orchestrator.selected_ids().await, Some(vec![1, 3, 99]));

    orchestrator.clear_selection().await;
    assert_eq!(orchestrator.latest_summary().analyzed_count, 3);
    assert_eq!(orchestrator.selected_ids().await, None);
}

#[tokio::test]
async fn test_summary_watch_sees_updates() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend);
    let mut rx = orchestrator.subscribe();
    assert_eq!(rx.borrow().analyzed_count, 0);

    orchestrator
        .analyze_one(&sample_pr(1), &settings())
        .await
        .unwrap();

    rx.changed().await.unwrap();
    let summary = rx.borrow().clone();
    assert_eq!(summary.analyzed_count, 1);
    assert_eq!(summary.average_score, 8.0);
    assert_eq!(summary.strengths[0].text, "Good test coverage");
}

#[tokio::test]
async fn test_overlapping_refreshes_keep_full_coverage() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backend = Arc::new(MockBackend::new());
    let slow = SlowStore {
        inner: MemoryCacheStore::new(),
        delay: Duration::from_millis(100),
    };
    let cache = Arc::new(AnalysisCache::new(
        Some(Arc::new(slow)),
        Arc::new(MemoryCacheStore::new()),
    ));
    let orchestrator = AnalysisOrchestrator::new(
        "dev-1",
        cache.clone(),
        backend,
        OrchestratorConfig::default(),
    );

    cache
        .put_pr_analysis("dev-1", &clean_result(&sample_pr(1)), 30)
        .await;
    cache
        .put_pr_analysis("dev-1", &clean_result(&sample_pr(2)), 30)
        .await;
    assert_eq!(orchestrator.hydrate().await, 2);

    // Two rebuilds overlapping on the same slow keys. Both must cover
    // every analyzed PR, and the published summary must stay complete.
    let (first, second) = tokio::join!(orchestrator.refresh_summary(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        orchestrator.refresh_summary().await
    });

    assert_eq!(first.analyzed_count, 2);
    assert_eq!(second.analyzed_count, 2);
    assert_eq!(orchestrator.latest_summary().analyzed_count, 2);
}

// ============================================================================
// Pattern analysis
// ============================================================================

#[tokio::test]
async fn test_pattern_analysis_requires_clean_results() {
    let backend = Arc::new(MockBackend::failing_on(vec![1]));
    let (orchestrator, _) = orchestrator_with(backend.clone());

    let err = orchestrator.analyze_patterns(&settings()).await.unwrap_err();
    assert!(matches!(err, ReviewError::NoEligiblePrs));

    // An errored analysis does not make the set eligible either.
    orchestrator
        .analyze_one(&sample_pr(1), &settings())
        .await
        .unwrap();
    let err = orchestrator.analyze_patterns(&settings()).await.unwrap_err();
    assert!(matches!(err, ReviewError::NoEligiblePrs));
    assert_eq!(backend.pattern_calls(), 0);
}

#[tokio::test]
async fn test_pattern_analysis_cached_until_membership_changes() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());

    for id in [1, 2] {
        orchestrator
            .analyze_one(&sample_pr(id), &settings())
            .await
            .unwrap();
    }

    let patterns = orchestrator.analyze_patterns(&settings()).await.unwrap();
    assert_eq!(patterns.analyzed_pr_ids, vec![1, 2]);
    assert_eq!(backend.pattern_calls(), 1);

    // Same membership, cached synthesis.
    orchestrator.analyze_patterns(&settings()).await.unwrap();
    assert_eq!(backend.pattern_calls(), 1);

    // A new analysis makes the cached synthesis stale.
    orchestrator
        .analyze_one(&sample_pr(3), &settings())
        .await
        .unwrap();
    let fresh = orchestrator.analyze_patterns(&settings()).await.unwrap();
    assert_eq!(fresh.analyzed_pr_ids, vec![1, 2, 3]);
    assert_eq!(backend.pattern_calls(), 2);
}

#[tokio::test]
async fn test_selection_scopes_pattern_synthesis() {
    let backend = Arc::new(MockBackend::new());
    let (orchestrator, _) = orchestrator_with(backend.clone());

    for id in [1, 2] {
        orchestrator
            .analyze_one(&sample_pr(id), &settings())
            .await
            .unwrap();
    }

    // With PR 1 selected, the synthesis input narrows with the summary.
    orchestrator.set_selection([1]).await;
    let patterns = orchestrator.analyze_patterns(&settings()).await.unwrap();
    assert_eq!(patterns.analyzed_pr_ids, vec![1]);
    assert_eq!(backend.pattern_calls(), 1);

    // Dropping the selection widens the set and voids the cached synthesis.
    orchestrator.clear_selection().await;
    let widened = orchestrator.analyze_patterns(&settings()).await.unwrap();
    assert_eq!(widened.analyzed_pr_ids, vec![1, 2]);
    assert_eq!(backend.pattern_calls(), 2);

    // A selection with no analyzed members leaves nothing to synthesize.
    orchestrator.set_selection([99]).await;
    let err = orchestrator.analyze_patterns(&settings()).await.unwrap_err();
    assert!(matches!(err, ReviewError::NoEligiblePrs));
}
