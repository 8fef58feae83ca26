//! In-process fallback tier.
//!
//! A flat map of string key to serialized entry, using the same key layout
//! as the dashboard's local fallback storage: `pr-analysis-{prId}-{developerId}`
//! and `pattern-analysis-{developerId}`.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheBackend, CacheEntry, CacheScope};
use crate::review::{AnalysisResult, PatternAnalysisResult};

const PR_PREFIX: &str = "pr-analysis-";
const PATTERN_PREFIX: &str = "pattern-analysis-";

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pr_key(developer_id: &str, pr_id: i64) -> String {
        format!("{}{}-{}", PR_PREFIX, pr_id, developer_id)
    }

    fn pattern_key(developer_id: &str) -> String {
        format!("{}{}", PATTERN_PREFIX, developer_id)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheStore {
    async fn get_pr_analysis(
        &self,
        developer_id: &str,
        pr_id: i64,
    ) -> Result<Option<CacheEntry<AnalysisResult>>> {
        let entries = self.entries.read().await;
        match entries.get(&Self::pr_key(developer_id, pr_id)) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn put_pr_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<AnalysisResult>,
    ) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.entries
            .write()
            .await
            .insert(Self::pr_key(developer_id, entry.data.pr_id), raw);
        Ok(())
    }

    async fn delete_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(&Self::pr_key(developer_id, pr_id));
        Ok(())
    }

    async fn get_pattern_analysis(
        &self,
        developer_id: &str,
    ) -> Result<Option<CacheEntry<PatternAnalysisResult>>> {
        let entries = self.entries.read().await;
        match entries.get(&Self::pattern_key(developer_id)) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn put_pattern_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<PatternAnalysisResult>,
    ) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.entries
            .write()
            .await
            .insert(Self::pattern_key(developer_id), raw);
        Ok(())
    }

    async fn delete_pattern_analysis(&self, developer_id: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(&Self::pattern_key(developer_id));
        Ok(())
    }

    async fn clear(&self, scope: CacheScope) -> Result<()> {
        let prefix = match scope {
            CacheScope::PrAnalyses => PR_PREFIX,
            CacheScope::PatternAnalyses => PATTERN_PREFIX,
        };
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn cached_pr_ids(&self, developer_id: &str) -> Result<Vec<i64>> {
        let entries = self.entries.read().await;
        let mut ids = Vec::new();
        for (key, raw) in entries.iter() {
            let Some(rest) = key.strip_prefix(PR_PREFIX) else {
                continue;
            };
            // Key shape is "{prId}-{developerId}"; the id is numeric so the
            // first '-' is an unambiguous separator.
            let Some((id_part, owner)) = rest.split_once('-') else {
                continue;
            };
            if owner != developer_id {
                continue;
            }
            let Ok(pr_id) = id_part.parse::<i64>() else {
                continue;
            };
            let Ok(entry) = serde_json::from_str::<CacheEntry<AnalysisResult>>(raw) else {
                continue;
            };
            if entry.is_expired() || entry.data.is_error() {
                continue;
            }
            ids.push(pr_id);
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PullRequest;
    use crate::review::Feedback;

    fn sample_result(pr_id: i64) -> AnalysisResult {
        AnalysisResult {
            pr_id,
            pr_number: pr_id,
            pr_title: format!("PR {}", pr_id),
            pr_url: format!("https://example.com/pull/{}", pr_id),
            feedback: Feedback::default(),
            overall_quality: 7.5,
            career_impact_summary: "Solid work".into(),
            error: None,
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            MemoryCacheStore::pr_key("alice", 42),
            "pr-analysis-42-alice"
        );
        assert_eq!(
            MemoryCacheStore::pattern_key("alice"),
            "pattern-analysis-alice"
        );
    }

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let store = MemoryCacheStore::new();
        let entry = CacheEntry::new(sample_result(1), 30);

        store.put_pr_analysis("dev", &entry).await.unwrap();
        let loaded = store.get_pr_analysis("dev", 1).await.unwrap().unwrap();
        assert_eq!(loaded.data.pr_id, 1);

        store.delete_pr_analysis("dev", 1).await.unwrap();
        assert!(store.get_pr_analysis("dev", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_respects_scope() {
        let store = MemoryCacheStore::new();
        store
            .put_pr_analysis("dev", &CacheEntry::new(sample_result(1), 0))
            .await
            .unwrap();
        store
            .put_pattern_analysis("dev", &CacheEntry::new(PatternAnalysisResult::default(), 0))
            .await
            .unwrap();

        store.clear(CacheScope::PrAnalyses).await.unwrap();
        assert!(store.get_pr_analysis("dev", 1).await.unwrap().is_none());
        assert!(store.get_pattern_analysis("dev").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cached_pr_ids_scoped_to_developer() {
        let store = MemoryCacheStore::new();
        store
            .put_pr_analysis("alice", &CacheEntry::new(sample_result(1), 0))
            .await
            .unwrap();
        store
            .put_pr_analysis("bob", &CacheEntry::new(sample_result(2), 0))
            .await
            .unwrap();

        assert_eq!(store.cached_pr_ids("alice").await.unwrap(), vec![1]);
        assert_eq!(store.cached_pr_ids("bob").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_cached_pr_ids_skips_errored() {
        let store = MemoryCacheStore::new();
        let pr = PullRequest {
            id: 3,
            number: 3,
            title: "t".into(),
            url: "u".into(),
            author: None,
            files: vec![],
        };
        store
            .put_pr_analysis("dev", &CacheEntry::new(AnalysisResult::failed(&pr, "boom"), 1))
            .await
            .unwrap();
        store
            .put_pr_analysis("dev", &CacheEntry::new(sample_result(4), 0))
            .await
            .unwrap();

        assert_eq!(store.cached_pr_ids("dev").await.unwrap(), vec![4]);
    }
}
