//! Dual-tier analysis cache.
//!
//! The durable tier is SQLite; a flat in-process map stands in when SQLite
//! is unavailable or failing. Storage trouble never reaches callers: the
//! facade logs it and degrades to a miss (reads) or the other tier (writes).
//! The cache is advisory - anything lost is recoverable by re-analysis.

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::{SqliteCacheStore, run_migrations};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::review::{AnalysisResult, PatternAnalysisResult};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// Entry
// ============================================================================

/// Stored wrapper around a cached payload. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl<T> CacheEntry<T> {
    /// Wrap a payload with the given TTL. `ttl_days <= 0` means no expiry.
    pub fn new(data: T, ttl_days: i64) -> Self {
        let now = Utc::now().timestamp_millis();
        let expires_at = (ttl_days > 0).then(|| now + ttl_days * MS_PER_DAY);
        Self {
            data,
            timestamp: now,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Utc::now().timestamp_millis() >= deadline,
            None => false,
        }
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Scope selector for bulk clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    PrAnalyses,
    PatternAnalyses,
}

/// One storage tier. Implementations surface errors freely; the facade
/// decides what degradation looks like.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_pr_analysis(
        &self,
        developer_id: &str,
        pr_id: i64,
    ) -> Result<Option<CacheEntry<AnalysisResult>>>;

    async fn put_pr_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<AnalysisResult>,
    ) -> Result<()>;

    async fn delete_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Result<()>;

    async fn get_pattern_analysis(
        &self,
        developer_id: &str,
    ) -> Result<Option<CacheEntry<PatternAnalysisResult>>>;

    async fn put_pattern_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<PatternAnalysisResult>,
    ) -> Result<()>;

    async fn delete_pattern_analysis(&self, developer_id: &str) -> Result<()>;

    async fn clear(&self, scope: CacheScope) -> Result<()>;

    /// IDs of non-expired, non-error PR analyses for a developer. Used to
    /// rebuild session state after a reload.
    async fn cached_pr_ids(&self, developer_id: &str) -> Result<Vec<i64>>;
}

// ============================================================================
// Single-flight
// ============================================================================

/// Typed key for read deduplication. One logical record, one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReadKey {
    Pr { developer_id: String, pr_id: i64 },
    Pattern { developer_id: String },
}

/// Releases the in-flight flag on drop so early returns cannot leak it.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<ReadKey>>,
    key: ReadKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.key);
    }
}

// ============================================================================
// Facade
// ============================================================================

/// Tiered cache with absorbed failures and single-flight reads.
///
/// A point read (`get_*`) that finds another read of the same record in
/// flight returns a miss immediately instead of queueing; callers treat
/// that as retryable. Bulk readers that need an authoritative answer for
/// every key use the `load_*` variants, which read through the flag.
pub struct AnalysisCache {
    primary: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<dyn CacheBackend>,
    in_flight: Mutex<HashSet<ReadKey>>,
}

impl AnalysisCache {
    pub fn new(primary: Option<Arc<dyn CacheBackend>>, fallback: Arc<dyn CacheBackend>) -> Self {
        Self {
            primary,
            fallback,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Fallback-tier-only cache, for sessions where SQLite could not open.
    pub fn memory_only() -> Self {
        Self::new(None, Arc::new(MemoryCacheStore::new()))
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    fn begin_read(&self, key: ReadKey) -> Option<FlightGuard<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key.clone()) {
            return None;
        }
        Some(FlightGuard {
            in_flight: &self.in_flight,
            key,
        })
    }

    // ------------------------------------------------------------------
    // PR analyses
    // ------------------------------------------------------------------

    /// Cached analysis for one PR, or a miss. Expired entries are deleted
    /// on this read path before the miss is returned.
    pub async fn get_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Option<AnalysisResult> {
        let key = ReadKey::Pr {
            developer_id: developer_id.to_string(),
            pr_id,
        };
        let Some(_guard) = self.begin_read(key) else {
            debug!("read already in flight for PR {}, treating as miss", pr_id);
            return None;
        };
        self.load_pr_analysis(developer_id, pr_id).await
    }

    /// Contention-free variant of `get_pr_analysis` for bulk readers.
    /// Takes the in-flight flag when free so point reads still dedupe
    /// against this read, but a held flag does not turn it into a miss.
    pub async fn load_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Option<AnalysisResult> {
        let _guard = self.begin_read(ReadKey::Pr {
            developer_id: developer_id.to_string(),
            pr_id,
        });

        let entry = self.read_pr_entry(developer_id, pr_id).await?;
        if entry.is_expired() {
            debug!("cached analysis for PR {} expired, deleting", pr_id);
            self.delete_pr_analysis(developer_id, pr_id).await;
            return None;
        }
        Some(entry.data)
    }

    async fn read_pr_entry(
        &self,
        developer_id: &str,
        pr_id: i64,
    ) -> Option<CacheEntry<AnalysisResult>> {
        if let Some(primary) = &self.primary {
            match primary.get_pr_analysis(developer_id, pr_id).await {
                Ok(Some(entry)) => return Some(entry),
                // A clean miss still consults the fallback: entries written
                // there during a primary outage must stay reachable.
                Ok(None) => {}
                Err(e) => warn!("primary cache read failed for PR {}: {}", pr_id, e),
            }
        }
        match self.fallback.get_pr_analysis(developer_id, pr_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("fallback cache read failed for PR {}: {}", pr_id, e);
                None
            }
        }
    }

    /// Store an analysis. Never fails: primary errors divert the write to
    /// the fallback tier, and a double failure is logged and dropped.
    pub async fn put_pr_analysis(&self, developer_id: &str, result: &AnalysisResult, ttl_days: i64) {
        let entry = CacheEntry::new(result.clone(), ttl_days);
        if let Some(primary) = &self.primary {
            match primary.put_pr_analysis(developer_id, &entry).await {
                Ok(()) => return,
                Err(e) => warn!(
                    "primary cache write failed for PR {}, using fallback: {}",
                    result.pr_id, e
                ),
            }
        }
        if let Err(e) = self.fallback.put_pr_analysis(developer_id, &entry).await {
            warn!(
                "fallback cache write failed for PR {}, result not cached: {}",
                result.pr_id, e
            );
        }
    }

    /// Idempotent delete across both tiers.
    pub async fn delete_pr_analysis(&self, developer_id: &str, pr_id: i64) {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.delete_pr_analysis(developer_id, pr_id).await {
                warn!("primary cache delete failed for PR {}: {}", pr_id, e);
            }
        }
        if let Err(e) = self.fallback.delete_pr_analysis(developer_id, pr_id).await {
            warn!("fallback cache delete failed for PR {}: {}", pr_id, e);
        }
    }

    // ------------------------------------------------------------------
    // Pattern analyses
    // ------------------------------------------------------------------

    pub async fn get_pattern_analysis(&self, developer_id: &str) -> Option<PatternAnalysisResult> {
        let key = ReadKey::Pattern {
            developer_id: developer_id.to_string(),
        };
        let Some(_guard) = self.begin_read(key) else {
            debug!("pattern analysis read already in flight, treating as miss");
            return None;
        };
        self.load_pattern_analysis(developer_id).await
    }

    /// Contention-free variant of `get_pattern_analysis` for bulk readers.
    pub async fn load_pattern_analysis(&self, developer_id: &str) -> Option<PatternAnalysisResult> {
        let _guard = self.begin_read(ReadKey::Pattern {
            developer_id: developer_id.to_string(),
        });

        let entry = self.read_pattern_entry(developer_id).await?;
        if entry.is_expired() {
            debug!("cached pattern analysis expired, deleting");
            self.delete_pattern_analysis(developer_id).await;
            return None;
        }
        Some(entry.data)
    }

    async fn read_pattern_entry(
        &self,
        developer_id: &str,
    ) -> Option<CacheEntry<PatternAnalysisResult>> {
        if let Some(primary) = &self.primary {
            match primary.get_pattern_analysis(developer_id).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => warn!("primary cache read failed for patterns: {}", e),
            }
        }
        match self.fallback.get_pattern_analysis(developer_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("fallback cache read failed for patterns: {}", e);
                None
            }
        }
    }

    pub async fn put_pattern_analysis(
        &self,
        developer_id: &str,
        result: &PatternAnalysisResult,
        ttl_days: i64,
    ) {
        let entry = CacheEntry::new(result.clone(), ttl_days);
        if let Some(primary) = &self.primary {
            match primary.put_pattern_analysis(developer_id, &entry).await {
                Ok(()) => return,
                Err(e) => warn!("primary cache write failed for patterns, using fallback: {}", e),
            }
        }
        if let Err(e) = self.fallback.put_pattern_analysis(developer_id, &entry).await {
            warn!("fallback cache write failed for patterns, result not cached: {}", e);
        }
    }

    pub async fn delete_pattern_analysis(&self, developer_id: &str) {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.delete_pattern_analysis(developer_id).await {
                warn!("primary cache delete failed for patterns: {}", e);
            }
        }
        if let Err(e) = self.fallback.delete_pattern_analysis(developer_id).await {
            warn!("fallback cache delete failed for patterns: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Remove every entry in the scope across both tiers.
    pub async fn clear(&self, scope: CacheScope) {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.clear(scope).await {
                warn!("primary cache clear failed: {}", e);
            }
        }
        if let Err(e) = self.fallback.clear(scope).await {
            warn!("fallback cache clear failed: {}", e);
        }
    }

    /// Union of rehydration IDs across tiers, sorted for determinism.
    pub async fn cached_pr_ids(&self, developer_id: &str) -> Vec<i64> {
        let mut ids: HashSet<i64> = HashSet::new();
        if let Some(primary) = &self.primary {
            match primary.cached_pr_ids(developer_id).await {
                Ok(found) => ids.extend(found),
                Err(e) => warn!("primary cache id scan failed: {}", e),
            }
        }
        match self.fallback.cached_pr_ids(developer_id).await {
            Ok(found) => ids.extend(found),
            Err(e) => warn!("fallback cache id scan failed: {}", e),
        }
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids
    }
}
