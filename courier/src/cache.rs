//! Read-through cache for owner statistics.
//!
//! Summaries are recomputed from the full attempt history, which gets
//! expensive for busy owners. [`StatsCache`] keeps the last result per owner
//! for a short TTL; commands that change an owner's counts call
//! [`StatsCache::invalidate`]. A load that overlaps an invalidation is
//! returned to its caller but not cached.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use courier_core::{Error, OwnerId, services::OwnerSummary};
use dashmap::DashMap;

/// How long a summary is served from the cache by default
pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedSummary {
    summary: OwnerSummary,
    loaded_at: Instant,
}

#[derive(Debug)]
pub struct StatsCache {
    entries: DashMap<OwnerId, CachedSummary>,
    /// Bumped by `invalidate`, per owner
    generations: DashMap<OwnerId, u64>,
    /// Bumped by `clear`
    epoch: AtomicU64,
    ttl: Duration,
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_TTL)
    }
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached summary for `owner_id`, if it is still fresh.
    pub fn get(&self, owner_id: &OwnerId) -> Option<OwnerSummary> {
        let entry = self.entries.get(owner_id)?;
        if entry.loaded_at.elapsed() < self.ttl {
            Some(entry.summary.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, owner_id: OwnerId, summary: OwnerSummary) {
        self.entries.insert(
            owner_id,
            CachedSummary {
                summary,
                loaded_at: Instant::now(),
            },
        );
    }

    /// Return the fresh cached summary or run `load` and cache its result.
    ///
    /// Errors from `load` are returned as-is and never cached.
    pub async fn get_or_load<F, Fut>(
        &self,
        owner_id: &OwnerId,
        load: F,
    ) -> Result<OwnerSummary, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OwnerSummary, Error>>,
    {
        if let Some(summary) = self.get(owner_id) {
            tracing::trace!(owner_id = %owner_id, "Statistics cache hit");
            return Ok(summary);
        }

        let before = self.generation(owner_id);
        let summary = load().await?;

        // Holding the shard lock orders this check against the remove in
        // `invalidate`, which bumps the generation first.
        let slot = self.entries.entry(owner_id.clone());
        if self.generation(owner_id) == before {
            slot.insert(CachedSummary {
                summary: summary.clone(),
                loaded_at: Instant::now(),
            });
        } else {
            tracing::debug!(
                owner_id = %owner_id,
                "Statistics invalidated during load, not caching"
            );
        }
        Ok(summary)
    }

    pub fn invalidate(&self, owner_id: &OwnerId) {
        *self.generations.entry(owner_id.clone()).or_insert(0) += 1;
        self.entries.remove(owner_id);
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    fn generation(&self, owner_id: &OwnerId) -> (u64, u64) {
        let owner = self.generations.get(owner_id).map_or(0, |g| *g);
        (self.epoch.load(Ordering::SeqCst), owner)
    }

    /// Drop entries older than the TTL.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
