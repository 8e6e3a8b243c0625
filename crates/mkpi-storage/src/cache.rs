//! Two-tier (short/long lived) read cache in front of report queries.
//!
//! Entries expire once more than the tier's ttl has passed since they were written. Each tier caps its
//! entry count; when full, expired entries go first, then the oldest writes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use mkpi_core::{CategoryId, MainReport, ProcessReport};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::repo::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Intraday reads that are recomputed every tick.
    Short,
    /// Snapshot and historical reads.
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl CachePolicy {
    pub const SHORT: CachePolicy = CachePolicy {
        ttl: Duration::from_secs(2 * 60),
        max_entries: 1000,
    };
    pub const LONG: CachePolicy = CachePolicy {
        ttl: Duration::from_secs(60 * 60),
        max_entries: 1000,
    };
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    written_at: Instant,
}

#[derive(Debug)]
struct Tier<K, V> {
    policy: CachePolicy,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Tier<K, V> {
    fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    fn is_live(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.written_at) <= self.policy.ttl
    }

    fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        let live = self.entries.get(key).map(|e| self.is_live(e, now))?;
        if live {
            self.entries.get(key).map(|e| e.value.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    fn put(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                written_at: now,
            },
        );
        if self.entries.len() <= self.policy.max_entries {
            return;
        }
        let ttl = self.policy.ttl;
        self.entries
            .retain(|_, e| now.duration_since(e.written_at) <= ttl);
        while self.entries.len() > self.policy.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.written_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug)]
pub struct TieredCache<K, V> {
    short: Mutex<Tier<K, V>>,
    long: Mutex<Tier<K, V>>,
    /// Bumped by every eviction, before entries are removed.
    generation: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TieredCache<K, V> {
    fn default() -> Self {
        Self::new(CachePolicy::SHORT, CachePolicy::LONG)
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TieredCache<K, V> {
    pub fn new(short: CachePolicy, long: CachePolicy) -> Self {
        Self {
            short: Mutex::new(Tier::new(short)),
            long: Mutex::new(Tier::new(long)),
            generation: AtomicU64::new(0),
        }
    }

    fn tier(&self, tier: CacheTier) -> &Mutex<Tier<K, V>> {
        match tier {
            CacheTier::Short => &self.short,
            CacheTier::Long => &self.long,
        }
    }

    /// Looks in the short tier first, then the long one.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(value) = self.short.lock().await.get(key, now) {
            return Some(value);
        }
        self.long.lock().await.get(key, now)
    }

    pub async fn put(&self, key: K, value: V, tier: CacheTier) {
        self.tier(tier).lock().await.put(key, value, Instant::now());
    }

    pub async fn evict(&self, key: &K) {
        self.bump_generation();
        self.short.lock().await.entries.remove(key);
        self.long.lock().await.entries.remove(key);
    }

    /// Evicts every key matching `predicate` from both tiers.
    pub async fn evict_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        self.bump_generation();
        let mut removed = 0usize;
        for tier in [&self.short, &self.long] {
            let mut tier = tier.lock().await;
            let before = tier.entries.len();
            tier.entries.retain(|k, _| !predicate(k));
            removed += before - tier.entries.len();
        }
        removed
    }

    pub async fn evict_all(&self, tier: CacheTier) {
        self.bump_generation();
        self.tier(tier).lock().await.entries.clear();
    }

    pub async fn clear(&self) {
        self.evict_all(CacheTier::Short).await;
        self.evict_all(CacheTier::Long).await;
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn len(&self, tier: CacheTier) -> usize {
        self.tier(tier).lock().await.entries.len()
    }

    /// Returns the cached value or stores the result of `compute` in `tier`.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached. A value computed
    /// while an eviction ran is returned but not cached, since it may predate the write
    /// that triggered the eviction.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, tier: CacheTier, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let value = compute().await?;
        let mut slot = self.tier(tier).lock().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            slot.put(key, value.clone(), Instant::now());
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessCacheKey {
    /// Newest report of the category for the given snapshot flag.
    Latest {
        category: CategoryId,
        snapshot: bool,
    },
    ById(Uuid),
    Range {
        category: CategoryId,
        range: DateRange,
        snapshot: bool,
    },
}

impl ProcessCacheKey {
    pub fn category(&self) -> Option<&CategoryId> {
        match self {
            ProcessCacheKey::Latest { category, .. } | ProcessCacheKey::Range { category, .. } => {
                Some(category)
            }
            ProcessCacheKey::ById(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MainCacheKey {
    Latest { snapshot: bool },
    ById(Uuid),
    Range { range: DateRange, snapshot: bool },
}

/// Caches for both report families; values are the rows a read returned.
#[derive(Debug, Default)]
pub struct ReportCaches {
    pub process: TieredCache<ProcessCacheKey, Vec<ProcessReport>>,
    pub main: TieredCache<MainCacheKey, Vec<MainReport>>,
}

impl ReportCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every process entry keyed by `category`.
    pub async fn invalidate_category(&self, category: &CategoryId) -> usize {
        self.process
            .evict_where(|key| key.category() == Some(category))
            .await
    }

    pub async fn invalidate_main(&self) {
        self.main.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test(start_paused = true)]
    async fn short_tier_expires_after_two_minutes() {
        let cache: TieredCache<&str, u32> = TieredCache::default();
        cache.put("live", 1, CacheTier::Short).await;
        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.get(&"live").await, Some(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"live").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn long_tier_survives_sixty_minutes() {
        let cache: TieredCache<&str, u32> = TieredCache::default();
        cache.put("history", 7, CacheTier::Long).await;
        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(cache.get(&"history").await, Some(7));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"history").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_drops_oldest_writes() {
        let policy = CachePolicy {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        };
        let cache: TieredCache<u32, u32> = TieredCache::new(policy, policy);
        for key in 0..3 {
            cache.put(key, key, CacheTier::Short).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len(CacheTier::Short).await, 2);
        assert_eq!(cache.get(&0).await, None);
        assert_eq!(cache.get(&2).await, Some(2));
    }

    #[tokio::test]
    async fn get_or_compute_only_computes_on_miss() {
        let cache: TieredCache<&str, u32> = TieredCache::default();
        let mut calls = 0;
        let first: Result<u32, ()> = cache
            .get_or_compute("k", CacheTier::Short, || {
                calls += 1;
                async { Ok(5) }
            })
            .await;
        assert_eq!(first, Ok(5));
        let second: Result<u32, ()> = cache
            .get_or_compute("k", CacheTier::Short, || async { Ok(9) })
            .await;
        assert_eq!(second, Ok(5));
        assert_eq!(calls, 1);

        let failed: Result<u32, &str> = cache
            .get_or_compute("err", CacheTier::Short, || async { Err("boom") })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get(&"err").await, None);
    }

    #[tokio::test]
    async fn value_computed_across_an_eviction_is_not_cached() {
        let cache: TieredCache<&str, u32> = TieredCache::default();
        let stale: Result<u32, ()> = cache
            .get_or_compute("k", CacheTier::Long, || async {
                cache.evict(&"k").await;
                Ok(1)
            })
            .await;
        assert_eq!(stale, Ok(1));
        assert_eq!(cache.get(&"k").await, None);

        let fresh: Result<u32, ()> = cache
            .get_or_compute("k", CacheTier::Long, || async { Ok(2) })
            .await;
        assert_eq!(fresh, Ok(2));
        assert_eq!(cache.get(&"k").await, Some(2));
    }

    #[tokio::test]
    async fn range_read_racing_a_category_write_is_recomputed() {
        let caches = ReportCaches::new();
        let assy = CategoryId::new("ASSY");
        let key = ProcessCacheKey::Range {
            category: assy.clone(),
            range: DateRange::day(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()),
            snapshot: true,
        };

        // The repository answered before the builder's save and eviction landed.
        let raced: Result<Vec<ProcessReport>, ()> = caches
            .process
            .get_or_compute(key.clone(), CacheTier::Long, || async {
                caches.invalidate_category(&assy).await;
                Ok(Vec::new())
            })
            .await;
        assert_eq!(raced, Ok(Vec::new()));
        assert!(caches.process.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn category_invalidation_leaves_other_keys() {
        let caches = ReportCaches::new();
        let assy = CategoryId::new("ASSY");
        let paint = CategoryId::new("PAINT");
        let day = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        caches
            .process
            .put(
                ProcessCacheKey::Latest {
                    category: assy.clone(),
                    snapshot: false,
                },
                vec![],
                CacheTier::Short,
            )
            .await;
        caches
            .process
            .put(
                ProcessCacheKey::Range {
                    category: assy.clone(),
                    range: DateRange::day(day),
                    snapshot: true,
                },
                vec![],
                CacheTier::Long,
            )
            .await;
        caches
            .process
            .put(
                ProcessCacheKey::Latest {
                    category: paint.clone(),
                    snapshot: false,
                },
                vec![],
                CacheTier::Short,
            )
            .await;
        caches
            .main
            .put(MainCacheKey::Latest { snapshot: false }, vec![], CacheTier::Short)
            .await;

        assert_eq!(caches.invalidate_category(&assy).await, 2);
        assert!(caches
            .process
            .get(&ProcessCacheKey::Latest {
                category: paint,
                snapshot: false,
            })
            .await
            .is_some());
        caches.invalidate_main().await;
        assert!(caches
            .main
            .get(&MainCacheKey::Latest { snapshot: false })
            .await
            .is_none());
    }
}
