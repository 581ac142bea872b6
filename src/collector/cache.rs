//! Cache of constructed collection engines between scrapes.
//!
//! Engines carry descriptor caches and delta-store state, so rebuilding one
//! per scrape would throw that state away. Entries live under a sliding
//! idle TTL: every hit pushes the expiry out, and a background sweep drops
//! engines nobody scraped for a while.

use crate::collector::engine::CollectionEngine;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

// Floor applied when neither delta aggregation nor descriptor caching asks
// for a longer lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

struct CachedEngine {
    engine: Arc<CollectionEngine>,
    expires_at: Instant,
}

/// Keyed store of engines with sliding expiry.
pub struct CollectorCache {
    entries: DashMap<String, CachedEngine>,
    ttl: Duration,
}

impl CollectorCache {
    /// Create the cache and start its periodic sweeper.
    pub fn new(ttl: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            entries: DashMap::new(),
            ttl,
        });

        let weak: Weak<Self> = Arc::downgrade(&cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        });

        cache
    }

    /// Engine cache TTL derived from the feature TTLs: the longest state
    /// lifetime wins, with a floor when neither feature is on.
    pub fn collector_ttl(
        aggregate_deltas: bool,
        aggregate_deltas_ttl: Duration,
        descriptor_cache_ttl: Duration,
    ) -> Duration {
        if aggregate_deltas || !descriptor_cache_ttl.is_zero() {
            aggregate_deltas_ttl.max(descriptor_cache_ttl)
        } else {
            DEFAULT_TTL
        }
    }

    /// Cache key for a (project, prefix-set) pair.
    pub fn key(project_id: &str, prefixes: &[String]) -> String {
        let mut sorted = prefixes.to_vec();
        sorted.sort();
        format!("{project_id}-{}", sorted.join(","))
    }

    /// Fetch a live engine, extending its expiry. Expired entries are
    /// removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Arc<CollectionEngine>> {
        let now = Instant::now();
        let mut expired = false;
        let engine = match self.entries.get_mut(key) {
            Some(mut cached) => {
                if cached.expires_at > now {
                    cached.expires_at = now + self.ttl;
                    Some(Arc::clone(&cached.engine))
                } else {
                    expired = true;
                    None
                }
            },
            None => None,
        };
        // Removal happens after the shard guard above is released.
        if expired {
            self.entries.remove(key);
        }
        engine
    }

    /// Insert an engine under a key.
    pub fn store(&self, key: &str, engine: Arc<CollectionEngine>) {
        self.entries.insert(
            key.to_string(),
            CachedEngine {
                engine,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Number of cached engines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no engines are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired collection engines");
        }
    }
}
