//! DELTA histogram accumulation keyed by descriptor name and series labels.

use crate::collector::sample::HistogramMetric;
use crate::delta::series_key;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type Entry = Arc<Mutex<HashMap<u64, HistogramMetric>>>;

/// In-memory store merging DELTA histogram samples per series key.
///
/// Same locking shape as the counter store: the outer map resolves the
/// descriptor entry, the per-entry lock covers the check-then-merge.
pub struct HistogramStore {
    entries: DashMap<String, Entry>,
    ttl: TimeDelta,
}

impl HistogramStore {
    /// Create a store whose entries stop being listed `ttl` after their
    /// last successful increment.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero()),
        }
    }

    /// Fold an incoming histogram into the accumulated series: sums and
    /// counts add, buckets merge bucket-wise. Stale report times are
    /// dropped.
    pub fn increment(&self, descriptor_name: &str, incoming: HistogramMetric) {
        self.increment_at(descriptor_name, incoming, Utc::now());
    }

    pub(crate) fn increment_at(
        &self,
        descriptor_name: &str,
        mut incoming: HistogramMetric,
        now: DateTime<Utc>,
    ) {
        let entry = Arc::clone(
            self.entries
                .entry(descriptor_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
                .value(),
        );

        let key = series_key(&incoming.fq_name, &incoming.label_keys, &incoming.label_values);
        let mut collected = entry.lock();
        match collected.get(&key) {
            None => {
                tracing::debug!(
                    fq_name = %incoming.fq_name,
                    key,
                    incoming_time = %incoming.report_time,
                    "tracking new histogram"
                );
                incoming.collection_time = now;
                collected.insert(key, incoming);
            },
            Some(existing) if existing.report_time < incoming.report_time => {
                tracing::debug!(
                    fq_name = %incoming.fq_name,
                    key,
                    last_reported_time = %existing.report_time,
                    incoming_time = %incoming.report_time,
                    "incrementing existing histogram"
                );
                incoming.merge(existing);
                incoming.collection_time = now;
                collected.insert(key, incoming);
            },
            Some(existing) => {
                tracing::debug!(
                    fq_name = %incoming.fq_name,
                    key,
                    last_reported_time = %existing.report_time,
                    incoming_time = %incoming.report_time,
                    "ignoring old sample for histogram"
                );
            },
        }
    }

    /// Copy out every live entry for a descriptor, evicting entries whose
    /// last collection fell outside the TTL window.
    pub fn list(&self, descriptor_name: &str) -> Vec<HistogramMetric> {
        self.list_at(descriptor_name, Utc::now())
    }

    pub(crate) fn list_at(
        &self,
        descriptor_name: &str,
        now: DateTime<Utc>,
    ) -> Vec<HistogramMetric> {
        let Some(entry) = self
            .entries
            .get(descriptor_name)
            .map(|e| Arc::clone(e.value()))
        else {
            return Vec::new();
        };

        let window_start = now - self.ttl;
        let mut collected = entry.lock();
        collected.retain(|key, histogram| {
            if histogram.collection_time < window_start {
                tracing::debug!(key, fq_name = %histogram.fq_name, "deleting histogram entry outside of TTL");
                false
            } else {
                true
            }
        });
        collected.values().cloned().collect()
    }
}
