//! DELTA counter accumulation keyed by descriptor name and series labels.

use crate::collector::sample::ConstMetric;
use crate::delta::series_key;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type Entry = Arc<Mutex<HashMap<u64, ConstMetric>>>;

/// In-memory store summing DELTA counter samples per series key.
///
/// The outer map resolves the descriptor entry; each entry carries its own
/// lock held for the whole check-then-merge, so increments for one series
/// are atomic while different descriptors proceed in parallel.
pub struct CounterStore {
    entries: DashMap<String, Entry>,
    ttl: TimeDelta,
}

impl CounterStore {
    /// Create a store whose entries stop being listed `ttl` after their
    /// last successful increment.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero()),
        }
    }

    /// Fold an incoming sample into the running total for its series.
    ///
    /// A fresh series is stored as-is; a newer report time adds onto the
    /// existing total; a stale or duplicate report time is dropped.
    pub fn increment(&self, descriptor_name: &str, incoming: ConstMetric) {
        self.increment_at(descriptor_name, incoming, Utc::now());
    }

    pub(crate) fn increment_at(
        &self,
        descriptor_name: &str,
        mut incoming: ConstMetric,
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
                    value = incoming.value,
                    incoming_time = %incoming.report_time,
                    "tracking new counter"
                );
                incoming.collection_time = now;
                collected.insert(key, incoming);
            },
            Some(existing) if existing.report_time < incoming.report_time => {
                tracing::debug!(
                    fq_name = %incoming.fq_name,
                    key,
                    current_value = existing.value,
                    adding = incoming.value,
                    last_reported_time = %existing.report_time,
                    incoming_time = %incoming.report_time,
                    "incrementing existing counter"
                );
                incoming.value += existing.value;
                incoming.collection_time = now;
                collected.insert(key, incoming);
            },
            Some(existing) => {
                tracing::debug!(
                    fq_name = %incoming.fq_name,
                    key,
                    last_reported_time = %existing.report_time,
                    incoming_time = %incoming.report_time,
                    "ignoring old sample for counter"
                );
            },
        }
    }

    /// Copy out every live entry for a descriptor, evicting entries whose
    /// last collection fell outside the TTL window.
    pub fn list(&self, descriptor_name: &str) -> Vec<ConstMetric> {
        self.list_at(descriptor_name, Utc::now())
    }

    pub(crate) fn list_at(&self, descriptor_name: &str, now: DateTime<Utc>) -> Vec<ConstMetric> {
        let Some(entry) = self
            .entries
            .get(descriptor_name)
            .map(|e| Arc::clone(e.value()))
        else {
            return Vec::new();
        };

        let window_start = now - self.ttl;
        let mut collected = entry.lock();
        collected.retain(|key, metric| {
            if metric.collection_time < window_start {
                tracing::debug!(key, fq_name = %metric.fq_name, "deleting counter entry outside of TTL");
                false
            } else {
                true
            }
        });
        collected.values().cloned().collect()
    }
}
