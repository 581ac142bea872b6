//! Duplicate-sample suppression within a single scrape.
//!
//! Concurrent producers can translate the same series twice: two projects
//! reporting one delegated series, or two descriptors collapsing onto one
//! name. Prometheus rejects duplicate (name, labels, timestamp) triples, so
//! every record passes a signature check before emission.

use crate::hash;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntCounter, Opts};
use std::collections::HashSet;

/// Tracks signatures of records already emitted during the current scrape.
pub struct Deduplicator {
    seen: Mutex<HashSet<u64>>,
    checks_total: IntCounter,
    duplicates_total: IntCounter,
    unique_metrics: Gauge,
}

impl Deduplicator {
    /// Create a deduplicator with its self-metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let checks_total = IntCounter::with_opts(
            Opts::new(
                "checks_total",
                "Total number of deduplication checks performed.",
            )
            .namespace("stackdriver")
            .subsystem("deduplicator"),
        )?;
        let duplicates_total = IntCounter::with_opts(
            Opts::new(
                "duplicates_total",
                "Total number of duplicate metrics detected and dropped.",
            )
            .namespace("stackdriver")
            .subsystem("deduplicator"),
        )?;
        let unique_metrics = Gauge::with_opts(
            Opts::new(
                "unique_metrics",
                "Current number of unique metrics being tracked.",
            )
            .namespace("stackdriver")
            .subsystem("deduplicator"),
        )?;

        Ok(Self {
            seen: Mutex::new(HashSet::new()),
            checks_total,
            duplicates_total,
            unique_metrics,
        })
    }

    /// Clear the signature set at the start of a scrape. The counters keep
    /// accumulating across scrapes.
    pub fn reset(&self) {
        self.seen.lock().clear();
        self.unique_metrics.set(0.0);
    }

    /// Check whether a record was already emitted this scrape; if not, mark
    /// it as emitted. Returns `true` for a duplicate.
    pub fn check_and_mark(
        &self,
        fq_name: &str,
        label_keys: &[String],
        label_values: &[String],
        timestamp: DateTime<Utc>,
    ) -> bool {
        self.checks_total.inc();
        let signature = signature(fq_name, label_keys, label_values, timestamp);

        let mut seen = self.seen.lock();
        if seen.contains(&signature) {
            self.duplicates_total.inc();
            tracing::debug!(
                metric = fq_name,
                timestamp = %timestamp,
                signature,
                "duplicate metric detected"
            );
            return true;
        }
        seen.insert(signature);
        self.unique_metrics.set(seen.len() as f64);
        false
    }

    /// Snapshot of (duplicates detected, unique records tracked).
    pub fn stats(&self) -> (u64, usize) {
        (self.duplicates_total.get(), self.seen.lock().len())
    }

    /// Export the deduplicator self-metrics as metric families.
    pub fn export(&self) -> Vec<MetricFamily> {
        let mut families = self.checks_total.collect();
        families.extend(self.duplicates_total.collect());
        families.extend(self.unique_metrics.collect());
        families
    }
}

/// Signature over name, order-independent labels, and timestamp.
fn signature(
    fq_name: &str,
    label_keys: &[String],
    label_values: &[String],
    timestamp: DateTime<Utc>,
) -> u64 {
    let mut h = hash::new();
    h = hash::add(h, fq_name);
    h = hash::add_byte(h, hash::SEPARATOR_BYTE);

    // Order of appearance must not matter, so pairs hash in key order.
    let mut indices: Vec<usize> = (0..label_keys.len()).collect();
    indices.sort_by(|&a, &b| label_keys[a].cmp(&label_keys[b]));

    for idx in indices {
        h = hash::add(h, &label_keys[idx]);
        h = hash::add_byte(h, hash::SEPARATOR_BYTE);
        if let Some(value) = label_values.get(idx) {
            h = hash::add(h, value);
        }
        h = hash::add_byte(h, hash::SEPARATOR_BYTE);
    }

    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
    hash::add_uint64(h, nanos as u64)
}
