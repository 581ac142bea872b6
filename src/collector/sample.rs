//! Emitter-side records: translated samples, cumulative bucket maps, and
//! the channel-backed sink the engine writes into.

use crate::collector::dedup::Deduplicator;
use crate::hash;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Prometheus family a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    Gauge,
    Counter,
    Histogram,
}

/// Cumulative histogram buckets, ordered by upper bound.
///
/// Bounds are `f64` (including `+inf`), which rules out a plain map key, so
/// the pairs live in a vector kept sorted with `total_cmp`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buckets(Vec<(f64, u64)>);

impl Buckets {
    /// Create an empty bucket map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative count at an exact upper bound.
    pub fn get(&self, bound: f64) -> Option<u64> {
        self.0
            .binary_search_by(|(b, _)| b.total_cmp(&bound))
            .ok()
            .map(|idx| self.0[idx].1)
    }

    /// Set the cumulative count for a bound, replacing any existing value.
    pub fn set(&mut self, bound: f64, count: u64) {
        match self.0.binary_search_by(|(b, _)| b.total_cmp(&bound)) {
            Ok(idx) => self.0[idx].1 = count,
            Err(idx) => self.0.insert(idx, (bound, count)),
        }
    }

    /// Add `count` onto the bound's cumulative count (missing bound counts
    /// as zero).
    pub fn add(&mut self, bound: f64, count: u64) {
        match self.0.binary_search_by(|(b, _)| b.total_cmp(&bound)) {
            Ok(idx) => self.0[idx].1 += count,
            Err(idx) => self.0.insert(idx, (bound, count)),
        }
    }

    /// Bucket-wise merge of another map into this one.
    pub fn merge(&mut self, other: &Buckets) {
        for (bound, count) in other.iter() {
            self.add(bound, count);
        }
    }

    /// Iterate `(upper_bound, cumulative_count)` in bound order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.0.iter().copied()
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no buckets are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(f64, u64)> for Buckets {
    fn from_iter<I: IntoIterator<Item = (f64, u64)>>(iter: I) -> Self {
        let mut buckets = Buckets::new();
        for (bound, count) in iter {
            buckets.set(bound, count);
        }
        buckets
    }
}

/// A single translated gauge or counter sample.
#[derive(Debug, Clone)]
pub struct ConstMetric {
    pub fq_name: String,
    pub label_keys: Vec<String>,
    pub label_values: Vec<String>,
    /// `Gauge` or `Counter`; never `Histogram`.
    pub family: FamilyKind,
    pub value: f64,
    /// End time of the source point; becomes the exposed sample timestamp.
    pub report_time: DateTime<Utc>,
    /// When the bridge last saw this record (drives delta-store TTLs).
    pub collection_time: DateTime<Utc>,
    /// Hash over the sorted label keys, for schema-skew detection.
    pub keys_hash: u64,
}

/// A single translated histogram sample.
#[derive(Debug, Clone)]
pub struct HistogramMetric {
    pub fq_name: String,
    pub label_keys: Vec<String>,
    pub label_values: Vec<String>,
    pub sum: f64,
    pub count: u64,
    pub buckets: Buckets,
    pub report_time: DateTime<Utc>,
    pub collection_time: DateTime<Utc>,
    pub keys_hash: u64,
}

impl HistogramMetric {
    /// Merge an earlier accumulation into this sample: totals add, buckets
    /// merge bucket-wise.
    pub fn merge(&mut self, other: &HistogramMetric) {
        self.sum += other.sum;
        self.count += other.count;
        self.buckets.merge(&other.buckets);
    }
}

/// Hash over the sorted label keys of a record.
pub fn hash_label_keys(label_keys: &[String]) -> u64 {
    let mut sorted: Vec<&String> = label_keys.iter().collect();
    sorted.sort();
    let mut h = hash::new();
    for key in sorted {
        h = hash::add(h, key);
        h = hash::add_byte(h, hash::SEPARATOR_BYTE);
    }
    h
}

/// A record on its way to the exposition layer, with the help text of the
/// descriptor it came from.
#[derive(Debug, Clone)]
pub enum Emitted {
    Const { help: String, metric: ConstMetric },
    Histogram { help: String, metric: HistogramMetric },
}

/// Channel-backed sink with duplicate suppression at the emission point.
#[derive(Clone)]
pub struct MetricSink {
    tx: mpsc::UnboundedSender<Emitted>,
    dedup: Arc<Deduplicator>,
}

impl MetricSink {
    /// Wrap a channel and a per-scrape deduplicator.
    pub fn new(tx: mpsc::UnboundedSender<Emitted>, dedup: Arc<Deduplicator>) -> Self {
        Self { tx, dedup }
    }

    /// Emit a gauge/counter record unless it duplicates one already sent.
    pub fn emit_const(&self, help: &str, metric: ConstMetric) {
        if self.dedup.check_and_mark(
            &metric.fq_name,
            &metric.label_keys,
            &metric.label_values,
            metric.report_time,
        ) {
            return;
        }
        let _ = self.tx.send(Emitted::Const {
            help: help.to_string(),
            metric,
        });
    }

    /// Emit a histogram record unless it duplicates one already sent.
    pub fn emit_histogram(&self, help: &str, metric: HistogramMetric) {
        if self.dedup.check_and_mark(
            &metric.fq_name,
            &metric.label_keys,
            &metric.label_values,
            metric.report_time,
        ) {
            return;
        }
        let _ = self.tx.send(Emitted::Histogram {
            help: help.to_string(),
            metric,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_keep_bound_order() {
        let mut buckets = Buckets::new();
        buckets.set(10.0, 5);
        buckets.set(1.0, 2);
        buckets.set(f64::INFINITY, 6);
        let bounds: Vec<f64> = buckets.iter().map(|(b, _)| b).collect();
        assert_eq!(bounds, vec![1.0, 10.0, f64::INFINITY]);
        assert_eq!(buckets.get(10.0), Some(5));
        assert_eq!(buckets.get(2.0), None);
    }

    #[test]
    fn histogram_merge_adds_totals_and_buckets() {
        let mut current = HistogramMetric {
            fq_name: "m".into(),
            label_keys: vec![],
            label_values: vec![],
            sum: 10.0,
            count: 4,
            buckets: [(1.0, 2), (f64::INFINITY, 4)].into_iter().collect(),
            report_time: Utc::now(),
            collection_time: Utc::now(),
            keys_hash: 0,
        };
        let earlier = HistogramMetric {
            sum: 5.0,
            count: 2,
            buckets: [(1.0, 1), (5.0, 2), (f64::INFINITY, 2)].into_iter().collect(),
            ..current.clone()
        };
        current.merge(&earlier);
        assert_eq!(current.sum, 15.0);
        assert_eq!(current.count, 6);
        assert_eq!(current.buckets.get(1.0), Some(3));
        assert_eq!(current.buckets.get(5.0), Some(2));
        assert_eq!(current.buckets.get(f64::INFINITY), Some(6));
    }

    #[test]
    fn merging_empty_histogram_is_identity() {
        let mut current = HistogramMetric {
            fq_name: "m".into(),
            label_keys: vec![],
            label_values: vec![],
            sum: 10.0,
            count: 4,
            buckets: [(1.0, 2), (f64::INFINITY, 4)].into_iter().collect(),
            report_time: Utc::now(),
            collection_time: Utc::now(),
            keys_hash: 0,
        };
        let before = current.clone();
        let empty = HistogramMetric {
            sum: 0.0,
            count: 0,
            buckets: Buckets::new(),
            ..current.clone()
        };
        current.merge(&empty);
        assert_eq!(current.sum, before.sum);
        assert_eq!(current.count, before.count);
        assert_eq!(current.buckets, before.buckets);
    }

    #[test]
    fn keys_hash_ignores_order() {
        let a = hash_label_keys(&["b".into(), "a".into()]);
        let b = hash_label_keys(&["a".into(), "b".into()]);
        assert_eq!(a, b);
        let c = hash_label_keys(&["a".into(), "c".into()]);
        assert_ne!(a, c);
    }
}
