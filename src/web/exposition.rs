//! Assembly of emitted records into Prometheus metric families and text
//! encoding of the scrape response.
//!
//! Translated records arrive as loose samples; the text format wants them
//! grouped per family with a single TYPE line. Families are built in
//! first-seen order, and records whose family kind conflicts with an
//! earlier record of the same name are dropped rather than corrupting the
//! family.

use crate::collector::sample::{ConstMetric, Emitted, FamilyKind, HistogramMetric};
use crate::core::Result;
use prometheus::proto::{
    Bucket, Counter, Gauge, Histogram, LabelPair, Metric, MetricFamily, MetricType,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;

/// Content type of the text exposition format.
pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

struct FamilyBuilder {
    help: String,
    kind: FamilyKind,
    metrics: Vec<Metric>,
}

/// Group emitted records into metric families, first-seen order.
pub fn build_families(records: Vec<Emitted>) -> Vec<MetricFamily> {
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, FamilyBuilder> = HashMap::new();

    for record in records {
        let (name, help, kind) = match &record {
            Emitted::Const { help, metric } => (metric.fq_name.clone(), help.clone(), metric.family),
            Emitted::Histogram { help, metric } => {
                (metric.fq_name.clone(), help.clone(), FamilyKind::Histogram)
            },
        };

        let builder = builders.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            FamilyBuilder {
                help,
                kind,
                metrics: Vec::new(),
            }
        });
        if builder.kind != kind {
            tracing::debug!(
                metric = %name,
                expected = ?builder.kind,
                got = ?kind,
                "dropping record with conflicting family kind"
            );
            continue;
        }

        match record {
            Emitted::Const { metric, .. } => builder.metrics.push(const_proto(&metric)),
            Emitted::Histogram { metric, .. } => builder.metrics.push(histogram_proto(&metric)),
        }
    }

    order
        .into_iter()
        .filter_map(|name| builders.remove(&name).map(|builder| (name, builder)))
        .map(|(name, builder)| {
            let mut family = MetricFamily::default();
            family.set_name(name);
            family.set_help(builder.help);
            family.set_field_type(match builder.kind {
                FamilyKind::Gauge => MetricType::GAUGE,
                FamilyKind::Counter => MetricType::COUNTER,
                FamilyKind::Histogram => MetricType::HISTOGRAM,
            });
            family.set_metric(builder.metrics);
            family
        })
        .collect()
}

fn const_proto(metric: &ConstMetric) -> Metric {
    let mut proto = Metric::default();
    proto.set_label(label_pairs(&metric.label_keys, &metric.label_values));
    match metric.family {
        FamilyKind::Counter => {
            let mut counter = Counter::default();
            counter.set_value(metric.value);
            proto.set_counter(counter);
        },
        _ => {
            let mut gauge = Gauge::default();
            gauge.set_value(metric.value);
            proto.set_gauge(gauge);
        },
    }
    proto.set_timestamp_ms(metric.report_time.timestamp_millis());
    proto
}

fn histogram_proto(metric: &HistogramMetric) -> Metric {
    let mut proto = Metric::default();
    proto.set_label(label_pairs(&metric.label_keys, &metric.label_values));

    let mut histogram = Histogram::default();
    histogram.set_sample_count(metric.count);
    histogram.set_sample_sum(metric.sum);
    let mut buckets = Vec::with_capacity(metric.buckets.len());
    for (upper_bound, cumulative_count) in metric.buckets.iter() {
        let mut bucket = Bucket::default();
        bucket.set_upper_bound(upper_bound);
        bucket.set_cumulative_count(cumulative_count);
        buckets.push(bucket);
    }
    histogram.set_bucket(buckets);
    proto.set_histogram(histogram);
    proto.set_timestamp_ms(metric.report_time.timestamp_millis());
    proto
}

fn label_pairs(keys: &[String], values: &[String]) -> Vec<LabelPair> {
    keys.iter()
        .zip(values.iter())
        .map(|(key, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(key.clone());
            pair.set_value(value.clone());
            pair
        })
        .collect()
}

/// Merge families sharing a name into one, keeping the first family's
/// metadata. Self-metric families from several engines arrive with the same
/// names but distinct `project_id` labels.
pub fn merge_families(families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let mut merged: Vec<MetricFamily> = Vec::new();
    for mut family in families {
        if let Some(existing) = merged.iter_mut().find(|f| f.name() == family.name()) {
            existing.mut_metric().extend(family.take_metric());
        } else {
            merged.push(family);
        }
    }
    merged
}

/// Encode families into the text exposition format.
pub fn encode_text(families: &[MetricFamily]) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
