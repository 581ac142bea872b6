//! Per-descriptor translation of source time series into emitter records.
//!
//! One translator lives for one descriptor within one scrape. It maps
//! source metric kinds onto Prometheus families, merges metric and resource
//! labels under a leading `unit` label, routes DELTA samples into the
//! accumulation stores, and buffers records when label-schema skew inside a
//! name has to be reconciled before emission.

use crate::collector::buckets::histogram_buckets;
use crate::collector::sample::{
    ConstMetric, FamilyKind, HistogramMetric, MetricSink, hash_label_keys,
};
use crate::delta::{CounterStore, HistogramStore};
use crate::gcp::types::{Distribution, MetricDescriptor, MetricKind, TimeSeries, ValueType};
use crate::names::build_fq_name;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};

/// Behavior switches shared by every translator in a scrape.
#[derive(Debug, Clone, Copy)]
pub struct TranslatorOptions {
    /// Buffer records and pad label sets so every record under one name
    /// exposes the same dimensions.
    pub fill_missing_labels: bool,
    /// Route DELTA samples through the accumulation stores.
    pub aggregate_deltas: bool,
    /// Skip series whose `project_id` label names another project.
    pub drop_delegated_projects: bool,
}

/// Accumulates translated records for a single descriptor and forwards them
/// to the sink.
pub struct TimeSeriesTranslator<'a> {
    descriptor: &'a MetricDescriptor,
    project_id: &'a str,
    sink: &'a MetricSink,
    options: TranslatorOptions,
    counter_store: &'a CounterStore,
    histogram_store: &'a HistogramStore,
    const_pending: HashMap<String, Vec<ConstMetric>>,
    histogram_pending: HashMap<String, Vec<HistogramMetric>>,
}

impl<'a> TimeSeriesTranslator<'a> {
    /// Create a translator for one descriptor within one scrape.
    pub fn new(
        descriptor: &'a MetricDescriptor,
        project_id: &'a str,
        sink: &'a MetricSink,
        options: TranslatorOptions,
        counter_store: &'a CounterStore,
        histogram_store: &'a HistogramStore,
    ) -> Self {
        Self {
            descriptor,
            project_id,
            sink,
            options,
            counter_store,
            histogram_store,
            const_pending: HashMap::new(),
            histogram_pending: HashMap::new(),
        }
    }

    /// Translate one series, keeping only its latest point.
    ///
    /// Malformed and unsupported series are skipped with a debug log; a
    /// scrape never fails because of a single series.
    pub fn translate(&mut self, series: &TimeSeries) {
        let Some((report_time, point_value)) = newest_point(series) else {
            return;
        };

        let (label_keys, label_values) = self.merge_labels(series);

        if self.options.drop_delegated_projects {
            let delegated = label_keys
                .iter()
                .zip(label_values.iter())
                .any(|(key, value)| key == "project_id" && value != self.project_id);
            if delegated {
                return;
            }
        }

        let family = match series.metric_kind {
            MetricKind::Gauge => FamilyKind::Gauge,
            MetricKind::Delta if self.options.aggregate_deltas => FamilyKind::Counter,
            MetricKind::Delta => FamilyKind::Gauge,
            MetricKind::Cumulative => FamilyKind::Counter,
            MetricKind::Unspecified => {
                tracing::debug!(
                    metric = %series.metric.metric_type,
                    "discarding series with unspecified metric kind"
                );
                return;
            },
        };

        let value = match series.value_type {
            ValueType::Bool => match point_value.bool_value {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => return,
            },
            ValueType::Int64 => match point_value.int64_value {
                Some(v) => v as f64,
                None => return,
            },
            ValueType::Double => match point_value.double_value {
                Some(v) => v,
                None => return,
            },
            ValueType::Distribution => {
                let Some(dist) = &point_value.distribution_value else {
                    return;
                };
                match histogram_buckets(dist) {
                    Ok(buckets) => self.collect_histogram(
                        series,
                        report_time,
                        label_keys,
                        dist,
                        buckets,
                        label_values,
                        series.metric_kind,
                    ),
                    Err(err) => tracing::debug!(
                        resource = %series.resource.resource_type,
                        metric = %series.metric.metric_type,
                        error = %err,
                        "discarding distribution"
                    ),
                }
                return;
            },
            ValueType::String | ValueType::Money | ValueType::Unspecified => {
                tracing::debug!(
                    value_type = ?series.value_type,
                    metric = %series.metric.metric_type,
                    "discarding series with unsupported value type"
                );
                return;
            },
        };

        self.collect_const(
            series,
            report_time,
            label_keys,
            family,
            value,
            label_values,
            series.metric_kind,
        );
    }

    /// Record a gauge/counter sample: into the delta store for aggregated
    /// DELTA kinds, into the pending buffer when label filling is on,
    /// otherwise straight to the sink.
    #[allow(clippy::too_many_arguments)]
    pub fn collect_const(
        &mut self,
        series: &TimeSeries,
        report_time: DateTime<Utc>,
        label_keys: Vec<String>,
        family: FamilyKind,
        value: f64,
        label_values: Vec<String>,
        metric_kind: MetricKind,
    ) {
        let fq_name = build_fq_name(&series.resource.resource_type, &series.metric.metric_type);
        let keys_hash = hash_label_keys(&label_keys);
        let metric = ConstMetric {
            fq_name: fq_name.clone(),
            label_keys,
            label_values,
            family,
            value,
            report_time,
            collection_time: Utc::now(),
            keys_hash,
        };

        if metric_kind == MetricKind::Delta && self.options.aggregate_deltas {
            self.counter_store.increment(&self.descriptor.name, metric);
            return;
        }

        if self.options.fill_missing_labels {
            self.const_pending.entry(fq_name).or_default().push(metric);
            return;
        }

        self.sink.emit_const(&self.descriptor.description, metric);
    }

    /// Record a histogram sample; routing mirrors `collect_const`.
    #[allow(clippy::too_many_arguments)]
    pub fn collect_histogram(
        &mut self,
        series: &TimeSeries,
        report_time: DateTime<Utc>,
        label_keys: Vec<String>,
        dist: &Distribution,
        buckets: crate::collector::sample::Buckets,
        label_values: Vec<String>,
        metric_kind: MetricKind,
    ) {
        let fq_name = build_fq_name(&series.resource.resource_type, &series.metric.metric_type);
        let keys_hash = hash_label_keys(&label_keys);
        let metric = HistogramMetric {
            fq_name: fq_name.clone(),
            label_keys,
            label_values,
            sum: dist.mean * dist.count as f64,
            count: u64::try_from(dist.count).unwrap_or(0),
            buckets,
            report_time,
            collection_time: Utc::now(),
            keys_hash,
        };

        if metric_kind == MetricKind::Delta && self.options.aggregate_deltas {
            self.histogram_store.increment(&self.descriptor.name, metric);
            return;
        }

        if self.options.fill_missing_labels {
            self.histogram_pending.entry(fq_name).or_default().push(metric);
            return;
        }

        self.sink.emit_histogram(&self.descriptor.description, metric);
    }

    /// Flush accumulated DELTA entries and the pending buffers.
    ///
    /// `scrape_start` marks the beginning of the current scrape: store
    /// entries untouched since then get a synthesized report time so the
    /// scraper does not mark them stale.
    pub fn complete(&mut self, scrape_start: DateTime<Utc>) {
        self.complete_delta_const(scrape_start);
        self.complete_delta_histograms(scrape_start);

        for (_, records) in std::mem::take(&mut self.const_pending) {
            self.emit_const_group(records);
        }
        for (_, records) in std::mem::take(&mut self.histogram_pending) {
            self.emit_histogram_group(records);
        }
    }

    fn complete_delta_const(&mut self, scrape_start: DateTime<Utc>) {
        let collected = self.counter_store.list(&self.descriptor.name);
        if collected.is_empty() {
            return;
        }
        let now = truncate_to_minute(Utc::now());

        let mut groups: HashMap<String, Vec<ConstMetric>> = HashMap::new();
        for mut metric in collected {
            if metric.collection_time < scrape_start {
                // Not refreshed this scrape: re-export at the minute-aligned
                // point the source would have reported next. The descriptor's
                // samplePeriod would be more precise but is optional.
                let lag = truncate_delta_to_minute(metric.collection_time - metric.report_time);
                metric.report_time = now - lag;
            }
            if self.options.fill_missing_labels {
                groups.entry(metric.fq_name.clone()).or_default().push(metric);
            } else {
                self.sink.emit_const(&self.descriptor.description, metric);
            }
        }
        for (_, records) in groups {
            self.emit_const_group(records);
        }
    }

    fn complete_delta_histograms(&mut self, scrape_start: DateTime<Utc>) {
        let collected = self.histogram_store.list(&self.descriptor.name);
        if collected.is_empty() {
            return;
        }
        let now = truncate_to_minute(Utc::now());

        let mut groups: HashMap<String, Vec<HistogramMetric>> = HashMap::new();
        for mut metric in collected {
            if metric.collection_time < scrape_start {
                let lag = truncate_delta_to_minute(metric.collection_time - metric.report_time);
                metric.report_time = now - lag;
            }
            if self.options.fill_missing_labels {
                groups.entry(metric.fq_name.clone()).or_default().push(metric);
            } else {
                self.sink.emit_histogram(&self.descriptor.description, metric);
            }
        }
        for (_, records) in groups {
            self.emit_histogram_group(records);
        }
    }

    fn emit_const_group(&self, mut records: Vec<ConstMetric>) {
        if needs_fill(&records) {
            fill_labels(&mut records);
        }
        for metric in records {
            self.sink.emit_const(&self.descriptor.description, metric);
        }
    }

    fn emit_histogram_group(&self, mut records: Vec<HistogramMetric>) {
        if needs_fill(&records) {
            fill_labels(&mut records);
        }
        for metric in records {
            self.sink.emit_histogram(&self.descriptor.description, metric);
        }
    }

    /// Merge labels for one series: `unit` first, then metric labels, then
    /// resource labels, keeping the first occurrence of a duplicate key.
    fn merge_labels(&self, series: &TimeSeries) -> (Vec<String>, Vec<String>) {
        let mut label_keys = vec!["unit".to_string()];
        let mut label_values = vec![self.descriptor.unit.clone()];
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert("unit");

        for (key, value) in series.metric.labels.iter().chain(series.resource.labels.iter()) {
            if !seen.insert(key.as_str()) {
                continue;
            }
            label_keys.push(key.clone());
            label_values.push(value.clone());
        }
        (label_keys, label_values)
    }
}

/// Records sharing a name that disagree on label keys need padding.
trait LabeledRecord {
    fn keys_hash(&self) -> u64;
    fn label_keys(&self) -> &[String];
    fn push_label(&mut self, key: String, value: String);
}

impl LabeledRecord for ConstMetric {
    fn keys_hash(&self) -> u64 {
        self.keys_hash
    }

    fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    fn push_label(&mut self, key: String, value: String) {
        self.label_keys.push(key);
        self.label_values.push(value);
    }
}

impl LabeledRecord for HistogramMetric {
    fn keys_hash(&self) -> u64 {
        self.keys_hash
    }

    fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    fn push_label(&mut self, key: String, value: String) {
        self.label_keys.push(key);
        self.label_values.push(value);
    }
}

fn needs_fill<T: LabeledRecord>(records: &[T]) -> bool {
    records.len() > 1
        && records
            .iter()
            .any(|record| record.keys_hash() != records[0].keys_hash())
}

/// Pad every record with the union of label keys, empty values for the
/// missing dimensions.
fn fill_labels<T: LabeledRecord>(records: &mut [T]) {
    let mut all_keys: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for record in records.iter() {
        for key in record.label_keys() {
            if seen.insert(key.clone()) {
                all_keys.push(key.clone());
            }
        }
    }

    for record in records.iter_mut() {
        if record.label_keys().len() == all_keys.len() {
            continue;
        }
        let present: HashSet<String> = record.label_keys().iter().cloned().collect();
        for key in &all_keys {
            if !present.contains(key) {
                record.push_label(key.clone(), String::new());
            }
        }
    }
}

/// Pick the point with the latest end time. `None` when the series has no
/// points or a timestamp fails to parse.
fn newest_point(series: &TimeSeries) -> Option<(DateTime<Utc>, &crate::gcp::types::TypedValue)> {
    let mut newest: Option<(DateTime<Utc>, &crate::gcp::types::TypedValue)> = None;
    for point in &series.points {
        let end_time = match DateTime::parse_from_rfc3339(&point.interval.end_time) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(err) => {
                tracing::debug!(
                    metric = %series.metric.metric_type,
                    end_time = %point.interval.end_time,
                    error = %err,
                    "skipping series with malformed point interval"
                );
                return None;
            },
        };
        match newest {
            Some((current, _)) if current >= end_time => {},
            _ => newest = Some((end_time, &point.value)),
        }
    }
    newest
}

/// Truncate a timestamp down to the whole minute.
pub(crate) fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(t)
}

/// Truncate a duration toward zero to whole minutes.
fn truncate_delta_to_minute(d: TimeDelta) -> TimeDelta {
    TimeDelta::minutes(d.num_minutes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::dedup::Deduplicator;
    use crate::collector::sample::Emitted;
    use crate::gcp::types::{Metric, MonitoredResource, Point, TimeInterval, TypedValue};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn descriptor(kind: MetricKind, value_type: ValueType) -> MetricDescriptor {
        MetricDescriptor {
            name: "projects/p/metricDescriptors/vendor.x/cpu/util".into(),
            metric_type: "vendor.x/cpu/util".into(),
            unit: "1".into(),
            description: "CPU utilization".into(),
            metric_kind: kind,
            value_type,
            metadata: None,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn gauge_series(value: f64, end_time: &str) -> TimeSeries {
        TimeSeries {
            metric: Metric {
                metric_type: "vendor.x/cpu/util".into(),
                labels: labels(&[("instance_id", "i-1")]),
            },
            resource: MonitoredResource {
                resource_type: "vm_instance".into(),
                labels: labels(&[("project_id", "p"), ("zone", "us-1")]),
            },
            metric_kind: MetricKind::Gauge,
            value_type: ValueType::Double,
            points: vec![Point {
                interval: TimeInterval {
                    start_time: None,
                    end_time: end_time.into(),
                },
                value: TypedValue {
                    double_value: Some(value),
                    ..Default::default()
                },
            }],
        }
    }

    struct Fixture {
        sink: MetricSink,
        rx: mpsc::UnboundedReceiver<Emitted>,
        counter_store: CounterStore,
        histogram_store: HistogramStore,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        Fixture {
            sink: MetricSink::new(tx, Arc::new(Deduplicator::new().unwrap())),
            rx,
            counter_store: CounterStore::new(Duration::from_secs(1800)),
            histogram_store: HistogramStore::new(Duration::from_secs(1800)),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Emitted>) -> Vec<Emitted> {
        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push(record);
        }
        out
    }

    fn options() -> TranslatorOptions {
        TranslatorOptions {
            fill_missing_labels: false,
            aggregate_deltas: false,
            drop_delegated_projects: false,
        }
    }

    #[test]
    fn gauge_double_series_emits_directly() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            options(),
            &counter_store,
            &histogram_store,
        );

        translator.translate(&gauge_series(0.42, "2024-05-01T12:00:00Z"));
        translator.complete(Utc::now());

        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 1);
        let Emitted::Const { help, metric } = &emitted[0] else {
            panic!("expected const record");
        };
        assert_eq!(help, "CPU utilization");
        assert_eq!(metric.fq_name, "stackdriver_vm_instance_vendor_x_cpu_util");
        assert_eq!(metric.family, FamilyKind::Gauge);
        assert_eq!(metric.value, 0.42);
        assert_eq!(
            metric.report_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            metric.label_keys,
            vec!["unit", "instance_id", "project_id", "zone"]
        );
        assert_eq!(metric.label_values, vec!["1", "i-1", "p", "us-1"]);
    }

    #[test]
    fn latest_point_wins() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            options(),
            &counter_store,
            &histogram_store,
        );

        let mut series = gauge_series(0.1, "2024-05-01T12:00:00Z");
        series.points.push(Point {
            interval: TimeInterval {
                start_time: None,
                end_time: "2024-05-01T12:05:00Z".into(),
            },
            value: TypedValue {
                double_value: Some(0.9),
                ..Default::default()
            },
        });
        translator.translate(&series);

        let emitted = drain(&mut rx);
        let Emitted::Const { metric, .. } = &emitted[0] else {
            panic!("expected const record");
        };
        assert_eq!(metric.value, 0.9);
    }

    #[test]
    fn duplicate_label_key_keeps_first_occurrence() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            options(),
            &counter_store,
            &histogram_store,
        );

        let mut series = gauge_series(1.0, "2024-05-01T12:00:00Z");
        // The metric also carries project_id; the resource copy must not
        // produce a second label.
        series.metric.labels = labels(&[("project_id", "metric-side")]);
        translator.translate(&series);

        let emitted = drain(&mut rx);
        let Emitted::Const { metric, .. } = &emitted[0] else {
            panic!("expected const record");
        };
        let occurrences = metric
            .label_keys
            .iter()
            .filter(|k| k.as_str() == "project_id")
            .count();
        assert_eq!(occurrences, 1);
        let idx = metric
            .label_keys
            .iter()
            .position(|k| k == "project_id")
            .unwrap();
        assert_eq!(metric.label_values[idx], "metric-side");
    }

    #[test]
    fn delegated_project_series_is_dropped() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut opts = options();
        opts.drop_delegated_projects = true;
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "other-project",
            &sink,
            opts,
            &counter_store,
            &histogram_store,
        );

        translator.translate(&gauge_series(1.0, "2024-05-01T12:00:00Z"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn unsupported_value_type_is_skipped() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::String);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            options(),
            &counter_store,
            &histogram_store,
        );

        let mut series = gauge_series(0.0, "2024-05-01T12:00:00Z");
        series.value_type = ValueType::String;
        series.points[0].value = TypedValue {
            string_value: Some("nope".into()),
            ..Default::default()
        };
        translator.translate(&series);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn malformed_interval_is_skipped() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            options(),
            &counter_store,
            &histogram_store,
        );

        translator.translate(&gauge_series(1.0, "not-a-timestamp"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn label_schema_skew_is_filled_on_complete() {
        let descriptor = descriptor(MetricKind::Gauge, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut opts = options();
        opts.fill_missing_labels = true;
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            opts,
            &counter_store,
            &histogram_store,
        );

        let report_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let series = gauge_series(1.0, "2024-05-01T12:00:00Z");
        translator.collect_const(
            &series,
            report_time,
            vec!["a".into(), "b".into()],
            FamilyKind::Gauge,
            1.0,
            vec!["1".into(), "2".into()],
            MetricKind::Gauge,
        );
        translator.collect_const(
            &series,
            report_time + TimeDelta::seconds(60),
            vec!["a".into(), "c".into()],
            FamilyKind::Gauge,
            2.0,
            vec!["1".into(), "3".into()],
            MetricKind::Gauge,
        );
        translator.complete(Utc::now());

        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 2);
        for record in &emitted {
            let Emitted::Const { metric, .. } = record else {
                panic!("expected const record");
            };
            let mut keys = metric.label_keys.clone();
            keys.sort();
            assert_eq!(keys, vec!["a", "b", "c"]);
            // The padded dimension is empty.
            for (key, value) in metric.label_keys.iter().zip(metric.label_values.iter()) {
                if (key == "b" && metric.value == 2.0) || (key == "c" && metric.value == 1.0) {
                    assert_eq!(value, "");
                }
            }
        }
    }

    #[test]
    fn aggregated_delta_goes_to_store_then_emits_counter() {
        let descriptor = descriptor(MetricKind::Delta, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut opts = options();
        opts.aggregate_deltas = true;
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            opts,
            &counter_store,
            &histogram_store,
        );

        let mut series = gauge_series(10.0, "2024-05-01T12:00:00Z");
        series.metric_kind = MetricKind::Delta;
        translator.translate(&series);
        // Nothing emitted before complete; the sample sits in the store.
        assert!(drain(&mut rx).is_empty());

        translator.complete(Utc::now() - TimeDelta::seconds(1));
        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 1);
        let Emitted::Const { metric, .. } = &emitted[0] else {
            panic!("expected const record");
        };
        assert_eq!(metric.family, FamilyKind::Counter);
        assert_eq!(metric.value, 10.0);
    }

    #[test]
    fn stale_delta_entry_gets_synthesized_report_time() {
        let descriptor = descriptor(MetricKind::Delta, ValueType::Double);
        let Fixture {
            sink,
            mut rx,
            counter_store,
            histogram_store,
        } = fixture();
        let mut opts = options();
        opts.aggregate_deltas = true;

        // Entry last collected three minutes before the scrape started,
        // reported one minute before that.
        let scrape_start = Utc::now();
        let collected_at = scrape_start - TimeDelta::minutes(3);
        let reported_at = collected_at - TimeDelta::minutes(1);
        let seed = ConstMetric {
            fq_name: build_fq_name("vm_instance", "vendor.x/cpu/util"),
            label_keys: vec!["unit".into()],
            label_values: vec!["1".into()],
            family: FamilyKind::Counter,
            value: 5.0,
            report_time: reported_at,
            collection_time: collected_at,
            keys_hash: hash_label_keys(&["unit".to_string()]),
        };
        counter_store.increment_at(&descriptor.name, seed, collected_at);

        let expected_before = truncate_to_minute(Utc::now()) - TimeDelta::minutes(1);
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            "p",
            &sink,
            opts,
            &counter_store,
            &histogram_store,
        );
        translator.complete(scrape_start);
        let expected_after = truncate_to_minute(Utc::now()) - TimeDelta::minutes(1);

        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 1);
        let Emitted::Const { metric, .. } = &emitted[0] else {
            panic!("expected const record");
        };
        assert_eq!(metric.value, 5.0);
        assert!(
            metric.report_time == expected_before || metric.report_time == expected_after,
            "report time {} not minute-aligned with one-minute lag",
            metric.report_time
        );
    }
}
