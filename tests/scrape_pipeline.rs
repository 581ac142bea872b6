//! End-to-end scrape scenarios over a scripted monitoring API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use parking_lot::Mutex;
use stackbridge::collector::{CollectionEngine, EngineOptions, NoopDescriptorCache};
use stackbridge::core::{
    BackoffConfig, Config, GoogleConfig, MonitoringConfig, Result, WebConfig,
};
use stackbridge::delta::{CounterStore, HistogramStore};
use stackbridge::gcp::client::MonitoringApi;
use stackbridge::gcp::types::{
    ListMetricDescriptorsResponse, ListTimeSeriesResponse, Metric, MetricDescriptor, MetricKind,
    MonitoredResource, Point, TimeInterval, TimeSeries, TypedValue, ValueType,
};
use stackbridge::web::{AppState, ScrapeQuery, scrape};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

fn descriptor(metric_type: &str, kind: MetricKind, value_type: ValueType) -> MetricDescriptor {
    MetricDescriptor {
        name: format!("projects/p/metricDescriptors/{metric_type}"),
        metric_type: metric_type.into(),
        unit: "1".into(),
        description: "test metric".into(),
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

fn series(
    metric_type: &str,
    kind: MetricKind,
    value: f64,
    end_time: DateTime<Utc>,
) -> TimeSeries {
    TimeSeries {
        metric: Metric {
            metric_type: metric_type.into(),
            labels: labels(&[("instance_id", "i-1")]),
        },
        resource: MonitoredResource {
            resource_type: "vm_instance".into(),
            labels: labels(&[("project_id", "p"), ("zone", "us-1")]),
        },
        metric_kind: kind,
        value_type: ValueType::Double,
        points: vec![Point {
            interval: TimeInterval {
                start_time: None,
                end_time: end_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            value: TypedValue {
                double_value: Some(value),
                ..Default::default()
            },
        }],
    }
}

/// Mock API: fixed descriptor list, optionally a scripted queue of
/// time-series responses consumed one per list call.
struct ScriptedApi {
    descriptors: Vec<MetricDescriptor>,
    descriptor_filters: Mutex<Vec<String>>,
    scripted_series: Mutex<VecDeque<Vec<TimeSeries>>>,
    series_by_type: bool,
}

impl ScriptedApi {
    fn fixed(descriptors: Vec<MetricDescriptor>) -> Self {
        Self {
            descriptors,
            descriptor_filters: Mutex::new(Vec::new()),
            scripted_series: Mutex::new(VecDeque::new()),
            series_by_type: true,
        }
    }

    fn scripted(
        descriptors: Vec<MetricDescriptor>,
        responses: Vec<Vec<TimeSeries>>,
    ) -> Self {
        Self {
            descriptors,
            descriptor_filters: Mutex::new(Vec::new()),
            scripted_series: Mutex::new(responses.into()),
            series_by_type: false,
        }
    }
}

#[async_trait]
impl MonitoringApi for ScriptedApi {
    async fn list_metric_descriptors(
        &self,
        _project_id: &str,
        filter: &str,
        _page_token: Option<&str>,
    ) -> Result<ListMetricDescriptorsResponse> {
        self.descriptor_filters.lock().push(filter.to_string());
        Ok(ListMetricDescriptorsResponse {
            metric_descriptors: self.descriptors.clone(),
            next_page_token: None,
        })
    }

    async fn list_time_series(
        &self,
        _project_id: &str,
        filter: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _page_token: Option<&str>,
    ) -> Result<ListTimeSeriesResponse> {
        if self.series_by_type {
            let metric_type = filter.split('"').nth(1).unwrap_or_default().to_string();
            let descriptor = self
                .descriptors
                .iter()
                .find(|d| d.metric_type == metric_type);
            let time_series = descriptor
                .map(|d| {
                    vec![series(
                        &d.metric_type,
                        d.metric_kind,
                        0.42,
                        Utc::now() - TimeDelta::minutes(2),
                    )]
                })
                .unwrap_or_default();
            return Ok(ListTimeSeriesResponse {
                time_series,
                next_page_token: None,
            });
        }

        let time_series = self.scripted_series.lock().pop_front().unwrap_or_default();
        Ok(ListTimeSeriesResponse {
            time_series,
            next_page_token: None,
        })
    }
}

fn config(prefixes: &[&str], aggregate_deltas: bool) -> Config {
    Config {
        web: WebConfig {
            listen_addresses: vec![":9255".into()],
            telemetry_path: "/metrics".into(),
            stackdriver_telemetry_path: "/metrics".into(),
        },
        google: GoogleConfig {
            project_ids: vec!["p".into()],
            projects_filter: None,
        },
        monitoring: MonitoringConfig {
            metrics_prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            interval: Duration::from_secs(300),
            offset: Duration::ZERO,
            ingest_delay: false,
            extra_filters: Vec::new(),
            aggregate_deltas,
            aggregate_deltas_ttl: Duration::from_secs(1800),
            descriptor_cache_ttl: Duration::ZERO,
            descriptor_cache_only_google: true,
            drop_delegated_projects: false,
            fill_missing_labels: true,
        },
        backoff: BackoffConfig::default(),
    }
}

#[tokio::test]
async fn gauge_double_series_round_trips_to_text() {
    // Whole-second end time: the wire format in these fixtures carries
    // second precision.
    let end_time = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap()
        - TimeDelta::minutes(2);
    let api = ScriptedApi::scripted(
        vec![descriptor("vendor.x/cpu/util", MetricKind::Gauge, ValueType::Double)],
        vec![vec![series(
            "vendor.x/cpu/util",
            MetricKind::Gauge,
            0.42,
            end_time,
        )]],
    );
    let state = AppState::new(config(&["vendor.x"], false), Arc::new(api)).unwrap();

    let body = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();

    assert!(body.contains("# TYPE stackdriver_vm_instance_vendor_x_cpu_util gauge"));
    let expected = format!(
        "stackdriver_vm_instance_vendor_x_cpu_util{{unit=\"1\",instance_id=\"i-1\",project_id=\"p\",zone=\"us-1\"}} 0.42 {}",
        end_time.timestamp_millis()
    );
    assert!(body.contains(&expected), "missing sample line in:\n{body}");

    // Self-metrics always accompany the scrape.
    assert!(body.contains("stackdriver_monitoring_scrapes_total{project_id=\"p\"} 1"));
    assert!(body.contains("stackdriver_monitoring_last_scrape_error{project_id=\"p\"} 0"));
    assert!(body.contains("stackdriver_monitoring_api_calls_total{project_id=\"p\"} 2"));
}

#[tokio::test]
async fn delta_aggregation_accumulates_across_scrapes() {
    let t0 = Utc::now() - TimeDelta::minutes(12);
    let t1 = Utc::now() - TimeDelta::minutes(8);
    let t2 = Utc::now() - TimeDelta::minutes(4);

    let api = ScriptedApi::scripted(
        vec![descriptor("vendor.x/ops", MetricKind::Delta, ValueType::Double)],
        vec![
            vec![series("vendor.x/ops", MetricKind::Delta, 10.0, t1)],
            vec![series("vendor.x/ops", MetricKind::Delta, 15.0, t2)],
            // A stale window that must not decrease the total.
            vec![series("vendor.x/ops", MetricKind::Delta, 5.0, t0)],
        ],
    );
    let state = AppState::new(config(&["vendor.x"], true), Arc::new(api)).unwrap();

    let first = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();
    assert!(first.contains("# TYPE stackdriver_vm_instance_vendor_x_ops counter"));
    assert!(
        first.contains("zone=\"us-1\"} 10 "),
        "first scrape should show 10:\n{first}"
    );

    let second = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();
    assert!(
        second.contains("zone=\"us-1\"} 25 "),
        "second scrape should accumulate to 25:\n{second}"
    );

    let third = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();
    assert!(
        third.contains("zone=\"us-1\"} 25 "),
        "stale report time must not change the total:\n{third}"
    );
}

#[tokio::test]
async fn colliding_names_are_deduplicated() {
    // Two descriptor types that normalize onto the same fully qualified
    // name, reporting identical labels and timestamps.
    let end_time = Utc::now() - TimeDelta::minutes(2);
    let api = ScriptedApi::scripted(
        vec![
            descriptor("vendor.x/ops.count", MetricKind::Gauge, ValueType::Double),
            descriptor("vendor.x/ops/count", MetricKind::Gauge, ValueType::Double),
        ],
        vec![
            vec![series("vendor.x/ops.count", MetricKind::Gauge, 1.0, end_time)],
            vec![series("vendor.x/ops/count", MetricKind::Gauge, 1.0, end_time)],
        ],
    );
    let state = AppState::new(config(&["vendor.x"], false), Arc::new(api)).unwrap();

    let body = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();

    let sample_lines = body
        .lines()
        .filter(|line| {
            line.starts_with("stackdriver_vm_instance_vendor_x_ops_count{")
        })
        .count();
    assert_eq!(sample_lines, 1, "duplicate should be suppressed:\n{body}");
    assert!(body.contains("stackdriver_deduplicator_duplicates_total 1"));
}

#[tokio::test]
async fn collect_filter_narrows_to_more_specific_prefix() {
    let api = Arc::new(ScriptedApi::fixed(vec![descriptor(
        "vendor.x/storage/read/ops",
        MetricKind::Gauge,
        ValueType::Double,
    )]));
    let state = AppState::new(
        config(&["vendor.x/storage", "vendor.x/network"], false),
        api.clone(),
    )
    .unwrap();

    let query = ScrapeQuery {
        collect: vec!["vendor.x/storage/read".into()],
        project_ids: Vec::new(),
    };
    let body = scrape(&state, &query, false).await.unwrap();
    assert!(body.contains("stackdriver_monitoring_scrapes_total"));

    // Only the narrowed prefix was queried upstream.
    let filters = api.descriptor_filters.lock().clone();
    assert_eq!(filters.len(), 1);
    assert!(filters[0].contains("starts_with(\"vendor.x/storage/read\")"));
}

#[tokio::test]
async fn project_ids_filter_restricts_projects() {
    let api = ScriptedApi::fixed(vec![descriptor(
        "vendor.x/cpu/util",
        MetricKind::Gauge,
        ValueType::Double,
    )]);
    let mut cfg = config(&["vendor.x"], false);
    cfg.google.project_ids = vec!["p".into(), "q".into()];
    let state = AppState::new(cfg, Arc::new(api)).unwrap();

    let query = ScrapeQuery {
        collect: Vec::new(),
        project_ids: vec!["q".into()],
    };
    let body = scrape(&state, &query, false).await.unwrap();
    assert!(body.contains("stackdriver_monitoring_scrapes_total{project_id=\"q\"} 1"));
    assert!(!body.contains("stackdriver_monitoring_scrapes_total{project_id=\"p\"}"));
}

#[tokio::test]
async fn engine_reuse_between_scrapes() {
    let api = ScriptedApi::fixed(vec![descriptor(
        "vendor.x/cpu/util",
        MetricKind::Gauge,
        ValueType::Double,
    )]);
    let state = AppState::new(config(&["vendor.x"], false), Arc::new(api)).unwrap();

    let first = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();
    assert!(first.contains("stackdriver_monitoring_scrapes_total{project_id=\"p\"} 1"));

    // The cached engine keeps its counters: a second scrape increments.
    let second = scrape(&state, &ScrapeQuery::default(), false).await.unwrap();
    assert!(second.contains("stackdriver_monitoring_scrapes_total{project_id=\"p\"} 2"));
}

#[tokio::test]
async fn engine_collect_emits_nothing_for_empty_descriptor_list() {
    let api = ScriptedApi::fixed(Vec::new());
    let engine = CollectionEngine::new(
        "p",
        Arc::new(api),
        Arc::new(NoopDescriptorCache),
        Arc::new(CounterStore::new(Duration::from_secs(60))),
        Arc::new(HistogramStore::new(Duration::from_secs(60))),
        EngineOptions {
            prefixes: vec!["vendor.x".into()],
            extra_filters: Vec::new(),
            interval: Duration::from_secs(300),
            offset: Duration::ZERO,
            ingest_delay: false,
            fill_missing_labels: true,
            drop_delegated_projects: false,
            aggregate_deltas: false,
        },
    )
    .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine.collect(tx).await;
    assert!(rx.recv().await.is_none());
}
