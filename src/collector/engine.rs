//! Per-scrape orchestration: prefix fan-out, descriptor discovery,
//! time-series paging, and the engine's own operational metrics.

use crate::collector::descriptor_cache::DescriptorCache;
use crate::collector::sample::{Emitted, MetricSink};
use crate::collector::dedup::Deduplicator;
use crate::collector::series::{TimeSeriesTranslator, TranslatorOptions};
use crate::core::{MetricFilter, Result};
use crate::delta::{CounterStore, HistogramStore};
use crate::gcp::client::MonitoringApi;
use crate::gcp::types::MetricDescriptor;
use chrono::{DateTime, TimeDelta, Utc};
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntCounter, Opts};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};

/// Upper bound on concurrently scraped descriptors per engine. The paging
/// loop inside each task already serializes requests per descriptor.
const MAX_INFLIGHT_DESCRIPTORS: usize = 64;

/// Behavior switches for one engine, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Metric-type prefixes this engine scrapes.
    pub prefixes: Vec<String>,
    /// Per-prefix extra filter expressions.
    pub extra_filters: Vec<MetricFilter>,
    /// Width of the requested window.
    pub interval: Duration,
    /// Offset of the window end into the past.
    pub offset: Duration,
    /// Honor each descriptor's advertised ingest delay.
    pub ingest_delay: bool,
    /// Pad label sets per name before emission.
    pub fill_missing_labels: bool,
    /// Restrict descriptors and series to the engine's own project.
    pub drop_delegated_projects: bool,
    /// Accumulate DELTA kinds into monotonic counters.
    pub aggregate_deltas: bool,
}

/// Operational self-metrics, all carrying a `project_id` const label.
pub struct EngineMetrics {
    api_calls_total: IntCounter,
    scrapes_total: IntCounter,
    scrape_errors_total: IntCounter,
    last_scrape_error: Gauge,
    last_scrape_timestamp: Gauge,
    last_scrape_duration_seconds: Gauge,
}

impl EngineMetrics {
    fn new(project_id: &str) -> Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace("stackdriver")
                .subsystem("monitoring")
                .const_label("project_id", project_id)
        };

        Ok(Self {
            api_calls_total: IntCounter::with_opts(opts(
                "api_calls_total",
                "Total number of Google Stackdriver Monitoring API calls made.",
            ))?,
            scrapes_total: IntCounter::with_opts(opts(
                "scrapes_total",
                "Total number of Google Stackdriver Monitoring metrics scrapes.",
            ))?,
            scrape_errors_total: IntCounter::with_opts(opts(
                "scrape_errors_total",
                "Total number of Google Stackdriver Monitoring metrics scrape errors.",
            ))?,
            last_scrape_error: Gauge::with_opts(opts(
                "last_scrape_error",
                "Whether the last metrics scrape from Google Stackdriver Monitoring resulted in an error (1 for error, 0 for success).",
            ))?,
            last_scrape_timestamp: Gauge::with_opts(opts(
                "last_scrape_timestamp",
                "Number of seconds since 1970 since last metrics scrape from Google Stackdriver Monitoring.",
            ))?,
            last_scrape_duration_seconds: Gauge::with_opts(opts(
                "last_scrape_duration_seconds",
                "Duration of the last metrics scrape from Google Stackdriver Monitoring.",
            ))?,
        })
    }

    fn export(&self) -> Vec<MetricFamily> {
        let mut families = self.api_calls_total.collect();
        families.extend(self.scrapes_total.collect());
        families.extend(self.scrape_errors_total.collect());
        families.extend(self.last_scrape_error.collect());
        families.extend(self.last_scrape_timestamp.collect());
        families.extend(self.last_scrape_duration_seconds.collect());
        families
    }
}

/// Scrapes one (project, prefix-set) pair against the source API.
pub struct CollectionEngine {
    project_id: String,
    options: EngineOptions,
    client: Arc<dyn MonitoringApi>,
    descriptor_cache: Arc<dyn DescriptorCache>,
    counter_store: Arc<CounterStore>,
    histogram_store: Arc<HistogramStore>,
    dedup: Arc<Deduplicator>,
    metrics: EngineMetrics,
    // One scrape at a time per engine; concurrent scrapes across engines
    // are expected.
    scrape_guard: Mutex<()>,
    fanout: Arc<Semaphore>,
}

impl CollectionEngine {
    /// Create an engine for one project and prefix set.
    pub fn new(
        project_id: impl Into<String>,
        client: Arc<dyn MonitoringApi>,
        descriptor_cache: Arc<dyn DescriptorCache>,
        counter_store: Arc<CounterStore>,
        histogram_store: Arc<HistogramStore>,
        options: EngineOptions,
    ) -> Result<Arc<Self>> {
        let project_id = project_id.into();
        let metrics = EngineMetrics::new(&project_id)?;
        Ok(Arc::new(Self {
            project_id,
            options,
            client,
            descriptor_cache,
            counter_store,
            histogram_store,
            dedup: Arc::new(Deduplicator::new()?),
            metrics,
            scrape_guard: Mutex::new(()),
            fanout: Arc::new(Semaphore::new(MAX_INFLIGHT_DESCRIPTORS)),
        }))
    }

    /// The project this engine scrapes.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Run one scrape, emitting translated records into `tx`.
    ///
    /// Never fails: descriptor-level errors surface through the scrape-error
    /// self-metrics while everything that did collect still emits.
    pub async fn collect(self: Arc<Self>, tx: mpsc::UnboundedSender<Emitted>) {
        let _guard = self.scrape_guard.lock().await;
        let begun = Utc::now();
        self.dedup.reset();
        let sink = MetricSink::new(tx, Arc::clone(&self.dedup));

        let mut handles = Vec::with_capacity(self.options.prefixes.len());
        for prefix in self.options.prefixes.clone() {
            let engine = Arc::clone(&self);
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                engine.scrape_prefix(&prefix, &sink, begun).await
            }));
        }

        let mut error = false;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    error = true;
                    tracing::error!(
                        project_id = %self.project_id,
                        error = %err,
                        category = err.category(),
                        "error while collecting monitoring metrics"
                    );
                },
                Err(err) => {
                    error = true;
                    tracing::error!(project_id = %self.project_id, error = %err, "scrape task panicked");
                },
            }
        }

        if error {
            self.metrics.scrape_errors_total.inc();
        }
        self.metrics.scrapes_total.inc();
        self.metrics
            .last_scrape_error
            .set(if error { 1.0 } else { 0.0 });
        let finished = Utc::now();
        self.metrics
            .last_scrape_timestamp
            .set(finished.timestamp() as f64);
        self.metrics
            .last_scrape_duration_seconds
            .set((finished - begun).num_milliseconds() as f64 / 1000.0);
    }

    /// Export this engine's self-metrics (including the deduplicator's).
    pub fn export_metrics(&self) -> Vec<MetricFamily> {
        let mut families = self.metrics.export();
        families.extend(self.dedup.export());
        families
    }

    async fn scrape_prefix(
        self: &Arc<Self>,
        prefix: &str,
        sink: &MetricSink,
        begun: DateTime<Utc>,
    ) -> Result<()> {
        let descriptors = match self.descriptor_cache.lookup(prefix) {
            Some(cached) => cached,
            None => {
                let fetched = self.fetch_descriptors(prefix).await?;
                self.descriptor_cache.store(prefix, fetched.clone());
                fetched
            },
        };

        // The same descriptor type can arrive from several delegated
        // projects; fetching it once per type is enough.
        let mut unique: BTreeMap<String, MetricDescriptor> = BTreeMap::new();
        for descriptor in descriptors {
            unique.insert(descriptor.metric_type.clone(), descriptor);
        }

        let end = Utc::now() - to_delta(self.options.offset);
        let start = end - to_delta(self.options.interval);

        let mut handles = Vec::with_capacity(unique.len());
        for descriptor in unique.into_values() {
            let engine = Arc::clone(self);
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match engine.fanout.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Ok(()),
                };
                engine.scrape_descriptor(descriptor, start, end, &sink, begun).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => first_error = first_error.or(Some(err)),
                Err(err) => first_error = first_error.or(Some(err.into())),
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_descriptors(&self, prefix: &str) -> Result<Vec<MetricDescriptor>> {
        tracing::debug!(
            project_id = %self.project_id,
            prefix,
            "listing metric descriptors"
        );
        let filter = if self.options.drop_delegated_projects {
            format!(
                "project = \"{}\" AND metric.type = starts_with(\"{prefix}\")",
                self.project_id
            )
        } else {
            format!("metric.type = starts_with(\"{prefix}\")")
        };

        let mut descriptors = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            self.metrics.api_calls_total.inc();
            let page = self
                .client
                .list_metric_descriptors(&self.project_id, &filter, page_token.as_deref())
                .await?;
            descriptors.extend(page.metric_descriptors);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(descriptors)
    }

    async fn scrape_descriptor(
        &self,
        descriptor: MetricDescriptor,
        mut start: DateTime<Utc>,
        mut end: DateTime<Utc>,
        sink: &MetricSink,
        begun: DateTime<Utc>,
    ) -> Result<()> {
        if self.options.ingest_delay {
            if let Some(delay) = descriptor.metadata.as_ref().and_then(|m| m.ingest_delay) {
                let delay = to_delta(delay);
                start -= delay;
                end -= delay;
            }
        }

        let filter = self.time_series_filter(&descriptor);
        tracing::debug!(
            descriptor = %descriptor.metric_type,
            filter = %filter,
            "retrieving time series"
        );

        let options = TranslatorOptions {
            fill_missing_labels: self.options.fill_missing_labels,
            aggregate_deltas: self.options.aggregate_deltas,
            drop_delegated_projects: self.options.drop_delegated_projects,
        };
        let mut translator = TimeSeriesTranslator::new(
            &descriptor,
            &self.project_id,
            sink,
            options,
            &self.counter_store,
            &self.histogram_store,
        );

        let mut page_token: Option<String> = None;
        let result = loop {
            self.metrics.api_calls_total.inc();
            let page = match self
                .client
                .list_time_series(&self.project_id, &filter, start, end, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(
                        descriptor = %descriptor.metric_type,
                        error = %err,
                        "error retrieving time series"
                    );
                    break Err(err);
                },
            };
            for series in &page.time_series {
                translator.translate(series);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break Ok(()),
            }
        };

        // Accumulated DELTA entries and pending label-filled groups still
        // flush even when a later page failed.
        translator.complete(begun);
        result
    }

    fn time_series_filter(&self, descriptor: &MetricDescriptor) -> String {
        let mut filter = if self.options.drop_delegated_projects {
            format!(
                "project = \"{}\" AND metric.type = \"{}\"",
                self.project_id, descriptor.metric_type
            )
        } else {
            format!("metric.type = \"{}\"", descriptor.metric_type)
        };
        for extra in &self.options.extra_filters {
            if descriptor
                .metric_type
                .to_lowercase()
                .contains(&extra.targeted_prefix)
            {
                filter = format!("{filter} AND ({})", extra.query);
            }
        }
        filter
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::zero())
}
