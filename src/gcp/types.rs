//! Serde models for the slice of the Cloud Monitoring v3 REST API the
//! bridge consumes: metric descriptors, time series, and distributions.
//!
//! The wire format renders 64-bit integers as JSON strings and protobuf
//! durations as `"<seconds>s"`, so the fields that need it carry custom
//! deserializers. Interval timestamps stay as RFC 3339 strings here and are
//! parsed at translation time, where a bad value skips one series instead of
//! failing a whole page.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Kind of measurement a metric reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    /// Instantaneous measurement.
    Gauge,
    /// Change over the sampled interval.
    Delta,
    /// Running total since a start time.
    Cumulative,
    /// Unknown or unspecified; series with this kind are skipped.
    #[serde(other)]
    #[default]
    Unspecified,
}

/// Value type of a metric's points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Bool,
    Int64,
    Double,
    String,
    Distribution,
    Money,
    #[serde(other)]
    #[default]
    Unspecified,
}

/// Optional scheduling metadata attached to a descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescriptorMetadata {
    /// Delay before data for the metric becomes queryable.
    #[serde(deserialize_with = "de_proto_duration")]
    pub ingest_delay: Option<Duration>,
    /// Sampling period of the metric.
    #[serde(deserialize_with = "de_proto_duration")]
    pub sample_period: Option<Duration>,
}

/// Metadata describing one metric type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricDescriptor {
    /// Resource name, `projects/<id>/metricDescriptors/<type>`.
    pub name: String,
    /// Dotted metric type, e.g. `compute.googleapis.com/instance/cpu/usage`.
    #[serde(rename = "type")]
    pub metric_type: String,
    /// Unit string in UCUM-ish notation.
    pub unit: String,
    /// Human description, exposed as metric help.
    pub description: String,
    pub metric_kind: MetricKind,
    pub value_type: ValueType,
    pub metadata: Option<DescriptorMetadata>,
}

/// One page of `metricDescriptors.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMetricDescriptorsResponse {
    pub metric_descriptors: Vec<MetricDescriptor>,
    pub next_page_token: Option<String>,
}

/// Metric identity inside a time series.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metric {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub labels: BTreeMap<String, String>,
}

/// Monitored resource the series was written against.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub labels: BTreeMap<String, String>,
}

/// Time window of a point, RFC 3339 strings as sent on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeInterval {
    pub start_time: Option<String>,
    pub end_time: String,
}

/// One sampled value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Point {
    pub interval: TimeInterval,
    pub value: TypedValue,
}

/// A point's value; exactly one field is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypedValue {
    pub bool_value: Option<bool>,
    #[serde(deserialize_with = "de_opt_i64")]
    pub int64_value: Option<i64>,
    pub double_value: Option<f64>,
    pub string_value: Option<String>,
    pub distribution_value: Option<Distribution>,
}

/// Histogram-shaped point value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Distribution {
    #[serde(deserialize_with = "de_i64")]
    pub count: i64,
    pub mean: f64,
    #[serde(deserialize_with = "de_vec_i64")]
    pub bucket_counts: Vec<i64>,
    pub bucket_options: Option<BucketOptions>,
}

/// Bucket layout of a distribution; exactly one variant is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketOptions {
    pub explicit_buckets: Option<ExplicitBuckets>,
    pub linear_buckets: Option<LinearBuckets>,
    pub exponential_buckets: Option<ExponentialBuckets>,
}

/// Explicit bucket bounds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplicitBuckets {
    pub bounds: Vec<f64>,
}

/// Evenly spaced buckets: `offset + i * width`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinearBuckets {
    pub num_finite_buckets: i32,
    pub offset: f64,
    pub width: f64,
}

/// Geometrically spaced buckets: `scale * growth_factor^i`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExponentialBuckets {
    pub num_finite_buckets: i32,
    pub scale: f64,
    pub growth_factor: f64,
}

/// One time series with its points.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeSeries {
    pub metric: Metric,
    pub resource: MonitoredResource,
    pub metric_kind: MetricKind,
    pub value_type: ValueType,
    pub points: Vec<Point>,
}

/// One page of `timeSeries.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTimeSeriesResponse {
    pub time_series: Vec<TimeSeries>,
    pub next_page_token: Option<String>,
}

/// One project entry from the projects-listing service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectEntry {
    pub project_id: String,
}

/// One page of `projects.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListProjectsResponse {
    pub projects: Vec<ProjectEntry>,
    pub next_page_token: Option<String>,
}

// JSON int64 arrives as either a number or a quoted string.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireI64 {
    Number(i64),
    Text(String),
}

impl WireI64 {
    fn value<E: serde::de::Error>(self) -> std::result::Result<i64, E> {
        match self {
            WireI64::Number(n) => Ok(n),
            WireI64::Text(s) => s
                .parse::<i64>()
                .map_err(|err| E::custom(format!("invalid int64 {s:?}: {err}"))),
        }
    }
}

fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    WireI64::deserialize(deserializer)?.value()
}

fn de_opt_i64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    match Option::<WireI64>::deserialize(deserializer)? {
        Some(wire) => wire.value().map(Some),
        None => Ok(None),
    }
}

fn de_vec_i64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<i64>, D::Error> {
    let values = Vec::<WireI64>::deserialize(deserializer)?;
    values.into_iter().map(WireI64::value).collect()
}

// Protobuf JSON durations look like "137s" or "3.5s".
fn de_proto_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let seconds = text
        .strip_suffix('s')
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {text:?}")))?;
    Ok(Some(Duration::from_secs_f64(seconds)))
}
