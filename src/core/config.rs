//! Validated runtime configuration.
//!
//! The CLI layer builds this tree from flags and environment variables; the
//! rest of the crate only ever sees the validated form. Durations serialize
//! through `humantime_serde` so a dumped config reads the way the flags were
//! written (`5m`, `30s`).

use crate::core::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Web server configuration.
    pub web: WebConfig,
    /// Project selection.
    pub google: GoogleConfig,
    /// Collection behavior.
    pub monitoring: MonitoringConfig,
    /// Upstream client retry/backoff policy.
    pub backoff: BackoffConfig,
}

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Addresses to listen on (`:9255` style accepted by the CLI).
    pub listen_addresses: Vec<String>,
    /// Path exposing runtime and collection-engine internal metrics.
    pub telemetry_path: String,
    /// Path exposing the translated Cloud Monitoring metrics.
    pub stackdriver_telemetry_path: String,
}

/// Project selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Explicit project IDs (already merged from the legacy comma form).
    pub project_ids: Vec<String>,
    /// Optional projects-listing search filter resolved at startup.
    pub projects_filter: Option<String>,
}

/// One per-prefix extra filter (`<prefix>:<query>` on the CLI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFilter {
    /// Metric-type prefix the query applies to.
    pub targeted_prefix: String,
    /// Raw filter expression ANDed onto the time-series filter.
    pub query: String,
}

impl MetricFilter {
    /// Parse the `<prefix>:<query>` CLI form. Returns `None` when the input
    /// carries no separator.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, query) = raw.split_once(':')?;
        if prefix.is_empty() {
            return None;
        }
        Some(Self {
            targeted_prefix: prefix.to_lowercase(),
            query: query.to_string(),
        })
    }
}

/// Collection behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Metric-type prefixes to collect, after hygiene (sorted, deduplicated,
    /// sub-prefixes dropped).
    pub metrics_prefixes: Vec<String>,
    /// Width of the requested time-series window.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Offset of the window end into the past.
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    /// Shift the window further by each descriptor's advertised ingest delay.
    pub ingest_delay: bool,
    /// Per-prefix extra filters.
    pub extra_filters: Vec<MetricFilter>,
    /// Accumulate DELTA samples into monotonic counters.
    pub aggregate_deltas: bool,
    /// How long an aggregated DELTA entry keeps exporting after the source
    /// stops producing samples.
    #[serde(with = "humantime_serde")]
    pub aggregate_deltas_ttl: Duration,
    /// Descriptor cache TTL; zero disables caching.
    #[serde(with = "humantime_serde")]
    pub descriptor_cache_ttl: Duration,
    /// Restrict descriptor caching to `*.googleapis.com` prefixes.
    pub descriptor_cache_only_google: bool,
    /// Drop series whose `project_id` differs from the scraped project.
    pub drop_delegated_projects: bool,
    /// Pad label sets so records sharing a name expose identical dimensions.
    pub fill_missing_labels: bool,
}

/// Upstream client retry and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Retries attempted on retryable statuses.
    pub max_retries: u32,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Base delay the jittered exponential grows from.
    #[serde(with = "humantime_serde")]
    pub jitter_base: Duration,
    /// HTTP statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            http_timeout: Duration::from_secs(10),
            max_backoff: Duration::from_secs(5),
            jitter_base: Duration::from_secs(1),
            retry_statuses: vec![503],
        }
    }
}

impl Config {
    /// Validate cross-field requirements. Called once at startup; failures
    /// are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.metrics_prefixes.is_empty() {
            return Err(BridgeError::config(
                "at least one monitoring metrics prefix is required",
            ));
        }
        if self.monitoring.interval.is_zero() {
            return Err(BridgeError::config("metrics interval must be positive"));
        }
        for path in [
            &self.web.telemetry_path,
            &self.web.stackdriver_telemetry_path,
        ] {
            if !path.starts_with('/') {
                return Err(BridgeError::config(format!(
                    "telemetry path {path:?} must start with '/'"
                )));
            }
        }
        if self.web.listen_addresses.is_empty() {
            return Err(BridgeError::config("at least one listen address is required"));
        }
        Ok(())
    }
}

/// Sort, deduplicate, and drop prefixes that extend another configured
/// prefix. A scrape for `vendor.x/storage` already covers
/// `vendor.x/storage/read`, and collecting both would emit duplicates.
pub fn parse_metric_prefixes(input: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = input.to_vec();
    unique.sort();
    unique.dedup();

    let mut prefixes: Vec<String> = Vec::with_capacity(unique.len());
    for prefix in unique {
        if let Some(previous) = prefixes.last() {
            if prefix.starts_with(previous.as_str()) {
                continue;
            }
        }
        prefixes.push(prefix);
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
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
                metrics_prefixes: vec!["vendor.x/cpu".into()],
                interval: Duration::from_secs(300),
                offset: Duration::ZERO,
                ingest_delay: false,
                extra_filters: Vec::new(),
                aggregate_deltas: false,
                aggregate_deltas_ttl: Duration::from_secs(1800),
                descriptor_cache_ttl: Duration::ZERO,
                descriptor_cache_only_google: true,
                drop_delegated_projects: false,
                fill_missing_labels: true,
            },
            backoff: BackoffConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_prefixes_fail() {
        let mut config = base_config();
        config.monitoring.metrics_prefixes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_path_fails() {
        let mut config = base_config();
        config.web.telemetry_path = "metrics".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn prefix_hygiene_drops_sub_prefixes() {
        let input = vec![
            "vendor.x/storage/read".to_string(),
            "vendor.x/storage".to_string(),
            "vendor.x/network".to_string(),
            "vendor.x/network".to_string(),
        ];
        assert_eq!(
            parse_metric_prefixes(&input),
            vec!["vendor.x/network".to_string(), "vendor.x/storage".to_string()]
        );
    }

    #[test]
    fn metric_filter_parsing() {
        let filter = MetricFilter::parse("pubsub.googleapis.com/subscription:resource.labels.id=\"x\"");
        assert_eq!(
            filter,
            Some(MetricFilter {
                targeted_prefix: "pubsub.googleapis.com/subscription".into(),
                query: "resource.labels.id=\"x\"".into(),
            })
        );
        assert_eq!(MetricFilter::parse("no-separator"), None);
        assert_eq!(MetricFilter::parse(":query-only"), None);
    }
}
