//! Command-line interface and startup sequencing.
//!
//! The flag surface keeps the exporter-style dotted names
//! (`--monitoring.metrics-prefixes`, `--stackdriver.max-retries`) with
//! environment variable fallbacks. Legacy comma-separated forms remain as
//! aliases that append to the same effective lists.

use crate::core::{
    BackoffConfig, BridgeError, Config, GoogleConfig, MetricFilter, MonitoringConfig, Result,
    WebConfig, parse_metric_prefixes,
};
use crate::gcp::auth::{MetadataServerTokens, StaticToken, TokenProvider};
use crate::gcp::client::{GcpMonitoringClient, ProjectsClient};
use crate::web::{self, AppState};
use clap::{ArgAction, Parser};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus bridge for Google Cloud Monitoring time series.
#[derive(Parser, Debug, Clone)]
#[command(name = "stackbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on for web interface and telemetry.
    #[arg(
        long = "web.listen-address",
        env = "STACKBRIDGE_WEB_LISTEN_ADDRESS",
        default_value = ":9255"
    )]
    pub listen_addresses: Vec<String>,

    /// Path under which to expose Prometheus metrics.
    #[arg(
        long = "web.telemetry-path",
        env = "STACKBRIDGE_WEB_TELEMETRY_PATH",
        default_value = "/metrics"
    )]
    pub telemetry_path: String,

    /// Path under which to expose the translated Stackdriver metrics.
    #[arg(
        long = "web.stackdriver-telemetry-path",
        env = "STACKBRIDGE_WEB_STACKDRIVER_TELEMETRY_PATH",
        default_value = "/metrics"
    )]
    pub stackdriver_telemetry_path: String,

    /// Google project ID to scrape. Repeat for multiple projects.
    #[arg(long = "google.project-ids", env = "STACKBRIDGE_GOOGLE_PROJECT_IDS")]
    pub project_ids: Vec<String>,

    /// DEPRECATED - comma separated list of project IDs. Use
    /// google.project-ids instead.
    #[arg(long = "google.project-id", hide = true)]
    pub legacy_project_id: Option<String>,

    /// Google projects search filter resolved at startup.
    #[arg(long = "google.projects.filter", env = "STACKBRIDGE_GOOGLE_PROJECTS_FILTER")]
    pub projects_filter: Option<String>,

    /// Monitoring metric type prefix to scrape. Repeat for multiple
    /// prefixes.
    #[arg(
        long = "monitoring.metrics-prefixes",
        env = "STACKBRIDGE_MONITORING_METRICS_PREFIXES"
    )]
    pub metrics_prefixes: Vec<String>,

    /// DEPRECATED - comma separated list of metric type prefixes. Use
    /// monitoring.metrics-prefixes instead.
    #[arg(long = "monitoring.metrics-type-prefixes", hide = true)]
    pub legacy_metrics_prefixes: Option<String>,

    /// Interval to request the monitoring metrics for. Only the most recent
    /// data point is used.
    #[arg(
        long = "monitoring.metrics-interval",
        env = "STACKBRIDGE_MONITORING_METRICS_INTERVAL",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    pub metrics_interval: Duration,

    /// Offset for the monitoring metrics interval into the past.
    #[arg(
        long = "monitoring.metrics-offset",
        env = "STACKBRIDGE_MONITORING_METRICS_OFFSET",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub metrics_offset: Duration,

    /// Offset the interval into the past by the ingest delay from the
    /// metric's metadata.
    #[arg(
        long = "monitoring.metrics-ingest-delay",
        env = "STACKBRIDGE_MONITORING_METRICS_INGEST_DELAY",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub metrics_ingest_delay: bool,

    /// Per-prefix filter, `<prefix>:<query>`. Repeatable.
    #[arg(long = "monitoring.filters", env = "STACKBRIDGE_MONITORING_FILTERS")]
    pub filters: Vec<String>,

    /// Treat DELTA metrics as in-memory counters instead of gauges.
    #[arg(
        long = "monitoring.aggregate-deltas",
        env = "STACKBRIDGE_MONITORING_AGGREGATE_DELTAS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub aggregate_deltas: bool,

    /// How long a delta metric keeps exporting after the source stops
    /// producing samples.
    #[arg(
        long = "monitoring.aggregate-deltas-ttl",
        env = "STACKBRIDGE_MONITORING_AGGREGATE_DELTAS_TTL",
        default_value = "30m",
        value_parser = humantime::parse_duration
    )]
    pub aggregate_deltas_ttl: Duration,

    /// How long metric descriptors are cached per prefix. Zero disables
    /// caching.
    #[arg(
        long = "monitoring.descriptor-cache-ttl",
        env = "STACKBRIDGE_MONITORING_DESCRIPTOR_CACHE_TTL",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub descriptor_cache_ttl: Duration,

    /// Only cache descriptors for *.googleapis.com metric prefixes.
    #[arg(
        long = "monitoring.descriptor-cache-only-google",
        env = "STACKBRIDGE_MONITORING_DESCRIPTOR_CACHE_ONLY_GOOGLE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub descriptor_cache_only_google: bool,

    /// Drop metrics from attached projects and fetch `project_id` only.
    #[arg(
        long = "monitoring.drop-delegated-projects",
        env = "STACKBRIDGE_MONITORING_DROP_DELEGATED_PROJECTS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub drop_delegated_projects: bool,

    /// Fill missing metric labels with empty strings to avoid label
    /// dimension inconsistencies.
    #[arg(
        long = "collector.fill-missing-labels",
        env = "STACKBRIDGE_COLLECTOR_FILL_MISSING_LABELS",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub fill_missing_labels: bool,

    /// Max number of retries on retryable statuses from the monitoring API.
    #[arg(
        long = "stackdriver.max-retries",
        env = "STACKBRIDGE_STACKDRIVER_MAX_RETRIES",
        default_value_t = 0
    )]
    pub max_retries: u32,

    /// How long to wait for a result from the monitoring API.
    #[arg(
        long = "stackdriver.http-timeout",
        env = "STACKBRIDGE_STACKDRIVER_HTTP_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub http_timeout: Duration,

    /// Max time between requests in an exponential backoff scenario.
    #[arg(
        long = "stackdriver.max-backoff",
        env = "STACKBRIDGE_STACKDRIVER_MAX_BACKOFF",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub max_backoff: Duration,

    /// Amount of jitter to introduce in an exponential backoff scenario.
    #[arg(
        long = "stackdriver.backoff-jitter",
        env = "STACKBRIDGE_STACKDRIVER_BACKOFF_JITTER",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub backoff_jitter: Duration,

    /// HTTP status that triggers a retry. Repeatable.
    #[arg(
        long = "stackdriver.retry-statuses",
        env = "STACKBRIDGE_STACKDRIVER_RETRY_STATUSES",
        default_values_t = [503u16]
    )]
    pub retry_statuses: Vec<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long = "log.level", env = "STACKBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Initialize logging from the configured level; `RUST_LOG` wins when
    /// set.
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.clone()));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| BridgeError::config(format!("failed to initialize logging: {err}")))?;

        Ok(())
    }

    /// Fold flags (including legacy aliases) into the validated config
    /// tree.
    pub fn into_config(self) -> Result<Config> {
        if self.legacy_project_id.is_some() {
            tracing::warn!(
                "the google.project-id flag is deprecated; use google.project-ids instead"
            );
        }
        if self.legacy_metrics_prefixes.is_some() {
            tracing::warn!(
                "the monitoring.metrics-type-prefixes flag is deprecated; use monitoring.metrics-prefixes instead"
            );
        }

        let mut project_ids = self.project_ids.clone();
        if let Some(legacy) = &self.legacy_project_id {
            project_ids.extend(
                legacy
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(String::from),
            );
        }
        project_ids.sort();
        project_ids.dedup();

        let mut prefixes = self.metrics_prefixes.clone();
        if let Some(legacy) = &self.legacy_metrics_prefixes {
            prefixes.extend(
                legacy
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(String::from),
            );
        }
        let metrics_prefixes = parse_metric_prefixes(&prefixes);

        let mut extra_filters = Vec::new();
        for raw in &self.filters {
            match MetricFilter::parse(raw) {
                Some(filter) => extra_filters.push(filter),
                None => tracing::warn!(filter = %raw, "ignoring malformed monitoring filter"),
            }
        }

        let config = Config {
            web: WebConfig {
                listen_addresses: self.listen_addresses,
                telemetry_path: self.telemetry_path,
                stackdriver_telemetry_path: self.stackdriver_telemetry_path,
            },
            google: GoogleConfig {
                project_ids,
                projects_filter: self.projects_filter,
            },
            monitoring: MonitoringConfig {
                metrics_prefixes,
                interval: self.metrics_interval,
                offset: self.metrics_offset,
                ingest_delay: self.metrics_ingest_delay,
                extra_filters,
                aggregate_deltas: self.aggregate_deltas,
                aggregate_deltas_ttl: self.aggregate_deltas_ttl,
                descriptor_cache_ttl: self.descriptor_cache_ttl,
                descriptor_cache_only_google: self.descriptor_cache_only_google,
                drop_delegated_projects: self.drop_delegated_projects,
                fill_missing_labels: self.fill_missing_labels,
            },
            backoff: BackoffConfig {
                max_retries: self.max_retries,
                http_timeout: self.http_timeout,
                max_backoff: self.max_backoff,
                jitter_base: self.backoff_jitter,
                retry_statuses: self.retry_statuses,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Run the bridge: resolve credentials and projects, then serve scrapes
/// until interrupted.
pub async fn execute(cli: Cli) -> Result<()> {
    cli.init_logging()?;
    let mut config = cli.into_config()?;

    let tokens: Arc<dyn TokenProvider> = match std::env::var("STACKBRIDGE_ACCESS_TOKEN") {
        Ok(token) if !token.is_empty() => {
            tracing::info!("using access token from STACKBRIDGE_ACCESS_TOKEN");
            Arc::new(StaticToken::new(token))
        },
        _ => Arc::new(MetadataServerTokens::new(reqwest::Client::new())),
    };

    let mut project_ids = config.google.project_ids.clone();
    if let Some(filter) = &config.google.projects_filter {
        let projects_client = ProjectsClient::new(Arc::clone(&tokens), config.backoff.http_timeout)?;
        let resolved = projects_client.project_ids_from_filter(filter).await?;
        tracing::info!(count = resolved.len(), filter = %filter, "resolved projects from filter");
        project_ids.extend(resolved);
    }
    if project_ids.is_empty() {
        tracing::info!("no explicit project IDs; trying to discover the ambient project");
        project_ids.push(tokens.project_id().await?);
    }
    project_ids.sort();
    project_ids.dedup();
    config.google.project_ids = project_ids;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        projects = ?config.google.project_ids,
        prefixes = ?config.monitoring.metrics_prefixes,
        "starting stackbridge"
    );

    let client = Arc::new(GcpMonitoringClient::new(tokens, &config.backoff)?);
    let state = AppState::new(config, client)?;
    web::serve(state).await
}
