//! HTTP surface: the scrape router, per-request engine selection, and the
//! landing page.
//!
//! Two exposure paths may coincide or split. The telemetry path serves the
//! process registry (build info and whatever else is registered); the
//! stackdriver path drives a collection across the selected engines and
//! streams back the translated samples plus every engine's self-metrics.

pub mod exposition;

use crate::collector::cache::CollectorCache;
use crate::collector::descriptor_cache::{
    DescriptorCache, InMemoryDescriptorCache, NoopDescriptorCache, ProjectScopedCache,
    VendorOnlyCache,
};
use crate::collector::engine::{CollectionEngine, EngineOptions};
use crate::core::{BridgeError, Config, Result, parse_metric_prefixes};
use crate::delta::{CounterStore, HistogramStore};
use crate::gcp::client::MonitoringApi;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Gauge, Opts, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Process-wide state shared by every request.
pub struct AppState {
    config: Config,
    client: Arc<dyn MonitoringApi>,
    collectors: Arc<CollectorCache>,
    counter_store: Arc<CounterStore>,
    histogram_store: Arc<HistogramStore>,
    descriptor_cache: Arc<dyn DescriptorCache>,
    registry: Registry,
}

impl AppState {
    /// Build the shared state: registries, stores, and the engine cache.
    pub fn new(config: Config, client: Arc<dyn MonitoringApi>) -> Result<Arc<Self>> {
        let registry = Registry::new();
        let build_info = Gauge::with_opts(
            Opts::new("build_info", "Build information for this stackbridge binary.")
                .namespace("stackbridge")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        build_info.set(1.0);
        registry.register(Box::new(build_info))?;

        let ttl = CollectorCache::collector_ttl(
            config.monitoring.aggregate_deltas,
            config.monitoring.aggregate_deltas_ttl,
            config.monitoring.descriptor_cache_ttl,
        );
        tracing::info!(ttl_secs = ttl.as_secs(), "creating collector cache");

        let descriptor_cache: Arc<dyn DescriptorCache> =
            if config.monitoring.descriptor_cache_ttl.is_zero() {
                Arc::new(NoopDescriptorCache)
            } else {
                Arc::new(InMemoryDescriptorCache::new(
                    config.monitoring.descriptor_cache_ttl,
                ))
            };

        Ok(Arc::new(Self {
            collectors: CollectorCache::new(ttl),
            counter_store: Arc::new(CounterStore::new(config.monitoring.aggregate_deltas_ttl)),
            histogram_store: Arc::new(HistogramStore::new(config.monitoring.aggregate_deltas_ttl)),
            descriptor_cache,
            registry,
            config,
            client,
        }))
    }

    /// The validated configuration this state was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn engine_for(
        &self,
        project_id: &str,
        prefixes: Vec<String>,
    ) -> Result<Arc<CollectionEngine>> {
        let key = CollectorCache::key(project_id, &prefixes);
        if let Some(engine) = self.collectors.get(&key) {
            return Ok(engine);
        }

        let scoped: Arc<dyn DescriptorCache> = Arc::new(ProjectScopedCache::new(
            Arc::clone(&self.descriptor_cache),
            project_id,
        ));
        let cache: Arc<dyn DescriptorCache> =
            if self.config.monitoring.descriptor_cache_only_google {
                Arc::new(VendorOnlyCache::new(scoped))
            } else {
                scoped
            };

        let engine = CollectionEngine::new(
            project_id,
            Arc::clone(&self.client),
            cache,
            Arc::clone(&self.counter_store),
            Arc::clone(&self.histogram_store),
            EngineOptions {
                prefixes,
                extra_filters: self.config.monitoring.extra_filters.clone(),
                interval: self.config.monitoring.interval,
                offset: self.config.monitoring.offset,
                ingest_delay: self.config.monitoring.ingest_delay,
                fill_missing_labels: self.config.monitoring.fill_missing_labels,
                drop_delegated_projects: self.config.monitoring.drop_delegated_projects,
                aggregate_deltas: self.config.monitoring.aggregate_deltas,
            },
        )?;
        self.collectors.store(&key, Arc::clone(&engine));
        Ok(engine)
    }
}

/// Filters parsed from a scrape request's query string.
#[derive(Debug, Default, Clone)]
pub struct ScrapeQuery {
    /// `collect` parameters: sub-prefix filters.
    pub collect: Vec<String>,
    /// `project_ids` parameters: project restriction.
    pub project_ids: Vec<String>,
}

impl ScrapeQuery {
    fn from_params(params: &[(String, String)]) -> Self {
        let mut query = ScrapeQuery::default();
        for (key, value) in params {
            match key.as_str() {
                "collect" => query.collect.push(value.clone()),
                "project_ids" => query
                    .project_ids
                    .extend(value.split(',').filter(|v| !v.is_empty()).map(String::from)),
                _ => {},
            }
        }
        query
    }
}

/// Intersect configured prefixes with `collect` filters, the more specific
/// side winning, then re-apply prefix hygiene.
pub fn filter_prefixes(configured: &[String], collect: &[String]) -> Vec<String> {
    if collect.is_empty() {
        return configured.to_vec();
    }
    let mut selected = Vec::new();
    for prefix in configured {
        for candidate in collect {
            if candidate.starts_with(prefix.as_str()) {
                selected.push(candidate.clone());
            } else if prefix.starts_with(candidate.as_str()) {
                selected.push(prefix.clone());
            }
        }
    }
    parse_metric_prefixes(&selected)
}

/// Run one scrape across the selected engines and return the text body.
pub async fn scrape(state: &Arc<AppState>, query: &ScrapeQuery, include_runtime: bool) -> Result<String> {
    let prefixes = filter_prefixes(&state.config.monitoring.metrics_prefixes, &query.collect);

    let projects: Vec<String> = if query.project_ids.is_empty() {
        state.config.google.project_ids.clone()
    } else {
        state
            .config
            .google
            .project_ids
            .iter()
            .filter(|p| query.project_ids.contains(p))
            .cloned()
            .collect()
    };

    let mut engines = Vec::with_capacity(projects.len());
    for project in &projects {
        engines.push(state.engine_for(project, prefixes.clone())?);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::with_capacity(engines.len());
    for engine in &engines {
        let engine = Arc::clone(engine);
        let tx = tx.clone();
        handles.push(tokio::spawn(engine.collect(tx)));
    }
    drop(tx);

    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "scrape task failed");
        }
    }

    let mut families = exposition::build_families(records);
    let mut self_families = Vec::new();
    for engine in &engines {
        self_families.extend(engine.export_metrics());
    }
    families.extend(exposition::merge_families(self_families));
    if include_runtime {
        families.extend(state.registry.gather());
    }

    exposition::encode_text(&families)
}

/// Build the axum router for the configured paths.
pub fn router(state: Arc<AppState>) -> Router {
    let telemetry_path = state.config.web.telemetry_path.clone();
    let stackdriver_path = state.config.web.stackdriver_telemetry_path.clone();

    let mut router = Router::new();
    if telemetry_path == stackdriver_path {
        router = router.route(&stackdriver_path, get(merged_handler));
    } else {
        tracing::info!(path = %stackdriver_path, "serving stackdriver metrics at separate path");
        router = router
            .route(&stackdriver_path, get(stackdriver_handler))
            .route(&telemetry_path, get(telemetry_handler));
    }
    if telemetry_path != "/" && stackdriver_path != "/" {
        router = router.route("/", get(landing_handler));
    }

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn telemetry_handler(State(state): State<Arc<AppState>>) -> Response {
    match exposition::encode_text(&state.registry.gather()) {
        Ok(body) => metrics_response(body),
        Err(err) => error_response(err),
    }
}

async fn stackdriver_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let query = ScrapeQuery::from_params(&params);
    match scrape(&state, &query, false).await {
        Ok(body) => metrics_response(body),
        Err(err) => error_response(err),
    }
}

async fn merged_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let query = ScrapeQuery::from_params(&params);
    match scrape(&state, &query, true).await {
        Ok(body) => metrics_response(body),
        Err(err) => error_response(err),
    }
}

async fn landing_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let telemetry = &state.config.web.telemetry_path;
    let stackdriver = &state.config.web.stackdriver_telemetry_path;
    let mut links = format!("<li><a href=\"{telemetry}\">Metrics</a></li>");
    if telemetry != stackdriver {
        links.push_str(&format!(
            "<li><a href=\"{stackdriver}\">Stackdriver Metrics</a></li>"
        ));
    }
    Html(format!(
        "<html><head><title>Stackbridge</title></head><body>\
         <h1>Stackbridge</h1>\
         <p>Prometheus bridge for Google Cloud Monitoring</p>\
         <ul>{links}</ul>\
         </body></html>"
    ))
}

fn metrics_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, exposition::TEXT_FORMAT)],
        body,
    )
        .into_response()
}

fn error_response(err: BridgeError) -> Response {
    tracing::error!(error = %err, category = err.category(), "scrape request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

/// Turn a `:9255` style listen address into a bindable socket address.
pub fn normalize_listen_address(address: &str) -> Result<SocketAddr> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    };
    full.parse()
        .map_err(|err| BridgeError::config(format!("invalid listen address {address:?}: {err}")))
}

/// Bind every configured address and serve until interrupted.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let app = router(Arc::clone(&state));

    let mut listeners = Vec::new();
    for address in &state.config.web.listen_addresses {
        let address = normalize_listen_address(address)?;
        let listener = TcpListener::bind(address).await?;
        tracing::info!(%address, "listening");
        listeners.push(listener);
    }

    for listener in listeners {
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "server error");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal, stopping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_collect_filter_keeps_configured_prefixes() {
        let configured = strings(&["vendor.x/storage", "vendor.x/network"]);
        assert_eq!(filter_prefixes(&configured, &[]), configured);
    }

    #[test]
    fn more_specific_collect_wins() {
        let configured = strings(&["vendor.x/storage", "vendor.x/network"]);
        let collect = strings(&["vendor.x/storage/read"]);
        assert_eq!(
            filter_prefixes(&configured, &collect),
            strings(&["vendor.x/storage/read"])
        );
    }

    #[test]
    fn broader_collect_selects_configured_prefix() {
        let configured = strings(&["vendor.x/storage"]);
        let collect = strings(&["vendor.x"]);
        assert_eq!(
            filter_prefixes(&configured, &collect),
            strings(&["vendor.x/storage"])
        );
    }

    #[test]
    fn unrelated_collect_selects_nothing() {
        let configured = strings(&["vendor.x/storage"]);
        let collect = strings(&["other.y/cpu"]);
        assert!(filter_prefixes(&configured, &collect).is_empty());
    }

    #[test]
    fn scrape_query_parses_repeated_and_comma_forms() {
        let params = vec![
            ("collect".to_string(), "vendor.x/a".to_string()),
            ("collect".to_string(), "vendor.x/b".to_string()),
            ("project_ids".to_string(), "p1,p2".to_string()),
            ("project_ids".to_string(), "p3".to_string()),
            ("other".to_string(), "ignored".to_string()),
        ];
        let query = ScrapeQuery::from_params(&params);
        assert_eq!(query.collect, strings(&["vendor.x/a", "vendor.x/b"]));
        assert_eq!(query.project_ids, strings(&["p1", "p2", "p3"]));
    }

    #[test]
    fn listen_address_normalization() {
        assert_eq!(
            normalize_listen_address(":9255").unwrap(),
            "0.0.0.0:9255".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            normalize_listen_address("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(normalize_listen_address("not-an-address").is_err());
    }
}
