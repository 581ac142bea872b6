//! The wrapped Cloud Monitoring API client.
//!
//! `MonitoringApi` is the seam the collection engine talks through: one
//! method per paginated list endpoint, one call per page. The production
//! implementation layers bearer auth, a per-request timeout, and the
//! configured retry policy over reqwest; tests substitute fixtures.

use crate::core::{BackoffConfig, BridgeError, Result, RetryPolicy};
use crate::gcp::auth::TokenProvider;
use crate::gcp::types::{
    ListMetricDescriptorsResponse, ListProjectsResponse, ListTimeSeriesResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;

const MONITORING_BASE: &str = "https://monitoring.googleapis.com/v3";
const RESOURCE_MANAGER_BASE: &str = "https://cloudresourcemanager.googleapis.com/v1";

/// Project resource path used by the v3 API.
pub fn project_resource(project_id: &str) -> String {
    format!("projects/{project_id}")
}

/// Contract of the source monitoring API as consumed by the engine.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// Fetch one page of metric descriptors matching `filter`.
    async fn list_metric_descriptors(
        &self,
        project_id: &str,
        filter: &str,
        page_token: Option<&str>,
    ) -> Result<ListMetricDescriptorsResponse>;

    /// Fetch one page of time series matching `filter` in `[start, end]`.
    async fn list_time_series(
        &self,
        project_id: &str,
        filter: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<ListTimeSeriesResponse>;
}

/// Production client for the Cloud Monitoring REST API.
pub struct GcpMonitoringClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GcpMonitoringClient {
    /// Build a client from the backoff configuration.
    pub fn new(tokens: Arc<dyn TokenProvider>, backoff: &BackoffConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(backoff.http_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: MONITORING_BASE.to_string(),
            tokens,
            retry: RetryPolicy::new(backoff),
            timeout: backoff.http_timeout,
        })
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BridgeError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    fn map_transport(&self, err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            BridgeError::Transport(err)
        }
    }
}

#[async_trait]
impl MonitoringApi for GcpMonitoringClient {
    async fn list_metric_descriptors(
        &self,
        project_id: &str,
        filter: &str,
        page_token: Option<&str>,
    ) -> Result<ListMetricDescriptorsResponse> {
        let url = format!(
            "{}/{}/metricDescriptors",
            self.base_url,
            project_resource(project_id)
        );
        let mut query = vec![("filter", filter.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.retry.run(|| self.get_json(&url, &query)).await
    }

    async fn list_time_series(
        &self,
        project_id: &str,
        filter: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<ListTimeSeriesResponse> {
        let url = format!(
            "{}/{}/timeSeries",
            self.base_url,
            project_resource(project_id)
        );
        let mut query = vec![
            ("filter", filter.to_string()),
            (
                "interval.startTime",
                start.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            (
                "interval.endTime",
                end.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            ("view", "FULL".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.retry.run(|| self.get_json(&url, &query)).await
    }
}

/// Minimal projects-listing client used to resolve
/// `--google.projects.filter` at startup.
pub struct ProjectsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ProjectsClient {
    /// Build a client over the shared token provider.
    pub fn new(tokens: Arc<dyn TokenProvider>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: RESOURCE_MANAGER_BASE.to_string(),
            tokens,
        })
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Resolve all project IDs matching the search filter.
    pub async fn project_ids_from_filter(&self, filter: &str) -> Result<Vec<String>> {
        let mut project_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.tokens.access_token().await?;
            let mut query = vec![("filter", filter.to_string())];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token.to_string()));
            }
            let response = self
                .http
                .get(format!("{}/projects", self.base_url))
                .query(&query)
                .bearer_auth(token)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(BridgeError::Upstream {
                    status: status.as_u16(),
                    message,
                });
            }
            let page: ListProjectsResponse = response.json().await?;
            project_ids.extend(page.projects.into_iter().map(|p| p.project_id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(project_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_resource_path() {
        assert_eq!(project_resource("my-project"), "projects/my-project");
    }
}
