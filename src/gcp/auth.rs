//! Credentials for the Cloud Monitoring API.
//!
//! The bridge only needs a bearer token scoped for monitoring reads plus,
//! when no projects are configured, the ambient project ID. Both come from
//! the GCE metadata server in the normal deployment; a static token provider
//! covers local runs and tests.

use crate::core::{BridgeError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

// Refresh slightly before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens and the ambient project ID.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token.
    async fn access_token(&self) -> Result<String>;

    /// The project the credentials belong to.
    async fn project_id(&self) -> Result<String>;
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token provider backed by the GCE metadata server.
pub struct MetadataServerTokens {
    http: reqwest::Client,
    base_url: String,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl MetadataServerTokens {
    /// Create a provider against the standard metadata endpoint.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, METADATA_BASE)
    }

    /// Create a provider against a custom endpoint (tests).
    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BridgeError::auth(format!(
                "metadata server returned status {} for {path}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TokenProvider for MetadataServerTokens {
    async fn access_token(&self) -> Result<String> {
        if let Some(cached) = self.cached.lock().clone() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token);
            }
        }

        let token: TokenResponse = self
            .fetch("instance/service-accounts/default/token")
            .await?
            .json()
            .await?;
        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *self.cached.lock() = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn project_id(&self) -> Result<String> {
        let project = self.fetch("project/project-id").await?.text().await?;
        let project = project.trim().to_string();
        if project.is_empty() {
            return Err(BridgeError::auth(
                "metadata server returned an empty project id",
            ));
        }
        Ok(project)
    }
}

/// Fixed-token provider for local runs and tests.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wrap an externally obtained access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    async fn project_id(&self) -> Result<String> {
        Err(BridgeError::auth(
            "project discovery is unavailable with a static token; configure google.project-ids",
        ))
    }
}
