//! Cloud Monitoring API surface: wire types, credentials, and the wrapped
//! REST client the collection engine consumes.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{MetadataServerTokens, StaticToken, TokenProvider};
pub use client::{GcpMonitoringClient, MonitoringApi, ProjectsClient, project_resource};
