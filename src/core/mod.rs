//! Core configuration, error, and retry building blocks.

pub mod config;
pub mod error;
pub mod retry;

pub use config::{
    BackoffConfig, Config, GoogleConfig, MetricFilter, MonitoringConfig, WebConfig,
    parse_metric_prefixes,
};
pub use error::{BridgeError, Result};
pub use retry::RetryPolicy;
