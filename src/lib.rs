//! Stackbridge - pull-mode bridge from Google Cloud Monitoring to
//! Prometheus.
//!
//! On each incoming scrape the bridge queries the Cloud Monitoring API
//! across one or more projects, retrieves the most recent sample of every
//! time series matching the configured metric-type prefixes, and emits
//! those samples in the Prometheus text exposition format with normalized
//! names and merged label sets.
//!
//! # Features
//!
//! - **Per-scrape collection**: descriptors and time series are fetched in
//!   parallel with retries, backoff, and per-request timeouts
//! - **DELTA aggregation**: optional in-memory accumulation of DELTA kinds
//!   into monotonic counters with TTL eviction
//! - **Label reconciliation**: label-schema skew within a metric name is
//!   padded out so every record exposes the same dimensions
//! - **Duplicate suppression**: identical (name, labels, timestamp) records
//!   from concurrent producers are dropped before emission
//! - **Engine caching**: fully constructed per-(project, prefix-set)
//!   engines are reused between scrapes with an idle TTL
//!
//! # Architecture
//!
//! - `gcp`: wire types, credentials, and the wrapped monitoring API client
//! - `collector`: the scrape pipeline (descriptor cache, translator,
//!   deduplicator, engine, engine cache)
//! - `delta`: counter and histogram accumulation stores
//! - `web`: axum router, exposition encoding, landing page
//! - `cli`: flag surface and startup sequencing

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod collector;
pub mod core;
pub mod delta;
pub mod gcp;
pub mod hash;
pub mod names;
pub mod web;

pub use crate::core::{BridgeError, Config, Result};
