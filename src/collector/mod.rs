//! The per-scrape collection pipeline: descriptor discovery, time-series
//! translation, duplicate suppression, and engine caching.

pub mod buckets;
pub mod cache;
pub mod dedup;
pub mod descriptor_cache;
pub mod engine;
pub mod sample;
pub mod series;

pub use cache::CollectorCache;
pub use dedup::Deduplicator;
pub use descriptor_cache::{
    DescriptorCache, InMemoryDescriptorCache, NoopDescriptorCache, ProjectScopedCache,
    VendorOnlyCache,
};
pub use engine::{CollectionEngine, EngineOptions};
pub use sample::{Buckets, ConstMetric, Emitted, FamilyKind, HistogramMetric, MetricSink};
pub use series::{TimeSeriesTranslator, TranslatorOptions};
