//! Per-prefix caching of metric descriptor lists.
//!
//! Descriptor listings change rarely but cost one upstream call per page on
//! every scrape. Entries expire on an absolute TTL and are cleared lazily at
//! lookup. Variants: a no-op cache for TTL zero, a project-scoped view so
//! one process-wide cache can serve many engines, and a vendor-only policy
//! that refuses to cache custom-metric prefixes.

use crate::gcp::types::MetricDescriptor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Domain suffix shared by the vendor's canonical metric types.
pub const VENDOR_SUFFIX: &str = ".googleapis.com";

/// Cache of descriptor lists keyed by metric-type prefix.
pub trait DescriptorCache: Send + Sync {
    /// Return the cached list for a prefix, or `None` when absent or
    /// expired.
    fn lookup(&self, prefix: &str) -> Option<Vec<MetricDescriptor>>;

    /// Store a list for a prefix.
    fn store(&self, prefix: &str, descriptors: Vec<MetricDescriptor>);
}

/// Cache that never holds anything; used when the TTL is zero.
pub struct NoopDescriptorCache;

impl DescriptorCache for NoopDescriptorCache {
    fn lookup(&self, _prefix: &str) -> Option<Vec<MetricDescriptor>> {
        None
    }

    fn store(&self, _prefix: &str, _descriptors: Vec<MetricDescriptor>) {}
}

struct CacheEntry {
    descriptors: Vec<MetricDescriptor>,
    expires_at: Instant,
}

/// Mutex-guarded in-memory cache with per-entry absolute expiry.
pub struct InMemoryDescriptorCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl InMemoryDescriptorCache {
    /// Create a cache whose entries expire `ttl` after being stored.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl DescriptorCache for InMemoryDescriptorCache {
    fn lookup(&self, prefix: &str) -> Option<Vec<MetricDescriptor>> {
        let mut entries = self.entries.lock();
        match entries.get(prefix) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Some(entry.descriptors.clone())
            },
            Some(_) => {
                entries.remove(prefix);
                None
            },
            None => None,
        }
    }

    fn store(&self, prefix: &str, descriptors: Vec<MetricDescriptor>) {
        self.entries.lock().insert(
            prefix.to_string(),
            CacheEntry {
                descriptors,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// View of a shared cache namespaced by project, so identical prefixes from
/// different projects never collide.
pub struct ProjectScopedCache {
    inner: Arc<dyn DescriptorCache>,
    project_id: String,
}

impl ProjectScopedCache {
    /// Scope `inner` to one project.
    pub fn new(inner: Arc<dyn DescriptorCache>, project_id: impl Into<String>) -> Self {
        Self {
            inner,
            project_id: project_id.into(),
        }
    }

    fn scoped(&self, prefix: &str) -> String {
        format!("{}:{prefix}", self.project_id)
    }
}

impl DescriptorCache for ProjectScopedCache {
    fn lookup(&self, prefix: &str) -> Option<Vec<MetricDescriptor>> {
        self.inner.lookup(&self.scoped(prefix))
    }

    fn store(&self, prefix: &str, descriptors: Vec<MetricDescriptor>) {
        self.inner.store(&self.scoped(prefix), descriptors);
    }
}

/// Policy wrapper admitting only prefixes under the vendor's domain.
///
/// Custom and user-defined metric types churn far more than canonical ones;
/// refusing to cache them keeps the cache from growing with tenant count.
pub struct VendorOnlyCache {
    inner: Arc<dyn DescriptorCache>,
}

impl VendorOnlyCache {
    /// Wrap an inner cache with the vendor-only admission policy.
    pub fn new(inner: Arc<dyn DescriptorCache>) -> Self {
        Self { inner }
    }

    fn admits(prefix: &str) -> bool {
        prefix
            .split('/')
            .next()
            .is_some_and(|domain| domain.ends_with(VENDOR_SUFFIX))
    }
}

impl DescriptorCache for VendorOnlyCache {
    fn lookup(&self, prefix: &str) -> Option<Vec<MetricDescriptor>> {
        if !Self::admits(prefix) {
            return None;
        }
        self.inner.lookup(prefix)
    }

    fn store(&self, prefix: &str, descriptors: Vec<MetricDescriptor>) {
        if !Self::admits(prefix) {
            return;
        }
        self.inner.store(prefix, descriptors);
    }
}
