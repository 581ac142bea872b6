//! In-memory accumulation of DELTA samples into monotonic totals.
//!
//! The source reports DELTA metrics as per-window differences, which
//! Prometheus cannot rate() over directly. These stores sum successive
//! windows per series key and keep exporting the running total until the
//! entry outlives its TTL.

pub mod counter;
pub mod histogram;

pub use counter::CounterStore;
pub use histogram::HistogramStore;

use crate::hash;

/// Series key inside one descriptor entry: hash of the fully qualified name
/// plus the sorted `key:value` label pairs.
pub(crate) fn series_key(fq_name: &str, label_keys: &[String], label_values: &[String]) -> u64 {
    let mut pairs: Vec<String> = label_keys
        .iter()
        .zip(label_values.iter())
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
    pairs.sort();
    let text = format!("{fq_name}|{}", pairs.join("|"));
    hash::add(hash::new(), &text)
}
