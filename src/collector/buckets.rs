//! Conversion of source distribution layouts into cumulative,
//! Prometheus-compatible bucket maps.

use crate::collector::sample::Buckets;
use crate::core::{BridgeError, Result};
use crate::gcp::types::Distribution;

/// Expand a distribution's bucket layout into cumulative buckets keyed by
/// upper bound.
///
/// The source sends per-bucket counts with implicit lower bounds; Prometheus
/// wants cumulative counts from zero. The final bucket is always `+inf`, and
/// bounds past the end of the count list inherit the running total.
pub fn histogram_buckets(dist: &Distribution) -> Result<Buckets> {
    let options = dist
        .bucket_options
        .as_ref()
        .ok_or_else(|| BridgeError::unsupported("distribution without bucket options"))?;

    let mut bounds: Vec<f64>;
    if let Some(explicit) = &options.explicit_buckets {
        bounds = Vec::with_capacity(explicit.bounds.len() + 1);
        bounds.extend_from_slice(&explicit.bounds);
    } else if let Some(linear) = &options.linear_buckets {
        let num = linear.num_finite_buckets.max(0) as usize;
        bounds = Vec::with_capacity(num + 2);
        for i in 0..=num {
            bounds.push(linear.offset + (i as f64) * linear.width);
        }
    } else if let Some(exponential) = &options.exponential_buckets {
        let num = exponential.num_finite_buckets.max(0) as usize;
        bounds = Vec::with_capacity(num + 2);
        for i in 0..=num {
            bounds.push(exponential.scale * exponential.growth_factor.powi(i as i32));
        }
    } else {
        return Err(BridgeError::unsupported("unknown distribution buckets"));
    }
    bounds.push(f64::INFINITY);

    let mut buckets = Buckets::new();
    let mut cumulative: u64 = 0;
    for (i, bound) in bounds.iter().enumerate() {
        if let Some(count) = dist.bucket_counts.get(i) {
            cumulative += u64::try_from(*count).unwrap_or(0);
        }
        buckets.set(*bound, cumulative);
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::types::{
        BucketOptions, ExplicitBuckets, ExponentialBuckets, LinearBuckets,
    };

    fn explicit(bounds: Vec<f64>, counts: Vec<i64>) -> Distribution {
        Distribution {
            count: counts.iter().sum(),
            mean: 1.0,
            bucket_counts: counts,
            bucket_options: Some(BucketOptions {
                explicit_buckets: Some(ExplicitBuckets { bounds }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn explicit_bounds_become_cumulative() {
        let dist = explicit(vec![1.0, 5.0, 10.0], vec![2, 3, 0, 1]);
        let buckets = histogram_buckets(&dist).unwrap();
        assert_eq!(buckets.get(1.0), Some(2));
        assert_eq!(buckets.get(5.0), Some(5));
        assert_eq!(buckets.get(10.0), Some(5));
        assert_eq!(buckets.get(f64::INFINITY), Some(6));
    }

    #[test]
    fn linear_layout_bounds() {
        let dist = Distribution {
            count: 0,
            mean: 0.0,
            bucket_counts: vec![],
            bucket_options: Some(BucketOptions {
                linear_buckets: Some(LinearBuckets {
                    num_finite_buckets: 4,
                    offset: 0.0,
                    width: 10.0,
                }),
                ..Default::default()
            }),
        };
        let buckets = histogram_buckets(&dist).unwrap();
        let bounds: Vec<f64> = buckets.iter().map(|(b, _)| b).collect();
        assert_eq!(bounds, vec![0.0, 10.0, 20.0, 30.0, 40.0, f64::INFINITY]);
    }

    #[test]
    fn exponential_layout_bounds() {
        let dist = Distribution {
            count: 0,
            mean: 0.0,
            bucket_counts: vec![],
            bucket_options: Some(BucketOptions {
                exponential_buckets: Some(ExponentialBuckets {
                    num_finite_buckets: 3,
                    scale: 2.0,
                    growth_factor: 3.0,
                }),
                ..Default::default()
            }),
        };
        let buckets = histogram_buckets(&dist).unwrap();
        let bounds: Vec<f64> = buckets.iter().map(|(b, _)| b).collect();
        assert_eq!(bounds, vec![2.0, 6.0, 18.0, 54.0, f64::INFINITY]);
    }

    #[test]
    fn missing_tail_counts_inherit_total() {
        let dist = explicit(vec![1.0, 5.0, 10.0], vec![2, 3]);
        let buckets = histogram_buckets(&dist).unwrap();
        assert_eq!(buckets.get(10.0), Some(5));
        assert_eq!(buckets.get(f64::INFINITY), Some(5));
    }

    #[test]
    fn cumulativity_holds() {
        let dist = explicit(vec![0.5, 1.0, 2.0, 4.0], vec![1, 0, 7, 2, 3]);
        let buckets = histogram_buckets(&dist).unwrap();
        let mut previous = 0;
        for (_, count) in buckets.iter() {
            assert!(count >= previous);
            previous = count;
        }
        assert_eq!(buckets.get(f64::INFINITY), Some(13));
    }

    #[test]
    fn missing_options_are_unsupported() {
        let dist = Distribution {
            count: 1,
            mean: 1.0,
            bucket_counts: vec![1],
            bucket_options: None,
        };
        assert!(histogram_buckets(&dist).is_err());

        let empty_options = Distribution {
            bucket_options: Some(BucketOptions::default()),
            ..dist
        };
        assert!(histogram_buckets(&empty_options).is_err());
    }
}
