//! Value histograms over a variable slice.

use tracing::{debug, instrument};

use multidim_common::{MultidimError, MultidimResult};

use crate::opener::DatasetHandle;
use crate::types::{HistogramBucket, HistogramOptions, HistogramResult, SliceData};

/// Read `variable` through `handle` and bucket its values.
#[instrument(skip(handle, options), fields(bins = options.bins))]
pub async fn histogram(
    handle: &dyn DatasetHandle,
    variable: &str,
    options: &HistogramOptions,
) -> MultidimResult<HistogramResult> {
    if options.bins == 0 {
        return Err(MultidimError::invalid_parameter("bins", "must be at least 1"));
    }

    handle.metadata().variable(variable)?;
    let slice = handle.read_slice(variable, &options.selection).await?;
    let result = compute(variable, &slice, options.bins, options.max_samples);

    debug!(
        sampled = result.sampled,
        skipped = result.skipped,
        buckets = result.buckets.len(),
        "Computed histogram"
    );
    Ok(result)
}

/// Bucket the values of a slice.
///
/// Values are subsampled with a uniform stride to at most `max_samples`,
/// NaN and the no-data value are skipped, and the observed range is split
/// into `bins` equal-width buckets. Every bucket is `[lower, upper)` except
/// the last, which is closed. Constant data gives one `[v, v]` bucket; no
/// valid data gives no buckets.
pub fn compute(variable: &str, slice: &SliceData, bins: usize, max_samples: usize) -> HistogramResult {
    let bins = bins.max(1);
    let stride = stride_for(slice.values.len(), max_samples);

    let mut valid = Vec::with_capacity(slice.values.len() / stride + 1);
    let mut skipped = 0u64;
    for &v in slice.values.iter().step_by(stride) {
        if is_missing(v, slice.nodata) {
            skipped += 1;
        } else {
            valid.push(v);
        }
    }

    let mut result = HistogramResult {
        variable: variable.to_string(),
        buckets: Vec::new(),
        sampled: valid.len() as u64,
        skipped,
        min: None,
        max: None,
    };

    if valid.is_empty() {
        return result;
    }

    let (min, max) = valid
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    result.min = Some(min);
    result.max = Some(max);

    if min == max {
        result.buckets.push(HistogramBucket {
            lower: min,
            upper: max,
            count: valid.len() as u64,
        });
        return result;
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0u64; bins];
    for v in &valid {
        let index = (((v - min) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }

    result.buckets = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBucket {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count,
        })
        .collect();
    result
}

fn stride_for(len: usize, max_samples: usize) -> usize {
    if max_samples == 0 || len <= max_samples {
        1
    } else {
        len.div_ceil(max_samples)
    }
}

fn is_missing(v: f64, nodata: Option<f64>) -> bool {
    if v.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => v == nd,
        None => false,
    }
}
