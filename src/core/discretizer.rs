//! Equal-frequency discretization of continuous sensor measurements.
//!
//! For each sensor type, the full value distribution observed across all transactions is sorted
//! and cut into `num_bins` ranges holding an equal share of the observations. Boundary points are
//! order statistics obtained by linear interpolation between adjacent sorted values, so for
//! `num_bins = k` every sensor type with at least one observation gets exactly `k + 1` boundaries
//! and `k` labeled ranges.
//!
//! Boundaries are computed once per mining run and are immutable afterwards; the encoder reads
//! them when one-hot encoding measurement ranges, and the rule deconstruction step reuses the
//! range labels.

use fxhash::FxHashMap;
use std::fmt;

/// A labeled measurement range of one sensor type, covering `[lo, hi]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeLabel {
    /// Measurement aspect the range belongs to (e.g. `pressure`).
    pub sensor_type: String,

    /// Lower boundary of the range.
    pub lo: f64,

    /// Upper boundary of the range.
    pub hi: f64,
}

impl fmt::Display for RangeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={},range={}_{}", self.sensor_type, self.lo, self.hi)
    }
}

/// Per-sensor-type discretization boundaries, held immutable for a mining run.
#[derive(Debug, Default)]
pub struct Discretizer {
    /// `num_bins + 1` boundary points per sensor type, ascending.
    boundaries: FxHashMap<String, Vec<f64>>,

    /// The number of bins each sensor type was cut into.
    num_bins: usize,
}

impl Discretizer {
    /// Computes equal-frequency boundaries for every sensor type with at least one observed
    /// value. Types with an empty value list are skipped entirely: they get no boundaries
    /// and no labels.
    pub fn fit(values_by_type: &FxHashMap<String, Vec<f64>>, num_bins: usize) -> Self {
        let mut boundaries = FxHashMap::default();
        for (sensor_type, values) in values_by_type {
            if values.is_empty() {
                continue;
            }
            boundaries.insert(
                sensor_type.clone(),
                equal_frequency_boundaries(values, num_bins),
            );
        }
        Self {
            boundaries,
            num_bins,
        }
    }

    /// Returns the number of bins per sensor type.
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Returns the boundary points for a sensor type, if it had any observed values.
    #[inline]
    pub fn boundaries(&self, sensor_type: &str) -> Option<&[f64]> {
        self.boundaries.get(sensor_type).map(Vec::as_slice)
    }

    /// Assigns a measurement to a bin: the first range (scanning in increasing order) with
    /// `boundary[i] <= value <= boundary[i + 1]` wins, so a value sitting exactly on a shared
    /// boundary lands in the lower-indexed bin. Values outside the fitted distribution are
    /// clamped to the outermost bins.
    pub fn bin_of(&self, sensor_type: &str, value: f64) -> Option<usize> {
        let cuts = self.boundaries.get(sensor_type)?;
        for index in 0..self.num_bins {
            if cuts[index] <= value && value <= cuts[index + 1] {
                return Some(index);
            }
        }
        Some(if value < cuts[0] { 0 } else { self.num_bins - 1 })
    }

    /// Returns the labeled range for a bin of a sensor type.
    pub fn label(&self, sensor_type: &str, bin: usize) -> Option<RangeLabel> {
        let cuts = self.boundaries.get(sensor_type)?;
        if bin >= self.num_bins {
            return None;
        }
        Some(RangeLabel {
            sensor_type: sensor_type.to_string(),
            lo: cuts[bin],
            hi: cuts[bin + 1],
        })
    }

    /// Returns all `num_bins` labeled ranges for a sensor type.
    pub fn labels(&self, sensor_type: &str) -> Option<Vec<RangeLabel>> {
        let cuts = self.boundaries.get(sensor_type)?;
        Some(
            cuts.windows(2)
                .map(|pair| RangeLabel {
                    sensor_type: sensor_type.to_string(),
                    lo: pair[0],
                    hi: pair[1],
                })
                .collect(),
        )
    }
}

/// Computes `num_bins + 1` equal-frequency boundary points over the given values.
///
/// Boundary `i` is the value at the `i / num_bins`-th percentile of the sorted values, linearly
/// interpolated between adjacent order statistics and clamped to the observed extremes. If all
/// values are identical the boundaries degenerate to repeated points, which is permitted.
pub fn equal_frequency_boundaries(values: &[f64], num_bins: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();

    (0..=num_bins)
        .map(|i| {
            let position = i as f64 * n as f64 / num_bins as f64;
            if position >= (n - 1) as f64 {
                sorted[n - 1]
            } else {
                let lower = position.floor() as usize;
                let fraction = position - lower as f64;
                sorted[lower] + fraction * (sorted[lower + 1] - sorted[lower])
            }
        })
        .collect()
}
