//! Streaming per-band statistics.

use crate::types::PixelBlock;

/// Final statistics of one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
	pub min: f64,
	pub max: f64,
	pub mean: f64,
	pub stddev: f64,
	pub count: u64,
}

/// Accumulates min/max/sum/sum-of-squares/count over every written block,
/// skipping no-data pixels. Sums run in `f64`.
#[derive(Debug)]
pub struct StatsAccumulator {
	null_val: Option<f64>,
	min: Option<f64>,
	max: Option<f64>,
	sum: f64,
	sumsq: f64,
	count: u64,
}

impl StatsAccumulator {
	#[must_use]
	pub fn new(null_val: Option<f64>) -> StatsAccumulator {
		StatsAccumulator {
			null_val,
			min: None,
			max: None,
			sum: 0.0,
			sumsq: 0.0,
			count: 0,
		}
	}

	/// Folds one written block into the running statistics.
	///
	/// Valid pixels are: all of them when no no-data value is set, the
	/// non-NaN ones when the no-data value is NaN, and those different from
	/// the no-data value otherwise.
	pub fn update(&mut self, block: &PixelBlock) {
		let null_val = self.null_val;
		block.for_each_value(|v| {
			let valid = match null_val {
				None => true,
				Some(n) if n.is_nan() => !v.is_nan(),
				Some(n) => v != n,
			};
			if valid {
				self.sum += v;
				self.sumsq += v * v;
				self.count += 1;
				self.min = Some(self.min.map_or(v, |m| m.min(v)));
				self.max = Some(self.max.map_or(v, |m| m.max(v)));
			}
		});
	}

	/// Returns the final statistics, or `None` when no valid pixel was seen.
	///
	/// Variance is computed as `E[X²] − E[X]²` and clipped at zero before the
	/// square root, so rounding can never produce a NaN stddev.
	#[must_use]
	pub fn finish(&self) -> Option<BandStats> {
		if self.count == 0 {
			return None;
		}
		let count = self.count as f64;
		let mean = self.sum / count;
		let variance = (self.sumsq / count - mean * mean).max(0.0);
		Some(BandStats {
			min: self.min.unwrap_or(f64::NAN),
			max: self.max.unwrap_or(f64::NAN),
			mean,
			stddev: variance.sqrt(),
			count: self.count,
		})
	}
}
