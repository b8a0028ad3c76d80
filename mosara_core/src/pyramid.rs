//! Streaming overview (pyramid) writes.
//!
//! The output is created with an empty overview hierarchy; every block the
//! writer commits is immediately sub-sampled into each level, so no separate
//! overview pass over the finished mosaic is needed. Aggregation is
//! nearest-neighbour only.

use crate::backend::OutputDataset;
use crate::types::PixelBlock;
use anyhow::Result;

/// Overviews stop once the decimated raster fits within this many pixels.
const FINAL_OVERVIEW_SIZE: usize = 1024;

/// The overview decimation factors for an output of the given size: powers of
/// two starting at 4, while the decimated size stays at or above
/// [`FINAL_OVERVIEW_SIZE`].
#[must_use]
pub fn overview_levels(ncols: usize, nrows: usize) -> Vec<i32> {
	let out_size = ncols.max(nrows);
	let mut levels = Vec::new();
	let mut exponent = 2u32;
	while out_size / 2usize.pow(exponent) >= FINAL_OVERVIEW_SIZE {
		levels.push(2i32.pow(exponent));
		exponent += 1;
	}
	levels
}

/// Sub-samples one freshly written block into every overview level of a band.
///
/// For level `L` the block is decimated by taking every `L`-th pixel starting
/// at offset `L/2`, placed at `(left/L, top/L)` in the overview image, and
/// cropped to the overview bounds.
pub fn write_block_pyramids(
	out: &mut OutputDataset,
	band_num: usize,
	block: &PixelBlock,
	left: i64,
	top: i64,
) -> Result<()> {
	let levels = out.overview_levels().to_vec();
	for (overview_index, level) in levels.into_iter().enumerate() {
		let level = level as i64;
		let sub = block.subsample(level as usize);

		let left_sub = left / level;
		let top_sub = top / level;

		// Clamp to the overview image; the bottom-right block may stick out.
		let (ov_cols, ov_rows) = out.overview_size(band_num, overview_index)?;
		let ncols = (ov_cols as i64 - left_sub).max(0) as usize;
		let nrows = (ov_rows as i64 - top_sub).max(0) as usize;
		let sub = sub.crop(nrows, ncols);
		if sub.is_empty() {
			continue;
		}

		out.write_overview_block(band_num, overview_index, &sub, left_sub, top_sub)?;
	}
	Ok(())
}
