//! Pixel-space blocks and read tasks.
//!
//! A [`BlockSpec`] is a rectangle in some raster's pixel coordinate system.
//! Output blocks always have a non-negative origin; a block re-expressed in an
//! *input's* coordinates may start before the input's first pixel or reach past
//! its last one — readers clip and pad accordingly.

use crate::types::geo::{GeoTransform, apply_geo_transform, invert_geo_transform};
use crate::types::image_info::ImageInfo;
use anyhow::Result;
use std::fmt;

/// A rectangular tile of a raster, in pixel coordinates.
///
/// Equal and hashable by all four fields, so it can serve as a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSpec {
	/// First row of the block.
	pub top: i64,
	/// First column of the block.
	pub left: i64,
	/// Width in pixels.
	pub xsize: i64,
	/// Height in pixels.
	pub ysize: i64,
}

impl BlockSpec {
	#[must_use]
	pub fn new(top: i64, left: i64, xsize: i64, ysize: i64) -> BlockSpec {
		BlockSpec { top, left, xsize, ysize }
	}

	/// One past the last column.
	#[must_use]
	pub fn right(&self) -> i64 {
		self.left + self.xsize
	}

	/// One past the last row.
	#[must_use]
	pub fn bottom(&self) -> i64 {
		self.top + self.ysize
	}

	/// Re-expresses this block (given in the pixel coordinates of `out_gt`) in
	/// the pixel coordinates of the raster described by `info`.
	///
	/// The outer corners are pushed through `out_gt` into world coordinates and
	/// pulled back through the inverse of the input's geotransform. Both grids
	/// are assumed to live in the same projection. Returns
	/// `(left, top, right, bottom)` rounded to the nearest integer pixel.
	pub fn to_file_pixel_coords(&self, out_gt: &GeoTransform, info: &ImageInfo) -> Result<(i64, i64, i64, i64)> {
		let (x_left, y_top) = apply_geo_transform(out_gt, self.left as f64, self.top as f64);
		let (x_right, y_bottom) = apply_geo_transform(out_gt, self.right() as f64, self.bottom() as f64);

		let inv = invert_geo_transform(&info.transform)?;
		let (file_left, file_top) = apply_geo_transform(&inv, x_left, y_top);
		let (file_right, file_bottom) = apply_geo_transform(&inv, x_right, y_bottom);

		Ok((
			file_left.round() as i64,
			file_top.round() as i64,
			file_right.round() as i64,
			file_bottom.round() as i64,
		))
	}
}

impl fmt::Display for BlockSpec {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} {} {} {}", self.top, self.left, self.xsize, self.ysize)
	}
}

/// Everything a reader needs to produce one input block: which output block it
/// belongs to, which input it comes from (index into the job's file list), and
/// the block's rectangle in that input's pixel coordinates.
#[derive(Debug, Clone)]
pub struct BlockReadTask {
	pub outblock: BlockSpec,
	pub file_id: usize,
	pub inblock: BlockSpec,
}
