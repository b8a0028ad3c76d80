//! Six-parameter affine geotransforms, GDAL convention.
//!
//! A geotransform maps pixel coordinates `(col, row)` to world coordinates
//! `(x, y)`:
//!
//! ```text
//! x = gt[0] + col * gt[1] + row * gt[2]
//! y = gt[3] + col * gt[4] + row * gt[5]
//! ```
//!
//! For north-up images `gt[2]` and `gt[4]` are zero and `gt[5]` is negative.
//! These helpers are pure math so that planning code can be exercised without
//! opening any dataset.

use anyhow::{Result, ensure};

/// Affine transform coefficients in GDAL order.
pub type GeoTransform = [f64; 6];

/// Applies the transform to pixel coordinates, returning world `(x, y)`.
#[must_use]
pub fn apply_geo_transform(gt: &GeoTransform, col: f64, row: f64) -> (f64, f64) {
	(
		gt[0] + col * gt[1] + row * gt[2],
		gt[3] + col * gt[4] + row * gt[5],
	)
}

/// Computes the inverse transform, mapping world `(x, y)` back to pixel
/// coordinates.
///
/// # Errors
/// Returns an error if the transform is degenerate (zero determinant).
pub fn invert_geo_transform(gt: &GeoTransform) -> Result<GeoTransform> {
	let det = gt[1] * gt[5] - gt[2] * gt[4];
	ensure!(det.abs() > 1e-15, "geotransform {gt:?} is not invertible");
	let inv_det = 1.0 / det;

	Ok([
		(gt[2] * gt[3] - gt[0] * gt[5]) * inv_det,
		gt[5] * inv_det,
		-gt[2] * inv_det,
		(gt[0] * gt[4] - gt[1] * gt[3]) * inv_det,
		-gt[4] * inv_det,
		gt[1] * inv_det,
	])
}
