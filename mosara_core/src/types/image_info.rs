//! Geometry snapshots of rasters and the synthesized output grid.

use crate::types::geo::GeoTransform;
use crate::types::pixel::RasterType;
use anyhow::{Result, ensure};
use std::path::{Path, PathBuf};

/// Everything the planner needs to know about one raster, captured once when
/// the job starts. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct ImageInfo {
	pub path: PathBuf,
	pub nrows: usize,
	pub ncols: usize,
	/// Pixel → world transform, GDAL convention.
	pub transform: GeoTransform,
	/// Projection as WKT.
	pub projection: String,
	/// Pixel type of band 1.
	pub dtype: RasterType,
	pub num_bands: usize,
	/// No-data value of band 1, if any.
	pub null_val: Option<f64>,
	/// Per-band `LAYER_TYPE` metadata (thematic/athematic), if present.
	pub layer_types: Vec<Option<String>>,
}

impl ImageInfo {
	/// Captures the geometry of the raster at `path` through the backend.
	pub fn open(path: &Path) -> Result<ImageInfo> {
		crate::backend::open_image_info(path)
	}

	/// Western edge of the raster in world coordinates.
	#[must_use]
	pub fn x_min(&self) -> f64 {
		self.transform[0]
	}

	/// Eastern edge of the raster in world coordinates.
	#[must_use]
	pub fn x_max(&self) -> f64 {
		self.transform[0] + self.ncols as f64 * self.transform[1]
	}

	/// Northern edge of the raster in world coordinates.
	#[must_use]
	pub fn y_max(&self) -> f64 {
		self.transform[3]
	}

	/// Southern edge of the raster in world coordinates.
	#[must_use]
	pub fn y_min(&self) -> f64 {
		self.transform[3] + self.nrows as f64 * self.transform[5]
	}

	/// Pixel width in world units.
	#[must_use]
	pub fn x_res(&self) -> f64 {
		self.transform[1]
	}

	/// Pixel height in world units (positive).
	#[must_use]
	pub fn y_res(&self) -> f64 {
		self.transform[5].abs()
	}
}

/// The synthesized geometry of the mosaic output: the union of all input
/// bounds on the first input's pixel grid.
#[derive(Debug, Clone)]
pub struct OutputGrid {
	pub nrows: usize,
	pub ncols: usize,
	pub transform: GeoTransform,
	pub projection: String,
	pub dtype: RasterType,
	pub num_bands: usize,
	pub null_val: Option<f64>,
	pub layer_types: Vec<Option<String>>,
}

impl OutputGrid {
	/// Builds the output grid from the input list.
	///
	/// World bounds are the union of the input bounds; pixel size, projection,
	/// pixel type, band count and `LAYER_TYPE` metadata come from the first
	/// input. The no-data value is `null_override` when given, otherwise the
	/// first input's.
	///
	/// # Errors
	/// Fails on an empty input list.
	pub fn build(inputs: &[ImageInfo], null_override: Option<f64>) -> Result<OutputGrid> {
		ensure!(!inputs.is_empty(), "cannot build an output grid from no inputs");

		let x_min = inputs.iter().map(ImageInfo::x_min).fold(f64::INFINITY, f64::min);
		let x_max = inputs.iter().map(ImageInfo::x_max).fold(f64::NEG_INFINITY, f64::max);
		let y_min = inputs.iter().map(ImageInfo::y_min).fold(f64::INFINITY, f64::min);
		let y_max = inputs.iter().map(ImageInfo::y_max).fold(f64::NEG_INFINITY, f64::max);

		let first = &inputs[0];
		let (x_res, y_res) = (first.x_res(), first.y_res());

		Ok(OutputGrid {
			nrows: ((y_max - y_min) / y_res).round() as usize,
			ncols: ((x_max - x_min) / x_res).round() as usize,
			transform: [x_min, x_res, 0.0, y_max, 0.0, -y_res],
			projection: first.projection.clone(),
			dtype: first.dtype,
			num_bands: first.num_bands,
			null_val: null_override.or(first.null_val),
			layer_types: first.layer_types.clone(),
		})
	}

	/// The value written into pixels no input covers.
	#[must_use]
	pub fn fill_value(&self) -> f64 {
		self.null_val.unwrap_or(0.0)
	}
}
