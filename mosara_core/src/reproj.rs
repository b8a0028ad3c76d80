//! Projection handling ahead of the pipeline.
//!
//! The mosaic core only works on inputs that share projection, pixel size and
//! grid alignment. When the caller requests an output projection, every input
//! is reprojected into a scratch directory first and the warped copies take
//! the inputs' place; otherwise the inputs are verified and rejected with a
//! [`MosaicError::ProjectionMismatch`] if they disagree.

use crate::backend::{self, WarpRequest};
use crate::error::MosaicError;
use crate::mosaic::MosaicOptions;
use crate::types::ImageInfo;
use anyhow::{Context, Result, bail, ensure};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use std::path::Path;
use tempfile::TempDir;

/// Grid offsets within this fraction of a pixel count as aligned.
const ALIGNMENT_TOLERANCE: f64 = 1e-4;

/// The input list after projection handling. When inputs were reprojected,
/// `scratch` owns the directory holding the warped temporaries; it must stay
/// alive until the mosaic has been written.
pub struct Preprocessed {
	pub inputs: Vec<ImageInfo>,
	pub scratch: Option<TempDir>,
}

/// Verifies or unifies the projections of all inputs, per the run options.
pub fn handle_projections(inputs: Vec<ImageInfo>, options: &MosaicOptions) -> Result<Preprocessed> {
	if !reprojection_requested(options) {
		check_input_projections(&inputs)?;
		return Ok(Preprocessed { inputs, scratch: None });
	}

	let scratch = TempDir::with_prefix("mosara_").context("cannot create scratch directory for reprojection")?;
	log::info!("reprojecting {} inputs into {}", inputs.len(), scratch.path().display());
	let inputs = make_warped_inputs(&inputs, options, scratch.path())?;
	Ok(Preprocessed {
		inputs,
		scratch: Some(scratch),
	})
}

/// Whether any form of output projection was requested.
#[must_use]
pub fn reprojection_requested(options: &MosaicOptions) -> bool {
	options.out_proj_epsg.is_some() || options.out_proj_wkt_file.is_some() || options.out_proj_wkt.is_some()
}

/// Checks that all inputs share projection, pixel size and grid alignment.
pub fn check_input_projections(inputs: &[ImageInfo]) -> Result<()> {
	let Some(first) = inputs.first() else {
		return Ok(());
	};
	let first_wkt = normalize_projection(&first.projection, &first.path)?;

	for info in &inputs[1..] {
		let mismatch = |what: &str| {
			MosaicError::ProjectionMismatch(format!(
				"{what} for files {} and {}. Specify the output projection",
				first.path.display(),
				info.path.display()
			))
		};

		if normalize_projection(&info.projection, &info.path)? != first_wkt {
			bail!(mismatch("projection mismatch"));
		}
		if info.transform[1] != first.transform[1] {
			bail!(mismatch("X pixel size mismatch"));
		}
		if info.transform[5] != first.transform[5] {
			bail!(mismatch("Y pixel size mismatch"));
		}
		if !is_aligned(info.transform[0], first.transform[0], info.transform[1]) {
			bail!(mismatch("X grid misalignment"));
		}
		if !is_aligned(info.transform[3], first.transform[3], info.transform[5]) {
			bail!(mismatch("Y grid misalignment"));
		}
	}
	Ok(())
}

/// Parses and re-exports a projection so that textually different WKT of the
/// same SRS compares equal.
fn normalize_projection(wkt: &str, path: &Path) -> Result<String> {
	let srs = SpatialRef::from_wkt(wkt).with_context(|| format!("invalid projection on {}", path.display()))?;
	srs.to_wkt().with_context(|| format!("invalid projection on {}", path.display()))
}

/// Whether two grid origins differ by an integer number of pixels.
fn is_aligned(x1: f64, x2: f64, res: f64) -> bool {
	let factor = (x1 - x2).abs() / res;
	(factor.round() - factor).abs() < ALIGNMENT_TOLERANCE
}

/// Snaps a coordinate outward to a multiple of the resolution.
fn snap_value(value: f64, res: f64, ceil: bool) -> f64 {
	let n = value / res;
	let n = if ceil { n.ceil() } else { n.floor() };
	res * n
}

fn spatial_ref_from_wkt(wkt: &str) -> Result<SpatialRef> {
	let mut srs = SpatialRef::from_wkt(wkt)?;
	srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
	Ok(srs)
}

/// Resolves the requested output projection to WKT. Exactly one of the three
/// forms may be given.
fn resolve_output_wkt(options: &MosaicOptions) -> Result<String> {
	let forms = usize::from(options.out_proj_epsg.is_some())
		+ usize::from(options.out_proj_wkt_file.is_some())
		+ usize::from(options.out_proj_wkt.is_some());
	ensure!(
		forms == 1,
		MosaicError::Config("give exactly one of an EPSG number, a WKT file or a WKT string".to_string())
	);

	let mut srs = if let Some(epsg) = options.out_proj_epsg {
		SpatialRef::from_epsg(epsg).map_err(|e| MosaicError::Config(format!("invalid EPSG code {epsg}: {e}")))?
	} else if let Some(file) = &options.out_proj_wkt_file {
		let wkt = std::fs::read_to_string(file)
			.map_err(|e| MosaicError::Config(format!("cannot read projection file {}: {e}", file.display())))?;
		SpatialRef::from_wkt(wkt.trim())
			.map_err(|e| MosaicError::Config(format!("invalid WKT in {}: {e}", file.display())))?
	} else if let Some(wkt) = &options.out_proj_wkt {
		SpatialRef::from_wkt(wkt).map_err(|e| MosaicError::Config(format!("invalid projection WKT: {e}")))?
	} else {
		unreachable!()
	};
	srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
	Ok(srs.to_wkt()?)
}

/// The output pixel size: explicit when given, otherwise inherited from the
/// first input, which requires input and output units to agree.
fn resolve_resolution(first: &ImageInfo, dst_srs: &SpatialRef, options: &MosaicOptions) -> Result<(f64, f64)> {
	if let (Some(x_res), Some(y_res)) = (options.out_x_res, options.out_y_res) {
		return Ok((x_res, y_res.abs()));
	}

	let src_srs = spatial_ref_from_wkt(&first.projection)?;
	let (src_units, dst_units) = (src_srs.linear_units(), dst_srs.linear_units());
	ensure!(
		(src_units - dst_units).abs() <= 1e-9 * src_units.max(dst_units),
		MosaicError::Config(
			"cannot deduce a default pixel size because the output coordinate units differ from the input".to_string()
		)
	);
	Ok((first.x_res(), first.y_res()))
}

/// Reprojects every input into `scratch` and returns the warped stand-ins.
fn make_warped_inputs(inputs: &[ImageInfo], options: &MosaicOptions, scratch: &Path) -> Result<Vec<ImageInfo>> {
	ensure!(!inputs.is_empty(), "no inputs to reproject");
	let dst_wkt = resolve_output_wkt(options)?;
	let dst_srs = spatial_ref_from_wkt(&dst_wkt)?;
	let (x_res, y_res) = resolve_resolution(&inputs[0], &dst_srs, options)?;

	let mut warped = Vec::with_capacity(inputs.len());
	for (i, info) in inputs.iter().enumerate() {
		let src_srs = spatial_ref_from_wkt(&info.projection)
			.with_context(|| format!("invalid projection on {}", info.path.display()))?;
		let transform = CoordTransform::new(&src_srs, &dst_srs)?;
		let bounds = transform.transform_bounds(&[info.x_min(), info.y_min(), info.x_max(), info.y_max()], 21)?;

		let x_min = snap_value(bounds[0].min(bounds[2]), x_res, false);
		let x_max = snap_value(bounds[0].max(bounds[2]), x_res, true);
		let y_min = snap_value(bounds[1].min(bounds[3]), y_res, false);
		let y_max = snap_value(bounds[1].max(bounds[3]), y_res, true);

		let dst_path = scratch.join(format!("input_{i:03}.tif"));
		log::debug!("warping {} -> {}", info.path.display(), dst_path.display());
		backend::warp_to_temp(&WarpRequest {
			src: info,
			dst_path: &dst_path,
			dst_wkt: &dst_wkt,
			bounds: (x_min, y_min, x_max, y_max),
			x_res,
			y_res,
			resample: &options.resample_method,
			null_val: options.null_val,
		})?;
		warped.push(ImageInfo::open(&dst_path)?);
	}
	Ok(warped)
}
