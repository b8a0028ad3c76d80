//! The GDAL seam: every dataset handle in the engine is opened, read and
//! written through this module.
//!
//! GDAL handles must not be shared across threads, so the API hands out no
//! raw datasets: readers go through their own [`DatasetCache`], the writer
//! through its [`OutputDataset`]. Each lives on exactly one thread.

use crate::error::MosaicError;
use crate::stats::BandStats;
use crate::types::{BlockData, ImageInfo, OutputGrid, PixelBlock, RasterType};
use anyhow::{Result, bail, ensure};
use gdal::raster::{Buffer, GdalDataType, RasterBand, RasterCreationOptions};
use gdal::{Dataset, DriverManager, Metadata};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn open_err(path: &Path, e: impl ToString) -> MosaicError {
	MosaicError::BackendOpen {
		path: path.to_path_buf(),
		message: e.to_string(),
	}
}

fn read_err(path: &Path, e: impl ToString) -> MosaicError {
	MosaicError::BackendRead {
		path: path.to_path_buf(),
		message: e.to_string(),
	}
}

fn write_err(path: &Path, e: impl ToString) -> MosaicError {
	MosaicError::BackendWrite {
		path: path.to_path_buf(),
		message: e.to_string(),
	}
}

fn raster_type_of(dtype: GdalDataType) -> Result<RasterType> {
	Ok(match dtype {
		GdalDataType::UInt8 => RasterType::U8,
		GdalDataType::UInt16 => RasterType::U16,
		GdalDataType::UInt32 => RasterType::U32,
		GdalDataType::Int16 => RasterType::I16,
		GdalDataType::Int32 => RasterType::I32,
		GdalDataType::Float32 => RasterType::F32,
		GdalDataType::Float64 => RasterType::F64,
		other => {
			return Err(MosaicError::Config(format!("unsupported pixel type {other:?}")).into());
		}
	})
}

/// Dispatches `$e` over the pixel type, with `$t` aliased to the matching
/// Rust type.
macro_rules! with_raster_type {
	($dtype:expr, $t:ident => $e:expr) => {
		match $dtype {
			RasterType::U8 => {
				type $t = u8;
				$e
			}
			RasterType::U16 => {
				type $t = u16;
				$e
			}
			RasterType::U32 => {
				type $t = u32;
				$e
			}
			RasterType::I16 => {
				type $t = i16;
				$e
			}
			RasterType::I32 => {
				type $t = i32;
				$e
			}
			RasterType::F32 => {
				type $t = f32;
				$e
			}
			RasterType::F64 => {
				type $t = f64;
				$e
			}
		}
	};
}

/// Captures the geometry snapshot of the raster at `path`.
pub fn open_image_info(path: &Path) -> Result<ImageInfo> {
	let ds = Dataset::open(path).map_err(|e| open_err(path, e))?;
	let (ncols, nrows) = ds.raster_size();
	let transform = ds.geo_transform().map_err(|e| open_err(path, e))?;
	let projection = ds.projection();
	let num_bands = ds.raster_count();

	let band1 = ds.rasterband(1).map_err(|e| open_err(path, e))?;
	let dtype = raster_type_of(band1.band_type())?;
	let null_val = band1.no_data_value();

	let mut layer_types = Vec::with_capacity(num_bands);
	for band_num in 1..=num_bands {
		let band = ds.rasterband(band_num).map_err(|e| open_err(path, e))?;
		layer_types.push(band.metadata_item("LAYER_TYPE", ""));
	}

	Ok(ImageInfo {
		path: path.to_path_buf(),
		nrows,
		ncols,
		transform,
		projection,
		dtype,
		num_bands,
		null_val,
		layer_types,
	})
}

fn read_block_data(
	ds: &Dataset,
	band_num: usize,
	window: (isize, isize),
	size: (usize, usize),
	dtype: RasterType,
	path: &Path,
) -> Result<PixelBlock> {
	let band = ds.rasterband(band_num).map_err(|e| read_err(path, e))?;
	let data = with_raster_type!(dtype, T => {
		band
			.read_as::<T>(window, size, size, None)
			.map(|buf| BlockData::from(buf.data().to_vec()))
	})
	.map_err(|e| read_err(path, e))?;
	PixelBlock::from_data(size.1, size.0, data)
}

fn write_block_data(band: &mut RasterBand, block: &PixelBlock, left: i64, top: i64) -> gdal::errors::Result<()> {
	let (nrows, ncols) = block.shape();
	let window = (left as isize, top as isize);
	let size = (ncols, nrows);
	match block.data() {
		BlockData::U8(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::U16(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::U32(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::I16(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::I32(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::F32(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
		BlockData::F64(v) => band.write(window, size, &mut Buffer::new(size, v.clone())),
	}
}

/// Lazily opened input handles of one reader thread, keyed by
/// `(file index, band number)`.
///
/// A handle is opened on the first read and dropped explicitly the moment the
/// reader has produced the last block of that file, so remote inputs are not
/// kept open longer than needed.
#[derive(Default)]
pub struct DatasetCache {
	handles: HashMap<(usize, usize), Dataset>,
}

impl DatasetCache {
	#[must_use]
	pub fn new() -> DatasetCache {
		DatasetCache::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.handles.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}

	/// Reads a window of `info`'s band `band_num` into a block of the given
	/// pixel type, opening the dataset on first use.
	///
	/// The window must lie inside the input; callers clip beforehand.
	#[allow(clippy::too_many_arguments)]
	pub fn read_window(
		&mut self,
		file_id: usize,
		info: &ImageInfo,
		band_num: usize,
		left: i64,
		top: i64,
		xsize: usize,
		ysize: usize,
		dtype: RasterType,
	) -> Result<PixelBlock> {
		let path = info.path.as_path();
		let ds = match self.handles.entry((file_id, band_num)) {
			std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
			std::collections::hash_map::Entry::Vacant(entry) => {
				log::trace!("opening {} for band {band_num}", path.display());
				entry.insert(Dataset::open(path).map_err(|e| open_err(path, e))?)
			}
		};
		read_block_data(ds, band_num, (left as isize, top as isize), (xsize, ysize), dtype, path)
	}

	/// Closes the handle for one input band, if open.
	pub fn close(&mut self, file_id: usize, band_num: usize) {
		if self.handles.remove(&(file_id, band_num)).is_some() {
			log::trace!("closed input {file_id} band {band_num}");
		}
	}
}

/// The open output dataset, owned by the writer side for the whole run.
pub struct OutputDataset {
	ds: Dataset,
	path: PathBuf,
	overview_levels: Vec<i32>,
}

/// Creates the output dataset: format driver, creation options, geometry,
/// band metadata and the empty overview hierarchy.
pub fn create_output(
	path: &Path,
	grid: &OutputGrid,
	driver_name: &str,
	creation_options: &[String],
	overview_levels: Vec<i32>,
) -> Result<OutputDataset> {
	let driver = DriverManager::get_driver_by_name(driver_name)
		.map_err(|_| MosaicError::UnsupportedDriver(driver_name.to_string()))?;

	if path.exists() {
		std::fs::remove_file(path).map_err(|e| write_err(path, e))?;
	}

	let options = RasterCreationOptions::from_iter(creation_options.iter().map(String::as_str));
	let (ncols, nrows, bands) = (grid.ncols, grid.nrows, grid.num_bands);
	let mut ds = with_raster_type!(grid.dtype, T => {
		driver.create_with_band_type_with_options::<T, _>(path, ncols, nrows, bands, &options)
	})
	.map_err(|e| write_err(path, e))?;

	ds.set_geo_transform(&grid.transform).map_err(|e| write_err(path, e))?;
	ds.set_projection(&grid.projection).map_err(|e| write_err(path, e))?;

	for (i, layer_type) in grid.layer_types.iter().enumerate() {
		if let Some(layer_type) = layer_type {
			let mut band = ds.rasterband(i + 1).map_err(|e| write_err(path, e))?;
			band
				.set_metadata_item("LAYER_TYPE", layer_type, "")
				.map_err(|e| write_err(path, e))?;
		}
	}

	// Seed the empty pyramid; blocks are streamed into it as they are written.
	if !overview_levels.is_empty() {
		ds.build_overviews("NEAREST", &overview_levels, &[])
			.map_err(|e| write_err(path, e))?;
	}

	log::info!(
		"created output {} ({ncols}x{nrows}, {bands} bands, overviews {overview_levels:?})",
		path.display()
	);

	Ok(OutputDataset {
		ds,
		path: path.to_path_buf(),
		overview_levels,
	})
}

impl OutputDataset {
	/// Overview decimation factors, smallest first.
	#[must_use]
	pub fn overview_levels(&self) -> &[i32] {
		&self.overview_levels
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Writes one assembled block into the full-resolution band.
	pub fn write_block(&mut self, band_num: usize, block: &PixelBlock, left: i64, top: i64) -> Result<()> {
		let path = self.path.clone();
		let mut band = self.ds.rasterband(band_num).map_err(|e| write_err(&path, e))?;
		write_block_data(&mut band, block, left, top).map_err(|e| write_err(&path, e))?;
		Ok(())
	}

	/// Writes a sub-sampled block into one overview level of a band.
	pub fn write_overview_block(
		&mut self,
		band_num: usize,
		overview_index: usize,
		block: &PixelBlock,
		left: i64,
		top: i64,
	) -> Result<()> {
		let path = self.path.clone();
		let band = self.ds.rasterband(band_num).map_err(|e| write_err(&path, e))?;
		let mut overview = band.overview(overview_index).map_err(|e| write_err(&path, e))?;
		write_block_data(&mut overview, block, left, top).map_err(|e| write_err(&path, e))?;
		Ok(())
	}

	/// `(ncols, nrows)` of one overview level of a band.
	pub fn overview_size(&self, band_num: usize, overview_index: usize) -> Result<(usize, usize)> {
		let path = self.path.as_path();
		let band = self.ds.rasterband(band_num).map_err(|e| write_err(path, e))?;
		let overview = band.overview(overview_index).map_err(|e| write_err(path, e))?;
		Ok(overview.size())
	}

	/// Sets the no-data value of a band; `None` writes nothing.
	pub fn set_no_data(&mut self, band_num: usize, null_val: Option<f64>) -> Result<()> {
		if let Some(null_val) = null_val {
			let path = self.path.clone();
			let mut band = self.ds.rasterband(band_num).map_err(|e| write_err(&path, e))?;
			band.set_no_data_value(Some(null_val)).map_err(|e| write_err(&path, e))?;
		}
		Ok(())
	}

	/// Stamps the computed statistics onto a band as metadata items.
	pub fn write_stats_metadata(&mut self, band_num: usize, stats: &BandStats) -> Result<()> {
		let path = self.path.clone();
		let mut band = self.ds.rasterband(band_num).map_err(|e| write_err(&path, e))?;
		let items = [
			("STATISTICS_MINIMUM", stats.min),
			("STATISTICS_MAXIMUM", stats.max),
			("STATISTICS_MEAN", stats.mean),
			("STATISTICS_STDDEV", stats.stddev),
		];
		for (key, value) in items {
			band
				.set_metadata_item(key, &value.to_string(), "")
				.map_err(|e| write_err(&path, e))?;
		}
		Ok(())
	}

	/// Flushes pending raster writes to disk.
	pub fn flush(&mut self) -> Result<()> {
		let path = self.path.clone();
		self.ds.flush_cache().map_err(|e| write_err(&path, e))?;
		Ok(())
	}
}

/// Maps a resampling method name onto the backend's warp algorithm.
fn resample_alg(name: &str) -> Result<gdal_sys::GDALResampleAlg::Type> {
	use gdal_sys::GDALResampleAlg;
	Ok(match name {
		"near" => GDALResampleAlg::GRA_NearestNeighbour,
		"bilinear" => GDALResampleAlg::GRA_Bilinear,
		"cubic" => GDALResampleAlg::GRA_Cubic,
		"cubicspline" => GDALResampleAlg::GRA_CubicSpline,
		"lanczos" => GDALResampleAlg::GRA_Lanczos,
		"average" => GDALResampleAlg::GRA_Average,
		"mode" => GDALResampleAlg::GRA_Mode,
		other => {
			return Err(MosaicError::Config(format!("unknown resampling method '{other}'")).into());
		}
	})
}

/// A single-input reprojection job.
pub struct WarpRequest<'a> {
	pub src: &'a ImageInfo,
	pub dst_path: &'a Path,
	pub dst_wkt: &'a str,
	/// Target extent `(x_min, y_min, x_max, y_max)`, already snapped to the
	/// target grid.
	pub bounds: (f64, f64, f64, f64),
	pub x_res: f64,
	/// Positive pixel height.
	pub y_res: f64,
	pub resample: &'a str,
	pub null_val: Option<f64>,
}

/// Reprojects one input into a temporary dataset on the requested grid.
///
/// The temporary is created with the source's band count and pixel type and
/// initialized to the no-data value, then warped into. This preprocessing
/// step guarantees the pipeline only ever sees aligned inputs.
pub fn warp_to_temp(req: &WarpRequest) -> Result<()> {
	let alg = resample_alg(req.resample)?;
	let (x_min, y_min, x_max, y_max) = req.bounds;
	let ncols = ((x_max - x_min) / req.x_res).round() as usize;
	let nrows = ((y_max - y_min) / req.y_res).round() as usize;
	ensure!(ncols > 0 && nrows > 0, "warped extent of {} is empty", req.src.path.display());

	let src_ds = Dataset::open(&req.src.path).map_err(|e| open_err(&req.src.path, e))?;

	let driver = DriverManager::get_driver_by_name("GTiff")
		.map_err(|_| MosaicError::UnsupportedDriver("GTiff".to_string()))?;
	let options = RasterCreationOptions::from_iter(["COMPRESS=DEFLATE", "TILED=YES"]);
	let bands = req.src.num_bands;
	let dst_path = req.dst_path;
	let mut dst_ds = with_raster_type!(req.src.dtype, T => {
		driver.create_with_band_type_with_options::<T, _>(dst_path, ncols, nrows, bands, &options)
	})
	.map_err(|e| write_err(dst_path, e))?;

	dst_ds
		.set_geo_transform(&[x_min, req.x_res, 0.0, y_max, 0.0, -req.y_res])
		.map_err(|e| write_err(dst_path, e))?;
	dst_ds.set_projection(req.dst_wkt).map_err(|e| write_err(dst_path, e))?;
	if let Some(null_val) = req.null_val {
		for band_num in 1..=bands {
			let mut band = dst_ds.rasterband(band_num).map_err(|e| write_err(dst_path, e))?;
			band.set_no_data_value(Some(null_val)).map_err(|e| write_err(dst_path, e))?;
		}
	}

	let h_src_ds = src_ds.c_dataset();
	let h_dst_ds = dst_ds.c_dataset();

	unsafe {
		use gdal_sys::{
			CPLErr, CPLGetLastErrorMsg, CPLMalloc, CSLSetNameValue, GDALChunkAndWarpMulti,
			GDALCreateGenImgProjTransformer2, GDALCreateWarpOperation, GDALCreateWarpOptions,
			GDALDestroyGenImgProjTransformer, GDALDestroyWarpOperation, GDALGenImgProjTransform, GDALWarpOperationH,
			GDALWarpOptions,
		};

		let mut options: GDALWarpOptions = *GDALCreateWarpOptions();
		options.hSrcDS = h_src_ds;
		options.hDstDS = h_dst_ds;

		options.papszWarpOptions = CSLSetNameValue(options.papszWarpOptions, c"NUM_THREADS".as_ptr(), c"ALL_CPUS".as_ptr());

		// Map every source band onto the same destination band.
		options.nBandCount = bands as i32;
		let n = bands * std::mem::size_of::<i32>();
		options.panSrcBands = CPLMalloc(n).cast::<i32>();
		options.panDstBands = CPLMalloc(n).cast::<i32>();
		for i in 0..bands {
			options.panSrcBands.add(i).write(i as i32 + 1);
			options.panDstBands.add(i).write(i as i32 + 1);
		}

		if let Some(null_val) = req.null_val {
			// Exclude no-data pixels from resampling and initialize the
			// destination with them, as the uncovered frame must stay null.
			options.papszWarpOptions = CSLSetNameValue(options.papszWarpOptions, c"INIT_DEST".as_ptr(), c"NO_DATA".as_ptr());
			let n = bands * std::mem::size_of::<f64>();
			options.padfSrcNoDataReal = CPLMalloc(n).cast::<f64>();
			options.padfDstNoDataReal = CPLMalloc(n).cast::<f64>();
			for i in 0..bands {
				options.padfSrcNoDataReal.add(i).write(null_val);
				options.padfDstNoDataReal.add(i).write(null_val);
			}
		}

		options.eResampleAlg = alg;
		options.dfWarpMemoryLimit = 512.0 * 1024.0 * 1024.0;

		options.pTransformerArg = GDALCreateGenImgProjTransformer2(h_src_ds, h_dst_ds, core::ptr::null_mut());
		options.pfnTransformer = Some(GDALGenImgProjTransform);

		let operation: GDALWarpOperationH = GDALCreateWarpOperation(&raw const options);

		let rv = GDALChunkAndWarpMulti(operation, 0, 0, ncols as i32, nrows as i32);

		GDALDestroyWarpOperation(operation);
		GDALDestroyGenImgProjTransformer(options.pTransformerArg);

		if rv != CPLErr::CE_None {
			let message = std::ffi::CStr::from_ptr(CPLGetLastErrorMsg()).to_string_lossy().into_owned();
			bail!(MosaicError::BackendWrite {
				path: dst_path.to_path_buf(),
				message: format!("reprojection of {} failed: {message}", req.src.path.display()),
			});
		}
	}

	dst_ds.flush_cache().map_err(|e| write_err(dst_path, e))?;
	Ok(())
}
