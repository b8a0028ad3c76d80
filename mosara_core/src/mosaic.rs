//! The orchestrator: plans the mosaic and runs the per-band reader/writer
//! pipeline.
//!
//! For every output band a fresh pool of reader threads is spawned and joined
//! before the next band starts, so bands never overlap. Readers and writer
//! share a bounded queue; all planning data is immutable and shared by
//! reference.

use crate::backend;
use crate::error::MosaicError;
use crate::monitoring::{Monitoring, RunParams};
use crate::plan::MosaicPlan;
use crate::pyramid;
use crate::reader::{self, QueuedBlock};
use crate::reproj;
use crate::types::{ImageInfo, OutputGrid};
use crate::writer;
use anyhow::{Context, Result, anyhow, ensure};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, ScopedJoinHandle};

/// Default number of reader threads.
pub const DFLT_NUMTHREADS: usize = 4;
/// Default block edge in pixels.
pub const DFLT_BLOCKSIZE: usize = 1024;
/// Default output format driver.
pub const DFLT_DRIVER: &str = "GTiff";
/// Default resampling method for reprojection.
pub const DFLT_RESAMPLE_METHOD: &str = "near";

/// Per-driver default creation options, used when the caller gives none.
#[must_use]
pub fn default_creation_options(driver: &str) -> &'static [&'static str] {
	match driver {
		"GTiff" => &["COMPRESS=DEFLATE", "TILED=YES", "BIGTIFF=IF_SAFER", "INTERLEAVE=BAND"],
		"HFA" => &["COMPRESS=YES", "IGNORE_UTM=TRUE"],
		_ => &[],
	}
}

/// Everything a mosaic run can be configured with.
#[derive(Debug, Clone)]
pub struct MosaicOptions {
	/// Reader worker count, at least 1.
	pub numthreads: usize,
	/// Square block edge in pixels.
	pub blocksize: usize,
	/// Output format driver name.
	pub driver: String,
	/// No-data override; by default the first input's value is inherited.
	pub null_val: Option<f64>,
	/// `"KEY=VALUE"` creation options; `None` selects per-driver defaults.
	pub creation_options: Option<Vec<String>>,
	/// Output projection as an EPSG code.
	pub out_proj_epsg: Option<u32>,
	/// Output projection as a file containing WKT.
	pub out_proj_wkt_file: Option<PathBuf>,
	/// Output projection as a WKT string.
	pub out_proj_wkt: Option<String>,
	/// Output pixel width; inherited from the first input when unset.
	pub out_x_res: Option<f64>,
	/// Output pixel height; inherited from the first input when unset.
	pub out_y_res: Option<f64>,
	/// Resampling method used for reprojection.
	pub resample_method: String,
}

impl Default for MosaicOptions {
	fn default() -> Self {
		MosaicOptions {
			numthreads: DFLT_NUMTHREADS,
			blocksize: DFLT_BLOCKSIZE,
			driver: DFLT_DRIVER.to_string(),
			null_val: None,
			creation_options: None,
			out_proj_epsg: None,
			out_proj_wkt_file: None,
			out_proj_wkt: None,
			out_x_res: None,
			out_y_res: None,
			resample_method: DFLT_RESAMPLE_METHOD.to_string(),
		}
	}
}

impl MosaicOptions {
	fn resolved_creation_options(&self) -> Vec<String> {
		match &self.creation_options {
			Some(options) => options.clone(),
			None => default_creation_options(&self.driver)
				.iter()
				.map(ToString::to_string)
				.collect(),
		}
	}
}

/// Mosaics the given input rasters into a single output raster.
///
/// Inputs are merged in list order: where rasters overlap, the last listed
/// non-null value wins. Returns the run's monitoring report.
pub fn mosaic(filelist: &[PathBuf], outfile: &Path, options: &MosaicOptions) -> Result<Monitoring> {
	ensure!(
		!filelist.is_empty(),
		MosaicError::Config("no input files given".to_string())
	);
	ensure!(
		!outfile.as_os_str().is_empty(),
		MosaicError::Config("no output file given".to_string())
	);
	ensure!(
		options.numthreads >= 1,
		MosaicError::Config("numthreads must be at least 1".to_string())
	);
	ensure!(
		options.blocksize >= 1,
		MosaicError::Config("blocksize must be at least 1".to_string())
	);

	let mut monitors = Monitoring::new();
	monitors.params = RunParams {
		numthreads: options.numthreads,
		blocksize: options.blocksize,
		cpucount: num_cpus::get(),
		numinfiles: filelist.len(),
	};

	let infos = monitors.timed("imginfodict", || {
		filelist.iter().map(|path| ImageInfo::open(path)).collect::<Result<Vec<_>>>()
	})?;

	let preprocessed = monitors.timed("projection", || reproj::handle_projections(infos, options))?;
	let inputs = preprocessed.inputs;

	let (grid, plan) = monitors.timed("analysis", || {
		let grid = OutputGrid::build(&inputs, options.null_val)?;
		let plan = MosaicPlan::build(&grid, options.blocksize, options.numthreads, &inputs)?;
		Ok((grid, plan))
	})?;

	let overview_levels = pyramid::overview_levels(grid.ncols, grid.nrows);
	let mut out = backend::create_output(
		outfile,
		&grid,
		&options.driver,
		&options.resolved_creation_options(),
		overview_levels,
	)?;

	monitors.timestamps.start("domosaic");
	let result = run_all_bands(&mut out, &grid, &plan, &inputs, options.numthreads, &mut monitors);
	monitors.timestamps.end("domosaic");
	result?;

	out.flush()?;

	if let Some(scratch) = preprocessed.scratch {
		scratch.close().context("cannot remove the reprojection scratch directory")?;
	}

	Ok(monitors)
}

fn run_all_bands(
	out: &mut backend::OutputDataset,
	grid: &OutputGrid,
	plan: &MosaicPlan,
	inputs: &[ImageInfo],
	numthreads: usize,
	monitors: &mut Monitoring,
) -> Result<()> {
	for band_num in 1..=grid.num_bands {
		log::info!("mosaicking band {band_num}/{}", grid.num_bands);
		run_band(out, band_num, grid, plan, inputs, numthreads, monitors)?;
	}
	Ok(())
}

/// Runs one band: spawn the reader pool, drive the writer on this thread,
/// join everything. The first failure anywhere cancels the band.
fn run_band(
	out: &mut backend::OutputDataset,
	band_num: usize,
	grid: &OutputGrid,
	plan: &MosaicPlan,
	inputs: &[ImageInfo],
	numthreads: usize,
	monitors: &mut Monitoring,
) -> Result<()> {
	let cancel = AtomicBool::new(false);
	let queue_depth = AtomicUsize::new(0);
	let (sender, receiver) = mpsc::sync_channel::<QueuedBlock>(2 * numthreads);

	thread::scope(|scope| -> Result<()> {
		let cancel = &cancel;
		let queue_depth = &queue_depth;

		let mut workers: Vec<Option<ScopedJoinHandle<'_, Result<()>>>> = plan
			.shards
			.iter()
			.map(|shard| {
				let sender = sender.clone();
				Some(scope.spawn(move || {
					reader::read_worker(
						shard,
						inputs,
						band_num,
						grid.dtype,
						grid.null_val,
						&sender,
						queue_depth,
						cancel,
					)
				}))
			})
			.collect();
		// The writer detects end-of-input through sender drops, so the
		// original handle must not outlive the spawn loop.
		drop(sender);

		let writer_result = writer::write_band(
			out,
			band_num,
			grid,
			plan,
			inputs,
			&receiver,
			queue_depth,
			&mut workers,
			monitors,
			cancel,
		);

		if writer_result.is_err() {
			cancel.store(true, Ordering::Relaxed);
		}
		// Readers blocked on a full queue must observe the closed channel.
		drop(receiver);

		let mut join_error = None;
		for slot in &mut workers {
			if let Some(handle) = slot.take() {
				match handle.join() {
					Ok(Ok(())) => {}
					Ok(Err(e)) => {
						join_error.get_or_insert(e);
					}
					Err(_) => {
						join_error.get_or_insert(anyhow!("a reader thread panicked"));
					}
				}
			}
		}

		writer_result?;
		join_error.map_or(Ok(()), Err)
	})
}
