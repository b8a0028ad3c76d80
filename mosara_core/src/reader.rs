//! Reader workers.
//!
//! Each worker walks its own shard of the read list, pulls the clipped window
//! of every task out of the input raster, pads it to the full output-block
//! shape with the no-data value, and hands the finished block to the writer
//! through the shared queue. The queue is bounded, so fast readers block in
//! `send` until the writer catches up.

use crate::backend::DatasetCache;
use crate::cache::PendingBlocks;
use crate::types::{BlockReadTask, BlockSpec, ImageInfo, PixelBlock, RasterType};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;

/// A finished input block on its way to the writer.
pub type QueuedBlock = (BlockReadTask, PixelBlock);

/// An input-side read window clipped to the input's extent, plus the offset
/// at which the read pixels land in the padded output-shaped block.
#[derive(Debug, PartialEq, Eq)]
struct ClippedWindow {
	left: i64,
	top: i64,
	xsize: usize,
	ysize: usize,
	row_off: usize,
	col_off: usize,
}

impl ClippedWindow {
	/// Clips `inblock` to an input of `ncols` x `nrows` pixels. The window
	/// collapses to zero size when the block lies entirely outside.
	fn clip(inblock: &BlockSpec, ncols: usize, nrows: usize) -> ClippedWindow {
		let left = inblock.left.max(0);
		let top = inblock.top.max(0);
		let right = inblock.right().min(ncols as i64);
		let bottom = inblock.bottom().min(nrows as i64);
		ClippedWindow {
			left,
			top,
			xsize: (right - left).max(0) as usize,
			ysize: (bottom - top).max(0) as usize,
			row_off: (-inblock.top).max(0) as usize,
			col_off: (-inblock.left).max(0) as usize,
		}
	}

	fn is_empty(&self) -> bool {
		self.xsize == 0 || self.ysize == 0
	}
}

/// Runs one reader worker to completion.
///
/// Stops early (returning `Ok`) when the cancellation flag is raised or when
/// the writer has gone away and the queue is closed; any backend failure is
/// returned and surfaces through the writer's health check.
#[allow(clippy::too_many_arguments)]
pub fn read_worker(
	tasks: &[BlockReadTask],
	inputs: &[ImageInfo],
	band_num: usize,
	out_dtype: RasterType,
	out_null: Option<f64>,
	queue: &SyncSender<QueuedBlock>,
	queue_depth: &AtomicUsize,
	cancel: &AtomicBool,
) -> Result<()> {
	let mut pending = PendingBlocks::new();
	for task in tasks {
		pending.mark_todo(task.file_id, &task.outblock);
	}
	let mut handles = DatasetCache::new();
	let fill = out_null.unwrap_or(0.0);

	for task in tasks {
		if cancel.load(Ordering::Relaxed) {
			break;
		}

		let info = &inputs[task.file_id];
		let inblock = &task.inblock;
		let window = ClippedWindow::clip(inblock, info.ncols, info.nrows);

		// Whatever the input does not cover stays at the fill value.
		let mut block = PixelBlock::filled(out_dtype, inblock.ysize as usize, inblock.xsize as usize, fill);
		if !window.is_empty() {
			let pixels = handles.read_window(
				task.file_id,
				info,
				band_num,
				window.left,
				window.top,
				window.xsize,
				window.ysize,
				out_dtype,
			)?;
			block.paste(&pixels, window.row_off, window.col_off)?;
		}

		// Count the block before sending so the writer's matching decrement
		// can never observe a zero depth first.
		queue_depth.fetch_add(1, Ordering::Relaxed);
		if queue.send((task.clone(), block)).is_err() {
			// The writer dropped the receiver; it has already failed or
			// finished, so there is nothing left to do here.
			queue_depth.fetch_sub(1, Ordering::Relaxed);
			break;
		}

		pending.mark_done(task.file_id, &task.outblock);
		if pending.remaining(task.file_id) == 0 {
			handles.close(task.file_id, band_num);
		}
	}

	Ok(())
}
