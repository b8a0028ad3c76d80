//! The single writer.
//!
//! One writer per band drains the reader queue into the block cache and
//! commits output blocks strictly in the planned row-major order. A block is
//! attempted on every loop iteration, so the writer can finish from a fully
//! populated cache even after all readers have exited. Merging follows the
//! planner's contributor order, which makes the output independent of reader
//! scheduling.

use crate::backend::OutputDataset;
use crate::cache::BlockCache;
use crate::error::MosaicError;
use crate::monitoring::Monitoring;
use crate::plan::MosaicPlan;
use crate::pyramid;
use crate::reader::QueuedBlock;
use crate::stats::StatsAccumulator;
use crate::types::{BlockSpec, ImageInfo, OutputGrid, PixelBlock};
use anyhow::{Result, anyhow, bail};
use itertools::Itertools;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::ScopedJoinHandle;

/// Writes one band of the output: drains the queue, assembles blocks in
/// order, feeds pyramids and statistics, and stamps the final metadata.
#[allow(clippy::too_many_arguments)]
pub fn write_band(
	out: &mut OutputDataset,
	band_num: usize,
	grid: &OutputGrid,
	plan: &MosaicPlan,
	inputs: &[ImageInfo],
	queue: &Receiver<QueuedBlock>,
	queue_depth: &AtomicUsize,
	workers: &mut [Option<ScopedJoinHandle<'_, Result<()>>>],
	monitors: &mut Monitoring,
	cancel: &AtomicBool,
) -> Result<()> {
	out.set_no_data(band_num, grid.null_val)?;

	let mut stats = StatsAccumulator::new(grid.null_val);
	let mut cache = BlockCache::new();
	let num_blocks = plan.block_list.len();
	let mut index = 0;
	let mut queue_closed = false;

	log::debug!("writing band {band_num}: {num_blocks} blocks");

	while index < num_blocks {
		// Drain at most one finished block from the readers.
		let mut received = false;
		match queue.try_recv() {
			Ok((task, block)) => {
				queue_depth.fetch_sub(1, Ordering::Relaxed);
				cache.add(task.file_id, task.outblock, block);
				received = true;
			}
			Err(TryRecvError::Empty) => {}
			Err(TryRecvError::Disconnected) => queue_closed = true,
		}

		// Try to commit the current block.
		let outblock = plan.block_list[index];
		let assembled = match plan.files_for_block.get(&outblock) {
			// No input touches this block; write plain no-data.
			None => Some(PixelBlock::filled(
				grid.dtype,
				outblock.ysize as usize,
				outblock.xsize as usize,
				grid.fill_value(),
			)),
			Some(file_ids) => {
				if file_ids.iter().all(|&id| cache.contains(id, &outblock)) {
					Some(assemble_block(&mut cache, &outblock, file_ids, grid, inputs)?)
				} else {
					None
				}
			}
		};

		let advanced = assembled.is_some();
		if let Some(block) = assembled {
			out.write_block(band_num, &block, outblock.left, outblock.top)?;
			pyramid::write_block_pyramids(out, band_num, &block, outblock.left, outblock.top)?;
			stats.update(&block);
			index += 1;
		}

		check_worker_health(workers, cancel)?;

		monitors.block_cache_size.update(cache.len() as u64);
		monitors.block_queue_size.update(queue_depth.load(Ordering::Relaxed) as u64);

		if !advanced && !received {
			if queue_closed {
				// Nothing buffered, nothing in flight, no producers left: the
				// plan promised contributors that never arrived.
				bail!("reader workers finished but output block {outblock} is still incomplete");
			}
			std::thread::yield_now();
		}
	}

	if let Some(band_stats) = stats.finish() {
		out.write_stats_metadata(band_num, &band_stats)?;
	}
	log::debug!("band {band_num} complete");
	Ok(())
}

/// Pops all contributors of `outblock` from the cache (they are known to be
/// present) and merges them in planner order: the first is the base, each
/// later one overwrites wherever it is not null.
fn assemble_block(
	cache: &mut BlockCache,
	outblock: &BlockSpec,
	file_ids: &[usize],
	grid: &OutputGrid,
	inputs: &[ImageInfo],
) -> Result<PixelBlock> {
	let mut merged: Option<PixelBlock> = None;

	for &file_id in file_ids {
		let block = cache
			.remove(file_id, outblock)
			.ok_or_else(|| anyhow!("block {outblock} of input {file_id} vanished from the cache"))?;

		match merged.as_mut() {
			None => merged = Some(block),
			Some(base) => {
				if block.shape() != base.shape() {
					let filelist = file_ids.iter().map(|&id| inputs[id].path.display().to_string()).join(", ");
					bail!(MosaicError::BlockShapeMismatch(format!(
						"at block {outblock}: {:?} != {:?} (inputs: {filelist})",
						block.shape(),
						base.shape(),
					)));
				}
				base.merge_from(&block, grid.null_val)?;
			}
		}
	}

	merged.ok_or_else(|| anyhow!("output block {outblock} has an empty contributor list"))
}

/// Joins every finished worker; the first reader failure (or panic) raises
/// the cancellation flag and aborts the band.
fn check_worker_health(workers: &mut [Option<ScopedJoinHandle<'_, Result<()>>>], cancel: &AtomicBool) -> Result<()> {
	for slot in workers.iter_mut() {
		let finished = slot.as_ref().is_some_and(ScopedJoinHandle::is_finished);
		if finished && let Some(handle) = slot.take() {
			let result = handle.join();
			match result {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					cancel.store(true, Ordering::Relaxed);
					return Err(e);
				}
				Err(_) => {
					cancel.store(true, Ordering::Relaxed);
					bail!("a reader thread panicked");
				}
			}
		}
	}
	Ok(())
}
