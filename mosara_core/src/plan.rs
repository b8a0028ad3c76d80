//! Planning: tiles the output grid into blocks, finds the inputs contributing
//! to each block, and partitions the resulting read list among the workers.
//!
//! Everything here is pure geometry on [`ImageInfo`] snapshots; no dataset is
//! touched. The plan is immutable once built and shared by reference with the
//! reader threads.

use crate::types::{BlockReadTask, BlockSpec, ImageInfo, OutputGrid};
use anyhow::Result;
use std::collections::HashMap;

/// One output block together with its ordered contributors
/// `(file_id, inblock)`. The order is the input-file order of the job and is
/// the merge precedence.
#[derive(Debug, Clone)]
pub struct BlockInputs {
	pub outblock: BlockSpec,
	pub inputs: Vec<(usize, BlockSpec)>,
}

/// The complete, immutable plan for one mosaic run.
#[derive(Debug)]
pub struct MosaicPlan {
	/// All output blocks in row-major write order.
	pub block_list: Vec<BlockSpec>,
	/// Ordered contributor file ids per output block. Blocks covering no
	/// input have no entry.
	pub files_for_block: HashMap<BlockSpec, Vec<usize>>,
	/// Read tasks, one shard per reader thread.
	pub shards: Vec<Vec<BlockReadTask>>,
}

impl MosaicPlan {
	/// Plans a run: tile, intersect, flatten, partition.
	pub fn build(grid: &OutputGrid, blocksize: usize, numthreads: usize, inputs: &[ImageInfo]) -> Result<MosaicPlan> {
		let block_list = make_output_block_list(grid, blocksize);
		let (with_inputs, files_for_block) = find_inputs_per_block(&block_list, grid, inputs)?;
		let tasks = make_block_reading_list(&with_inputs);
		log::debug!(
			"planned {} output blocks, {} read tasks over {} inputs",
			block_list.len(),
			tasks.len(),
			inputs.len()
		);
		let shards = divide_blocks_by_thread(tasks, numthreads);
		Ok(MosaicPlan {
			block_list,
			files_for_block,
			shards,
		})
	}
}

/// Tiles the output grid into blocks of `blocksize` x `blocksize` pixels, in
/// row-major order.
///
/// When the remainder at the right or bottom edge would be smaller than a
/// quarter block, it is folded into the preceding block instead, so the grid
/// never ends in a thin sliver.
#[must_use]
pub fn make_output_block_list(grid: &OutputGrid, blocksize: usize) -> Vec<BlockSpec> {
	let (nrows, ncols) = (grid.nrows as i64, grid.ncols as i64);
	let blocksize = blocksize as i64;
	let mut block_list = Vec::new();

	let mut top = 0;
	while top < nrows {
		let mut ysize = blocksize.min(nrows - top);
		if nrows - (top + ysize) < blocksize / 4 {
			ysize = nrows - top;
		}

		let mut left = 0;
		while left < ncols {
			let mut xsize = blocksize.min(ncols - left);
			if ncols - (left + xsize) < blocksize / 4 {
				xsize = ncols - left;
			}
			block_list.push(BlockSpec::new(top, left, xsize, ysize));
			left += xsize;
		}

		top += ysize;
	}
	block_list
}

/// For every output block, works out which inputs intersect it and where the
/// block sits in each input's pixel coordinates.
///
/// Returns the per-block contributor lists (only for blocks with at least one
/// contributor) plus the `files_for_block` lookup the writer uses.
pub fn find_inputs_per_block(
	block_list: &[BlockSpec],
	grid: &OutputGrid,
	inputs: &[ImageInfo],
) -> Result<(Vec<BlockInputs>, HashMap<BlockSpec, Vec<usize>>)> {
	let mut with_inputs = Vec::new();
	let mut files_for_block: HashMap<BlockSpec, Vec<usize>> = HashMap::new();

	for &block in block_list {
		let mut contributors = Vec::new();

		for (file_id, info) in inputs.iter().enumerate() {
			let (file_left, file_top, file_right, file_bottom) = block.to_file_pixel_coords(&grid.transform, info)?;
			let intersects = file_right + 1 >= 0
				&& file_bottom + 1 >= 0
				&& file_left <= info.ncols as i64
				&& file_top <= info.nrows as i64;

			if intersects {
				let inblock = BlockSpec::new(file_top, file_left, file_right - file_left, file_bottom - file_top);
				contributors.push((file_id, inblock));
				files_for_block.entry(block).or_default().push(file_id);
			}
		}

		if !contributors.is_empty() {
			with_inputs.push(BlockInputs {
				outblock: block,
				inputs: contributors,
			});
		}
	}

	Ok((with_inputs, files_for_block))
}

/// Flattens the per-block contributor lists into a single read list,
/// preserving block order and, within a block, input order.
#[must_use]
pub fn make_block_reading_list(with_inputs: &[BlockInputs]) -> Vec<BlockReadTask> {
	with_inputs
		.iter()
		.flat_map(|bi| {
			bi.inputs.iter().map(|&(file_id, inblock)| BlockReadTask {
				outblock: bi.outblock,
				file_id,
				inblock,
			})
		})
		.collect()
}

/// Deals the read list out to `numthreads` workers round-robin
/// (`worker i` gets tasks `i, i+n, i+2n, …`), which spreads each input file
/// across workers.
#[must_use]
pub fn divide_blocks_by_thread(tasks: Vec<BlockReadTask>, numthreads: usize) -> Vec<Vec<BlockReadTask>> {
	let numthreads = numthreads.max(1);
	(0..numthreads)
		.map(|i| tasks.iter().skip(i).step_by(numthreads).cloned().collect())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{GeoTransform, RasterType};
	use itertools::Itertools;
	use rstest::rstest;
	use std::path::PathBuf;

	fn grid(nrows: usize, ncols: usize) -> OutputGrid {
		OutputGrid {
			nrows,
			ncols,
			transform: [0.0, 10.0, 0.0, 0.0, 0.0, -10.0],
			projection: String::new(),
			dtype: RasterType::U16,
			num_bands: 1,
			null_val: Some(0.0),
			layer_types: vec![None],
		}
	}

	fn info(transform: GeoTransform, ncols: usize, nrows: usize) -> ImageInfo {
		ImageInfo {
			path: PathBuf::from("in.tif"),
			nrows,
			ncols,
			transform,
			projection: String::new(),
			dtype: RasterType::U16,
			num_bands: 1,
			null_val: Some(0.0),
			layer_types: vec![None],
		}
	}

	#[rstest]
	#[case(2048, 2048, 1024)]
	#[case(2500, 1000, 1024)]
	#[case(999, 5001, 512)]
	#[case(100, 100, 1024)]
	fn blocks_tile_the_grid_exactly_once(#[case] nrows: usize, #[case] ncols: usize, #[case] blocksize: usize) {
		let blocks = make_output_block_list(&grid(nrows, ncols), blocksize);

		// Disjoint coverage: every pixel belongs to exactly one block.
		let covered: u64 = blocks.iter().map(|b| (b.xsize * b.ysize) as u64).sum();
		assert_eq!(covered, (nrows * ncols) as u64);
		for (a, b) in blocks.iter().tuple_combinations() {
			let overlap_x = a.left < b.right() && b.left < a.right();
			let overlap_y = a.top < b.bottom() && b.top < a.bottom();
			assert!(!(overlap_x && overlap_y), "blocks {a} and {b} overlap");
		}
		for b in &blocks {
			assert!(b.right() <= ncols as i64 && b.bottom() <= nrows as i64);
		}
	}

	#[test]
	fn small_remainders_are_absorbed() {
		// 2500 columns: 1024 + 1024 + 452 — the 452 tail is big enough to keep.
		let blocks = make_output_block_list(&grid(1024, 2500), 1024);
		assert_eq!(blocks.iter().map(|b| b.xsize).collect_vec(), vec![1024, 1024, 452]);

		// 2200 columns: the 152-pixel tail is under a quarter block, so the
		// last block swallows it.
		let blocks = make_output_block_list(&grid(1024, 2200), 1024);
		assert_eq!(blocks.iter().map(|b| b.xsize).collect_vec(), vec![1024, 1176]);

		// Same rule on the bottom edge.
		let blocks = make_output_block_list(&grid(1100, 1024), 1024);
		assert_eq!(blocks.len(), 1);
		assert_eq!(blocks[0].ysize, 1100);
	}

	#[test]
	fn row_major_order() {
		let blocks = make_output_block_list(&grid(2048, 2048), 1024);
		let corners = blocks.iter().map(|b| (b.top, b.left)).collect_vec();
		assert_eq!(corners, vec![(0, 0), (0, 1024), (1024, 0), (1024, 1024)]);
	}

	#[test]
	fn contributors_follow_input_order() -> Result<()> {
		let g = grid(100, 100);
		// Both inputs cover the whole grid; the second is listed second.
		let a = info([0.0, 10.0, 0.0, 0.0, 0.0, -10.0], 100, 100);
		let b = info([0.0, 10.0, 0.0, 0.0, 0.0, -10.0], 100, 100);
		let blocks = make_output_block_list(&g, 64);
		let (with_inputs, files_for_block) = find_inputs_per_block(&blocks, &g, &[a, b])?;

		assert_eq!(with_inputs.len(), blocks.len());
		for bi in &with_inputs {
			assert_eq!(bi.inputs.iter().map(|(id, _)| *id).collect_vec(), vec![0, 1]);
		}
		assert_eq!(files_for_block[&blocks[0]], vec![0, 1]);
		Ok(())
	}

	#[test]
	fn non_intersecting_blocks_have_no_entry() -> Result<()> {
		// Two 30x30 inputs in opposite corners of a 100x100 grid, well clear
		// of the off-diagonal blocks.
		let g = grid(100, 100);
		let a = info([0.0, 10.0, 0.0, 0.0, 0.0, -10.0], 30, 30);
		let b = info([700.0, 10.0, 0.0, -700.0, 0.0, -10.0], 30, 30);
		let blocks = make_output_block_list(&g, 50);
		assert_eq!(blocks.len(), 4);
		let (with_inputs, files_for_block) = find_inputs_per_block(&blocks, &g, &[a, b])?;

		assert_eq!(files_for_block[&blocks[0]], vec![0]);
		assert_eq!(files_for_block[&blocks[3]], vec![1]);
		// The off-diagonal blocks intersect nothing: no entry at all.
		assert!(!files_for_block.contains_key(&blocks[1]));
		assert!(!files_for_block.contains_key(&blocks[2]));
		assert_eq!(with_inputs.len(), 2);
		Ok(())
	}

	#[test]
	fn inblock_matches_outblock_size_for_shifted_input() -> Result<()> {
		let g = grid(100, 100);
		// Input shifted 30 columns right of the output origin.
		let a = info([300.0, 10.0, 0.0, 0.0, 0.0, -10.0], 100, 100);
		let blocks = vec![BlockSpec::new(0, 0, 50, 50)];
		let (with_inputs, _) = find_inputs_per_block(&blocks, &g, &[a])?;
		let (_, inblock) = with_inputs[0].inputs[0];
		assert_eq!(inblock, BlockSpec::new(0, -30, 50, 50));
		Ok(())
	}

	#[test]
	fn stride_partition_balances_and_preserves_order() {
		let g = grid(100, 300);
		let a = info([0.0, 10.0, 0.0, 0.0, 0.0, -10.0], 300, 100);
		let blocks = make_output_block_list(&g, 50);
		let (with_inputs, _) = find_inputs_per_block(&blocks, &g, &[a]).unwrap();
		let tasks = make_block_reading_list(&with_inputs);
		assert_eq!(tasks.len(), 12);

		let shards = divide_blocks_by_thread(tasks.clone(), 5);
		assert_eq!(shards.len(), 5);
		assert_eq!(shards.iter().map(Vec::len).sum::<usize>(), tasks.len());
		// Worker 0 gets tasks 0, 5, 10.
		assert_eq!(shards[0].len(), 3);
		assert_eq!(shards[0][1].outblock, tasks[5].outblock);
		// Each shard preserves global task order.
		for shard in &shards {
			for pair in shard.windows(2) {
				let i0 = tasks.iter().position(|t| t.outblock == pair[0].outblock && t.file_id == pair[0].file_id);
				let i1 = tasks.iter().position(|t| t.outblock == pair[1].outblock && t.file_id == pair[1].file_id);
				assert!(i0 < i1);
			}
		}
	}

	#[test]
	fn plan_bundles_everything() -> Result<()> {
		let g = grid(100, 100);
		let a = info([0.0, 10.0, 0.0, 0.0, 0.0, -10.0], 100, 100);
		let plan = MosaicPlan::build(&g, 50, 3, &[a])?;
		assert_eq!(plan.block_list.len(), 4);
		assert_eq!(plan.shards.len(), 3);
		assert_eq!(plan.shards.iter().map(Vec::len).sum::<usize>(), 4);
		Ok(())
	}
}
