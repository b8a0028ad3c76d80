//! Block bookkeeping: the writer's block cache and the readers' pending sets.

use crate::types::{BlockSpec, PixelBlock};
use std::collections::{HashMap, HashSet};

/// Blocks that have been read but not yet assembled into an output block.
///
/// Owned by the writer alone. Entries appear exactly once per
/// `(input, output block)` pair and are removed the moment the output block is
/// committed, so no eviction policy is needed.
#[derive(Debug, Default)]
pub struct BlockCache {
	map: HashMap<(usize, BlockSpec), PixelBlock>,
}

impl BlockCache {
	#[must_use]
	pub fn new() -> BlockCache {
		BlockCache::default()
	}

	/// Inserts a block; an existing entry for the same key is replaced.
	pub fn add(&mut self, file_id: usize, outblock: BlockSpec, block: PixelBlock) {
		self.map.insert((file_id, outblock), block);
	}

	/// Removes and returns a block.
	pub fn remove(&mut self, file_id: usize, outblock: &BlockSpec) -> Option<PixelBlock> {
		self.map.remove(&(file_id, *outblock))
	}

	#[must_use]
	pub fn contains(&self, file_id: usize, outblock: &BlockSpec) -> bool {
		self.map.contains_key(&(file_id, *outblock))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.map.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}
}

/// Tracks, per input file, which output blocks a reader still has to produce.
///
/// When a file's set drains the reader can close its dataset handle; the
/// blocks recorded here are always in output-grid coordinates.
#[derive(Debug, Default)]
pub struct PendingBlocks {
	sets: HashMap<usize, HashSet<(i64, i64)>>,
}

impl PendingBlocks {
	#[must_use]
	pub fn new() -> PendingBlocks {
		PendingBlocks::default()
	}

	pub fn mark_todo(&mut self, file_id: usize, outblock: &BlockSpec) {
		self
			.sets
			.entry(file_id)
			.or_default()
			.insert((outblock.top, outblock.left));
	}

	pub fn mark_done(&mut self, file_id: usize, outblock: &BlockSpec) {
		if let Some(set) = self.sets.get_mut(&file_id) {
			set.remove(&(outblock.top, outblock.left));
		}
	}

	#[must_use]
	pub fn remaining(&self, file_id: usize) -> usize {
		self.sets.get(&file_id).map_or(0, HashSet::len)
	}
}
