//! Typed pixel blocks.
//!
//! Raster bands come in a handful of pixel types only known at run time, so a
//! block is carried as a type tag plus a contiguous row-major buffer. The
//! small set of operations the pipeline needs (fill, paste, merge, sub-sample,
//! crop) is implemented generically once and dispatched over the tag.

use anyhow::{Result, bail, ensure};
use num_traits::{NumCast, Zero};

/// Pixel type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterType {
	U8,
	U16,
	U32,
	I16,
	I32,
	F32,
	F64,
}

/// The pixel payload of one block, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockData {
	U8(Vec<u8>),
	U16(Vec<u16>),
	U32(Vec<u32>),
	I16(Vec<i16>),
	I32(Vec<i32>),
	F32(Vec<f32>),
	F64(Vec<f64>),
}

/// A rectangular, row-major pixel buffer sized exactly to one block.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBlock {
	nrows: usize,
	ncols: usize,
	data: BlockData,
}

/// Casts a no-data value into a concrete pixel type. Values that do not fit
/// the type fall back to zero.
fn cast_null<T: NumCast + Zero>(value: f64) -> T {
	T::from(value).unwrap_or_else(T::zero)
}

fn paste_slice<T: Copy>(
	dst: &mut [T],
	dst_cols: usize,
	src: &[T],
	src_shape: (usize, usize),
	row_off: usize,
	col_off: usize,
) {
	let (src_rows, src_cols) = src_shape;
	for row in 0..src_rows {
		let d0 = (row_off + row) * dst_cols + col_off;
		let s0 = row * src_cols;
		dst[d0..d0 + src_cols].copy_from_slice(&src[s0..s0 + src_cols]);
	}
}

fn merge_slice<T: Copy + PartialEq>(dst: &mut [T], src: &[T], null: Option<T>) {
	match null {
		Some(null) => {
			for (d, s) in dst.iter_mut().zip(src) {
				if *s != null {
					*d = *s;
				}
			}
		}
		// Without a no-data value every pixel counts, so the later input wins
		// everywhere.
		None => dst.copy_from_slice(src),
	}
}

fn subsample_slice<T: Copy>(src: &[T], shape: (usize, usize), level: usize) -> (Vec<T>, (usize, usize)) {
	let (nrows, ncols) = shape;
	let offset = level / 2;
	let sub_rows = nrows.saturating_sub(offset).div_ceil(level);
	let sub_cols = ncols.saturating_sub(offset).div_ceil(level);
	let mut out = Vec::with_capacity(sub_rows * sub_cols);
	let mut row = offset;
	while row < nrows {
		let mut col = offset;
		while col < ncols {
			out.push(src[row * ncols + col]);
			col += level;
		}
		row += level;
	}
	(out, (sub_rows, sub_cols))
}

fn crop_slice<T: Copy>(src: &[T], shape: (usize, usize), new_shape: (usize, usize)) -> Vec<T> {
	let (_, ncols) = shape;
	let (new_rows, new_cols) = new_shape;
	let mut out = Vec::with_capacity(new_rows * new_cols);
	for row in 0..new_rows {
		let s0 = row * ncols;
		out.extend_from_slice(&src[s0..s0 + new_cols]);
	}
	out
}

/// Dispatches over all pixel types, binding the inner `Vec<T>` to `$v`.
macro_rules! per_type {
	($data:expr, $v:ident => $e:expr) => {
		match $data {
			BlockData::U8($v) => $e,
			BlockData::U16($v) => $e,
			BlockData::U32($v) => $e,
			BlockData::I16($v) => $e,
			BlockData::I32($v) => $e,
			BlockData::F32($v) => $e,
			BlockData::F64($v) => $e,
		}
	};
}

/// Dispatches over matching pairs of pixel types; mismatches fall through to
/// `$mismatch`.
macro_rules! per_type_pair {
	($a:expr, $b:expr, $x:ident, $y:ident => $e:expr, $mismatch:expr) => {
		match ($a, $b) {
			(BlockData::U8($x), BlockData::U8($y)) => $e,
			(BlockData::U16($x), BlockData::U16($y)) => $e,
			(BlockData::U32($x), BlockData::U32($y)) => $e,
			(BlockData::I16($x), BlockData::I16($y)) => $e,
			(BlockData::I32($x), BlockData::I32($y)) => $e,
			(BlockData::F32($x), BlockData::F32($y)) => $e,
			(BlockData::F64($x), BlockData::F64($y)) => $e,
			_ => $mismatch,
		}
	};
}

impl PixelBlock {
	/// Creates a block of the given type and shape from an existing buffer.
	///
	/// # Errors
	/// Fails when the buffer length does not match `nrows * ncols`.
	pub fn from_data(nrows: usize, ncols: usize, data: BlockData) -> Result<PixelBlock> {
		let len = per_type!(&data, v => v.len());
		ensure!(
			len == nrows * ncols,
			"buffer of {len} pixels cannot form a {nrows}x{ncols} block"
		);
		Ok(PixelBlock { nrows, ncols, data })
	}

	/// Creates a block filled with a constant value (usually the no-data
	/// value), cast into the block's pixel type.
	#[must_use]
	pub fn filled(dtype: RasterType, nrows: usize, ncols: usize, fill: f64) -> PixelBlock {
		let n = nrows * ncols;
		let data = match dtype {
			RasterType::U8 => BlockData::U8(vec![cast_null(fill); n]),
			RasterType::U16 => BlockData::U16(vec![cast_null(fill); n]),
			RasterType::U32 => BlockData::U32(vec![cast_null(fill); n]),
			RasterType::I16 => BlockData::I16(vec![cast_null(fill); n]),
			RasterType::I32 => BlockData::I32(vec![cast_null(fill); n]),
			RasterType::F32 => BlockData::F32(vec![cast_null(fill); n]),
			RasterType::F64 => BlockData::F64(vec![cast_null(fill); n]),
		};
		PixelBlock { nrows, ncols, data }
	}

	/// `(nrows, ncols)`.
	#[must_use]
	pub fn shape(&self) -> (usize, usize) {
		(self.nrows, self.ncols)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nrows * self.ncols
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[must_use]
	pub fn dtype(&self) -> RasterType {
		match &self.data {
			BlockData::U8(_) => RasterType::U8,
			BlockData::U16(_) => RasterType::U16,
			BlockData::U32(_) => RasterType::U32,
			BlockData::I16(_) => RasterType::I16,
			BlockData::I32(_) => RasterType::I32,
			BlockData::F32(_) => RasterType::F32,
			BlockData::F64(_) => RasterType::F64,
		}
	}

	#[must_use]
	pub fn data(&self) -> &BlockData {
		&self.data
	}

	#[must_use]
	pub fn into_data(self) -> BlockData {
		self.data
	}

	/// Copies `src` into this block at `(row_off, col_off)`.
	///
	/// # Errors
	/// Fails when the pixel types differ or `src` does not fit.
	pub fn paste(&mut self, src: &PixelBlock, row_off: usize, col_off: usize) -> Result<()> {
		ensure!(
			row_off + src.nrows <= self.nrows && col_off + src.ncols <= self.ncols,
			"cannot paste {}x{} at ({row_off}, {col_off}) into {}x{}",
			src.nrows,
			src.ncols,
			self.nrows,
			self.ncols
		);
		let dst_cols = self.ncols;
		let (dst_type, src_type) = (self.dtype(), src.dtype());
		per_type_pair!(
			&mut self.data, &src.data,
			d, s => paste_slice(d, dst_cols, s, (src.nrows, src.ncols), row_off, col_off),
			bail!("cannot paste {src_type:?} pixels into a {dst_type:?} block")
		);
		Ok(())
	}

	/// Overwrites this block with `other` wherever `other` differs from the
	/// no-data value. With no no-data value, `other` wins everywhere.
	///
	/// # Errors
	/// Fails when shapes or pixel types differ.
	pub fn merge_from(&mut self, other: &PixelBlock, null_val: Option<f64>) -> Result<()> {
		ensure!(
			self.shape() == other.shape(),
			"cannot merge a {:?} block into a {:?} block",
			other.shape(),
			self.shape()
		);
		let (dst_type, src_type) = (self.dtype(), other.dtype());
		per_type_pair!(
			&mut self.data, &other.data,
			d, s => merge_slice(d, s, null_val.map(cast_null)),
			bail!("cannot merge {src_type:?} pixels into a {dst_type:?} block")
		);
		Ok(())
	}

	/// Takes every `level`-th pixel in each dimension, starting at offset
	/// `level / 2`, as nearest-neighbour overview input.
	#[must_use]
	pub fn subsample(&self, level: usize) -> PixelBlock {
		let shape = self.shape();
		per_type!(&self.data, v => {
			let (sub, (nrows, ncols)) = subsample_slice(v, shape, level);
			PixelBlock { nrows, ncols, data: sub.into() }
		})
	}

	/// Keeps only the first `nrows` x `ncols` pixels.
	#[must_use]
	pub fn crop(&self, nrows: usize, ncols: usize) -> PixelBlock {
		let nrows = nrows.min(self.nrows);
		let ncols = ncols.min(self.ncols);
		if (nrows, ncols) == self.shape() {
			return self.clone();
		}
		let shape = self.shape();
		per_type!(&self.data, v => PixelBlock {
			nrows,
			ncols,
			data: crop_slice(v, shape, (nrows, ncols)).into(),
		})
	}

	/// Calls `f` with every pixel value, widened to `f64`, in row-major order.
	pub fn for_each_value(&self, mut f: impl FnMut(f64)) {
		per_type!(&self.data, v => {
			for value in v {
				f((*value).into());
			}
		});
	}
}

impl From<Vec<u8>> for BlockData {
	fn from(v: Vec<u8>) -> Self {
		BlockData::U8(v)
	}
}
impl From<Vec<u16>> for BlockData {
	fn from(v: Vec<u16>) -> Self {
		BlockData::U16(v)
	}
}
impl From<Vec<u32>> for BlockData {
	fn from(v: Vec<u32>) -> Self {
		BlockData::U32(v)
	}
}
impl From<Vec<i16>> for BlockData {
	fn from(v: Vec<i16>) -> Self {
		BlockData::I16(v)
	}
}
impl From<Vec<i32>> for BlockData {
	fn from(v: Vec<i32>) -> Self {
		BlockData::I32(v)
	}
}
impl From<Vec<f32>> for BlockData {
	fn from(v: Vec<f32>) -> Self {
		BlockData::F32(v)
	}
}
impl From<Vec<f64>> for BlockData {
	fn from(v: Vec<f64>) -> Self {
		BlockData::F64(v)
	}
}
