//! End-to-end mosaic tests: build real rasters, mosaic them, read the result
//! back and compare pixel by pixel.

use anyhow::Result;
use assert_fs::TempDir;
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use mosara_core::{MosaicError, MosaicOptions, mosaic, pyramid};
use std::path::{Path, PathBuf};

const NULL: u16 = 0;

fn utm_wkt() -> String {
	SpatialRef::from_epsg(32756).unwrap().to_wkt().unwrap()
}

fn make_raster(
	path: &Path,
	values: &[u16],
	nrows: usize,
	ncols: usize,
	transform: [f64; 6],
	wkt: &str,
) -> Result<()> {
	assert_eq!(values.len(), nrows * ncols);
	let driver = DriverManager::get_driver_by_name("GTiff")?;
	let mut ds = driver.create_with_band_type::<u16, _>(path, ncols, nrows, 1)?;
	ds.set_geo_transform(&transform)?;
	ds.set_projection(wkt)?;
	let mut band = ds.rasterband(1)?;
	band.set_no_data_value(Some(f64::from(NULL)))?;
	band.write((0, 0), (ncols, nrows), &mut Buffer::new((ncols, nrows), values.to_vec()))?;
	ds.flush_cache()?;
	Ok(())
}

fn read_band_u16(path: &Path) -> Result<(Vec<u16>, usize, usize)> {
	let ds = Dataset::open(path)?;
	let (ncols, nrows) = ds.raster_size();
	let band = ds.rasterband(1)?;
	let buf = band.read_as::<u16>((0, 0), (ncols, nrows), (ncols, nrows), None)?;
	Ok((buf.data().to_vec(), nrows, ncols))
}

fn read_stats(path: &Path) -> Result<(f64, f64, f64, f64)> {
	let ds = Dataset::open(path)?;
	let band = ds.rasterband(1)?;
	let item = |key: &str| -> f64 {
		band
			.metadata_item(key, "")
			.unwrap_or_else(|| panic!("missing metadata {key}"))
			.parse()
			.unwrap()
	};
	Ok((
		item("STATISTICS_MINIMUM"),
		item("STATISTICS_MAXIMUM"),
		item("STATISTICS_MEAN"),
		item("STATISTICS_STDDEV"),
	))
}

/// A raster whose pixel value is its column index (column 0 is null).
fn column_ramp(nrows: usize, ncols: usize) -> Vec<u16> {
	let mut values = Vec::with_capacity(nrows * ncols);
	for _ in 0..nrows {
		values.extend((0..ncols).map(|c| c as u16));
	}
	values
}

fn default_transform() -> [f64; 6] {
	[300_000.0, 10.0, 0.0, 7_000_000.0, 0.0, -10.0]
}

/// Two column-ramp tiles side by side with a 2-column overlap, as in S1.
fn side_by_side_fixture(dir: &Path, nrows: usize, ncols: usize) -> Result<(Vec<PathBuf>, Vec<u16>, usize, usize)> {
	let wkt = utm_wkt();
	let transform1 = default_transform();
	let mut transform2 = transform1;
	transform2[0] += (ncols as f64 - 2.0) * transform1[1];

	let img = column_ramp(nrows, ncols);
	let file1 = dir.join("tile1.tif");
	let file2 = dir.join("tile2.tif");
	make_raster(&file1, &img, nrows, ncols, transform1, &wkt)?;
	make_raster(&file2, &img, nrows, ncols, transform2, &wkt)?;

	// The expected mosaic: the left tile, then the right tile starting at its
	// second column. The right tile's first column is null and must not
	// overwrite the left tile's second-to-last column.
	let out_cols = 2 * ncols - 2;
	let mut expected = vec![0u16; nrows * out_cols];
	for row in 0..nrows {
		for col in 0..ncols {
			expected[row * out_cols + col] = img[row * ncols + col];
		}
		for col in 1..ncols {
			expected[row * out_cols + ncols - 2 + col] = img[row * ncols + col];
		}
	}

	Ok((vec![file1, file2], expected, nrows, out_cols))
}

#[test]
fn side_by_side_with_overlap() -> Result<()> {
	let dir = TempDir::new()?;
	let (files, expected, nrows, out_cols) = side_by_side_fixture(dir.path(), 600, 900)?;
	let outfile = dir.path().join("mosaic.tif");

	let options = MosaicOptions {
		blocksize: 512,
		..MosaicOptions::default()
	};
	let report = mosaic(&files, &outfile, &options)?;

	let (got, got_rows, got_cols) = read_band_u16(&outfile)?;
	assert_eq!((got_rows, got_cols), (nrows, out_cols));
	assert_eq!(got, expected);

	// No-data must be set on the band.
	let ds = Dataset::open(&outfile)?;
	assert_eq!(ds.rasterband(1)?.no_data_value(), Some(f64::from(NULL)));

	// The monitor report carries the run parameters and phase stamps.
	let json = serde_json::to_value(&report)?;
	assert_eq!(json["params"]["numinfiles"], 2);
	assert_eq!(json["params"]["numthreads"], 4);
	for phase in ["imginfodict", "projection", "analysis", "domosaic"] {
		assert!(json["timestamps"][format!("{phase}:start")].is_f64());
		assert!(json["timestamps"][format!("{phase}:end")].is_f64());
	}
	Ok(())
}

#[test]
fn side_by_side_statistics_match_batch_values() -> Result<()> {
	let dir = TempDir::new()?;
	let (files, expected, _, _) = side_by_side_fixture(dir.path(), 300, 500)?;
	let outfile = dir.path().join("mosaic.tif");
	mosaic(&files, &outfile, &MosaicOptions::default())?;

	let valid: Vec<f64> = expected.iter().filter(|&&v| v != NULL).map(|&v| f64::from(v)).collect();
	let mean = valid.iter().sum::<f64>() / valid.len() as f64;
	let variance = valid.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / valid.len() as f64;

	let (min, max, got_mean, got_stddev) = read_stats(&outfile)?;
	assert_eq!(min, 1.0);
	assert_eq!(max, valid.iter().copied().fold(f64::MIN, f64::max));
	assert!((got_mean - mean).abs() < 1e-9);
	assert!((got_stddev - variance.sqrt()).abs() < 1e-9);
	Ok(())
}

#[test]
fn full_containment_inner_wins_where_not_null() -> Result<()> {
	let dir = TempDir::new()?;
	let wkt = utm_wkt();
	let (nrows, ncols) = (400, 400);
	let outer = vec![3u16; nrows * ncols];
	let outer_path = dir.path().join("outer.tif");
	make_raster(&outer_path, &outer, nrows, ncols, default_transform(), &wkt)?;

	// A 100x100 inner tile at pixel offset (120, 150), value 7, with one
	// null row in the middle.
	let (in_rows, in_cols, row_off, col_off) = (100, 100, 120usize, 150usize);
	let mut inner = vec![7u16; in_rows * in_cols];
	for col in 0..in_cols {
		inner[50 * in_cols + col] = NULL;
	}
	let mut inner_transform = default_transform();
	inner_transform[0] += col_off as f64 * 10.0;
	inner_transform[3] -= row_off as f64 * 10.0;
	let inner_path = dir.path().join("inner.tif");
	make_raster(&inner_path, &inner, in_rows, in_cols, inner_transform, &wkt)?;

	let outfile = dir.path().join("mosaic.tif");
	let options = MosaicOptions {
		blocksize: 256,
		..MosaicOptions::default()
	};
	mosaic(&[outer_path, inner_path], &outfile, &options)?;

	let (got, got_rows, got_cols) = read_band_u16(&outfile)?;
	assert_eq!((got_rows, got_cols), (nrows, ncols));
	for row in 0..nrows {
		for col in 0..ncols {
			let in_inner =
				row >= row_off && row < row_off + in_rows && col >= col_off && col < col_off + in_cols;
			let expected = if in_inner && row != row_off + 50 { 7 } else { 3 };
			assert_eq!(got[row * ncols + col], expected, "pixel ({row}, {col})");
		}
	}
	Ok(())
}

#[test]
fn uncovered_blocks_are_written_as_null() -> Result<()> {
	let dir = TempDir::new()?;
	let wkt = utm_wkt();

	// Two 120x120 tiles in opposite corners of a 400x400 grid; with a block
	// size of 200 the off-diagonal blocks intersect no input at all.
	let a = vec![5u16; 120 * 120];
	let mut b_transform = default_transform();
	b_transform[0] += 280.0 * 10.0;
	b_transform[3] -= 280.0 * 10.0;
	let a_path = dir.path().join("a.tif");
	let b_path = dir.path().join("b.tif");
	make_raster(&a_path, &a, 120, 120, default_transform(), &wkt)?;
	make_raster(&b_path, &vec![9u16; 120 * 120], 120, 120, b_transform, &wkt)?;

	let outfile = dir.path().join("mosaic.tif");
	let options = MosaicOptions {
		blocksize: 200,
		..MosaicOptions::default()
	};
	mosaic(&[a_path, b_path], &outfile, &options)?;

	let (got, _, ncols) = read_band_u16(&outfile)?;
	assert_eq!(ncols, 400);
	// Top-right and bottom-left quadrants are entirely null.
	for row in 0..200 {
		for col in 200..400 {
			assert_eq!(got[row * 400 + col], NULL, "pixel ({row}, {col})");
		}
	}
	for row in 200..400 {
		for col in 0..200 {
			assert_eq!(got[row * 400 + col], NULL, "pixel ({row}, {col})");
		}
	}
	assert_eq!(got[0], 5);
	assert_eq!(got[399 * 400 + 399], 9);
	Ok(())
}

#[test]
fn block_overhanging_its_only_input_is_null_padded() -> Result<()> {
	let dir = TempDir::new()?;
	let wkt = utm_wkt();

	// Tile B sits right of tile A, shifted 100 rows down, so the top of the
	// right-hand output block reaches past B's upper edge.
	let size = 500;
	let a_path = dir.path().join("a.tif");
	let b_path = dir.path().join("b.tif");
	make_raster(&a_path, &vec![5u16; size * size], size, size, default_transform(), &wkt)?;
	let mut b_transform = default_transform();
	b_transform[0] += size as f64 * 10.0;
	b_transform[3] -= 100.0 * 10.0;
	make_raster(&b_path, &vec![9u16; size * size], size, size, b_transform, &wkt)?;

	let outfile = dir.path().join("mosaic.tif");
	let options = MosaicOptions {
		blocksize: 500,
		..MosaicOptions::default()
	};
	mosaic(&[a_path, b_path], &outfile, &options)?;

	let (got, nrows, ncols) = read_band_u16(&outfile)?;
	assert_eq!((nrows, ncols), (600, 1000));
	for row in 0..nrows {
		for col in 0..ncols {
			let expected = if col < 500 {
				if row < 500 { 5 } else { NULL }
			} else if row >= 100 {
				9
			} else {
				NULL
			};
			assert_eq!(got[row * ncols + col], expected, "pixel ({row}, {col})");
		}
	}
	Ok(())
}

#[test]
fn single_overlapping_row_takes_non_null_values_from_the_later_input() -> Result<()> {
	let dir = TempDir::new()?;
	let wkt = utm_wkt();
	let size = 300;

	let a_path = dir.path().join("a.tif");
	make_raster(&a_path, &vec![4u16; size * size], size, size, default_transform(), &wkt)?;

	// B starts on A's last row; B is null in every even column.
	let mut b = vec![0u16; size * size];
	for row in 0..size {
		for col in (1..size).step_by(2) {
			b[row * size + col] = 8;
		}
	}
	let mut b_transform = default_transform();
	b_transform[3] -= (size as f64 - 1.0) * 10.0;
	let b_path = dir.path().join("b.tif");
	make_raster(&b_path, &b, size, size, b_transform, &wkt)?;

	let outfile = dir.path().join("mosaic.tif");
	let options = MosaicOptions {
		blocksize: 256,
		..MosaicOptions::default()
	};
	mosaic(&[a_path, b_path], &outfile, &options)?;

	let (got, nrows, ncols) = read_band_u16(&outfile)?;
	assert_eq!((nrows, ncols), (2 * size - 1, size));
	let overlap_row = size - 1;
	for col in 0..ncols {
		let expected = if col % 2 == 1 { 8 } else { 4 };
		assert_eq!(got[overlap_row * ncols + col], expected, "overlap pixel ({col})");
	}
	// Above the overlap it is pure A, below pure B.
	assert!(got[..overlap_row * ncols].iter().all(|&v| v == 4));
	for row in size..nrows {
		for col in 0..ncols {
			let expected = if col % 2 == 1 { 8 } else { NULL };
			assert_eq!(got[row * ncols + col], expected, "pixel ({row}, {col})");
		}
	}
	Ok(())
}

#[test]
fn output_is_identical_for_any_thread_count() -> Result<()> {
	let dir = TempDir::new()?;
	let (files, expected, _, _) = side_by_side_fixture(dir.path(), 400, 700)?;

	let mut outputs = Vec::new();
	for numthreads in [1, 2, 4, 8] {
		let outfile = dir.path().join(format!("mosaic_{numthreads}.tif"));
		let options = MosaicOptions {
			numthreads,
			blocksize: 256,
			..MosaicOptions::default()
		};
		mosaic(&files, &outfile, &options)?;
		let (got, _, _) = read_band_u16(&outfile)?;
		outputs.push(got);
	}

	assert_eq!(outputs[0], expected);
	for other in &outputs[1..] {
		assert_eq!(&outputs[0], other);
	}
	Ok(())
}

#[test]
fn overviews_are_nearest_neighbour_subsamples() -> Result<()> {
	let dir = TempDir::new()?;
	let wkt = utm_wkt();

	// Wide enough for two overview levels (8200 / 8 >= 1024).
	let (nrows, ncols) = (400, 8200);
	let img = column_ramp(nrows, ncols);
	let input = dir.path().join("wide.tif");
	make_raster(&input, &img, nrows, ncols, default_transform(), &wkt)?;

	let outfile = dir.path().join("mosaic.tif");
	mosaic(&[input], &outfile, &MosaicOptions::default())?;

	let levels = pyramid::overview_levels(ncols, nrows);
	assert_eq!(levels, vec![4, 8]);

	let ds = Dataset::open(&outfile)?;
	let band = ds.rasterband(1)?;
	for (index, &level) in levels.iter().enumerate() {
		let level = level as usize;
		let overview = band.overview(index)?;
		let (ov_cols, ov_rows) = overview.size();
		let got = overview.read_as::<u16>((0, 0), (ov_cols, ov_rows), (ov_cols, ov_rows), None)?;
		let data = got.data();

		let offset = level / 2;
		for row in 0..ov_rows {
			for col in 0..ov_cols {
				let src_row = offset + row * level;
				let src_col = offset + col * level;
				assert_eq!(
					data[row * ov_cols + col],
					img[src_row * ncols + src_col],
					"overview {level} pixel ({row}, {col})"
				);
			}
		}
	}
	Ok(())
}

#[test]
fn mismatched_projections_are_rejected_up_front() -> Result<()> {
	let dir = TempDir::new()?;
	let a_path = dir.path().join("a.tif");
	let b_path = dir.path().join("b.tif");
	make_raster(&a_path, &vec![1u16; 100 * 100], 100, 100, default_transform(), &utm_wkt())?;
	make_raster(
		&b_path,
		&vec![2u16; 100 * 100],
		100,
		100,
		default_transform(),
		&SpatialRef::from_epsg(32755)?.to_wkt()?,
	)?;

	let outfile = dir.path().join("mosaic.tif");
	let err = mosaic(&[a_path, b_path], &outfile, &MosaicOptions::default()).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<MosaicError>(),
		Some(MosaicError::ProjectionMismatch(_))
	));
	assert!(!outfile.exists());
	Ok(())
}

#[test]
fn unknown_driver_is_rejected() -> Result<()> {
	let dir = TempDir::new()?;
	let a_path = dir.path().join("a.tif");
	make_raster(&a_path, &vec![1u16; 64 * 64], 64, 64, default_transform(), &utm_wkt())?;

	let options = MosaicOptions {
		driver: "NOT_A_DRIVER".to_string(),
		..MosaicOptions::default()
	};
	let err = mosaic(&[a_path], &dir.path().join("out.xyz"), &options).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<MosaicError>(),
		Some(MosaicError::UnsupportedDriver(_))
	));
	Ok(())
}
