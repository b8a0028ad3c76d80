//! A concurrent block-streaming mosaic engine for georeferenced rasters.
//!
//! Many input rasters, possibly on slow remote storage, are composited into a
//! single output raster. Reading is fanned out over a pool of worker threads
//! that stream fixed-size pixel blocks into a bounded queue; a single writer
//! assembles and merges them strictly in output order, so the result is
//! bit-identical regardless of thread count. Per-band statistics and a
//! nearest-neighbour overview pyramid are produced in the same single pass.
//!
//! The main entry point is [`mosaic()`]:
//!
//! ```no_run
//! use mosara_core::{MosaicOptions, mosaic};
//! use std::path::{Path, PathBuf};
//!
//! let inputs = vec![PathBuf::from("tile_a.tif"), PathBuf::from("tile_b.tif")];
//! let report = mosaic(&inputs, Path::new("mosaic.tif"), &MosaicOptions::default())?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # anyhow::Ok(())
//! ```

pub mod backend;
pub mod cache;
pub mod error;
pub mod monitoring;
pub mod mosaic;
pub mod plan;
pub mod pyramid;
pub mod reader;
pub mod reproj;
pub mod stats;
pub mod types;
pub mod writer;

pub use error::MosaicError;
pub use monitoring::Monitoring;
pub use mosaic::{DFLT_BLOCKSIZE, DFLT_DRIVER, DFLT_NUMTHREADS, DFLT_RESAMPLE_METHOD, MosaicOptions, mosaic};
pub use types::*;
