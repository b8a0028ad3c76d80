//! Error taxonomy of the mosaic engine.
//!
//! Everything is transported through `anyhow`, but failures with a defined
//! category are constructed as [`MosaicError`] values so that callers (and
//! tests) can downcast and tell them apart.

use std::path::PathBuf;
use thiserror::Error;

/// Categorized failures of a mosaic run.
#[derive(Debug, Error)]
pub enum MosaicError {
	/// An input (or the output) dataset could not be opened.
	#[error("cannot open raster {path}: {message}")]
	BackendOpen { path: PathBuf, message: String },

	/// A windowed read failed.
	#[error("read failed on {path}: {message}")]
	BackendRead { path: PathBuf, message: String },

	/// A windowed write, metadata write or overview write failed.
	#[error("write failed on {path}: {message}")]
	BackendWrite { path: PathBuf, message: String },

	/// Inputs disagree on projection, pixel size or grid alignment and no
	/// reprojection was requested.
	#[error("projection mismatch: {0}")]
	ProjectionMismatch(String),

	/// Two contributors for the same output block produced different shapes.
	#[error("block shape mismatch: {0}")]
	BlockShapeMismatch(String),

	/// The requested output format driver is unknown to the backend.
	#[error("output driver '{0}' is not supported")]
	UnsupportedDriver(String),

	/// Invalid or contradictory run configuration.
	#[error("invalid configuration: {0}")]
	Config(String),
}
