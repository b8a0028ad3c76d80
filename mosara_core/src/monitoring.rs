//! Run monitoring: watermarks, timestamps and run parameters.
//!
//! The collected data serializes to the JSON report the CLI can write out:
//!
//! ```json
//! {
//!   "minMaxBlockCacheSize": [0, 3],
//!   "minMaxBlockQueueSize": [0, 8],
//!   "timestamps": { "analysis:start": 1714.5, "analysis:end": 1714.9 },
//!   "params": { "numthreads": 4, "blocksize": 1024, "cpucount": 8, "numinfiles": 2 }
//! }
//! ```

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> f64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs_f64()
}

/// Running minimum and maximum of a sampled value. Serializes as
/// `[min, max]`, with `null` entries before the first sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinMax {
	min: Option<u64>,
	max: Option<u64>,
}

impl MinMax {
	pub fn update(&mut self, value: u64) {
		self.min = Some(self.min.map_or(value, |m| m.min(value)));
		self.max = Some(self.max.map_or(value, |m| m.max(value)));
	}

	#[must_use]
	pub fn min_max(&self) -> (Option<u64>, Option<u64>) {
		(self.min, self.max)
	}
}

impl Serialize for MinMax {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		[self.min, self.max].serialize(serializer)
	}
}

/// Wall-clock stamps keyed by `"<name>:start"` / `"<name>:end"`, in seconds
/// since the Unix epoch.
#[derive(Debug, Default)]
pub struct TimeStampSet {
	stamps: BTreeMap<String, f64>,
}

impl TimeStampSet {
	pub fn start(&mut self, name: &str) {
		self.stamps.insert(format!("{name}:start"), now_secs());
	}

	pub fn end(&mut self, name: &str) {
		self.stamps.insert(format!("{name}:end"), now_secs());
	}

	#[must_use]
	pub fn get(&self, name: &str, which: &str) -> Option<f64> {
		self.stamps.get(&format!("{name}:{which}")).copied()
	}

	/// Seconds spent between the start and end stamps of `name`.
	#[must_use]
	pub fn elapsed(&self, name: &str) -> Option<f64> {
		Some(self.get(name, "end")? - self.get(name, "start")?)
	}
}

impl Serialize for TimeStampSet {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.stamps.len()))?;
		for (key, value) in &self.stamps {
			map.serialize_entry(key, value)?;
		}
		map.end()
	}
}

/// Parameters the run was started with.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunParams {
	pub numthreads: usize,
	pub blocksize: usize,
	pub cpucount: usize,
	pub numinfiles: usize,
}

/// All monitoring data of one mosaic run.
#[derive(Debug, Default, Serialize)]
pub struct Monitoring {
	#[serde(rename = "minMaxBlockCacheSize")]
	pub block_cache_size: MinMax,
	#[serde(rename = "minMaxBlockQueueSize")]
	pub block_queue_size: MinMax,
	pub timestamps: TimeStampSet,
	pub params: RunParams,
}

impl Monitoring {
	#[must_use]
	pub fn new() -> Monitoring {
		Monitoring::default()
	}

	/// Runs `f` between a start and an end stamp for `name`.
	pub fn timed<T>(&mut self, name: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
		self.timestamps.start(name);
		let result = f();
		self.timestamps.end(name);
		result
	}
}
