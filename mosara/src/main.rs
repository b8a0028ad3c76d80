use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use mosara_core::{DFLT_BLOCKSIZE, DFLT_DRIVER, DFLT_NUMTHREADS, DFLT_RESAMPLE_METHOD, MosaicOptions};
use std::fs;
use std::path::{Path, PathBuf};

/// Mosaic many georeferenced rasters into one, reading input blocks
/// concurrently.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
	/// Text file listing input rasters, one path per line
	#[arg(short = 'i', long)]
	infilelist: PathBuf,

	/// Name of the output raster
	#[arg(short = 'o', long)]
	outfile: PathBuf,

	/// Number of read threads
	#[arg(short = 'n', long, default_value_t = DFLT_NUMTHREADS)]
	numthreads: usize,

	/// Block size in pixels
	#[arg(short = 'b', long, default_value_t = DFLT_BLOCKSIZE)]
	blocksize: usize,

	/// Format driver to use for the output file
	#[arg(short = 'd', long, default_value = DFLT_DRIVER)]
	driver: String,

	/// A creation option for the output driver, as 'NAME=VALUE'. Can be given
	/// multiple times; overrides the per-driver defaults entirely
	#[arg(long = "co", value_name = "NAME=VALUE")]
	creation_option: Vec<String>,

	/// Null value to use (default comes from the input files)
	#[arg(long, allow_hyphen_values = true)]
	nullval: Option<f64>,

	/// Write monitoring info to this JSON file
	#[arg(long, value_name = "FILE")]
	monitorjson: Option<PathBuf>,

	/// EPSG number of the desired output projection
	#[arg(long, value_name = "EPSG", help_heading = "Output Projection Options")]
	outprojepsg: Option<u32>,

	/// Text file containing the WKT of the desired output projection
	#[arg(long, value_name = "FILE", help_heading = "Output Projection Options")]
	outprojwktfile: Option<PathBuf>,

	/// WKT string of the desired output projection
	#[arg(long, value_name = "WKT", help_heading = "Output Projection Options")]
	outprojwkt: Option<String>,

	/// Desired output X pixel size (default matches input)
	#[arg(long, help_heading = "Output Projection Options")]
	xres: Option<f64>,

	/// Desired output Y pixel size (default matches input)
	#[arg(long, help_heading = "Output Projection Options")]
	yres: Option<f64>,

	/// Resampling method to use when reprojecting
	#[arg(long, default_value = DFLT_RESAMPLE_METHOD, help_heading = "Output Projection Options")]
	resample: String,

	#[command(flatten)]
	verbose: Verbosity<WarnLevel>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	let filelist = read_filelist(&cli.infilelist)?;
	log::info!("mosaicking {} inputs into {:?}", filelist.len(), cli.outfile);

	let options = MosaicOptions {
		numthreads: cli.numthreads,
		blocksize: cli.blocksize,
		driver: cli.driver,
		null_val: cli.nullval,
		creation_options: (!cli.creation_option.is_empty()).then_some(cli.creation_option),
		out_proj_epsg: cli.outprojepsg,
		out_proj_wkt_file: cli.outprojwktfile,
		out_proj_wkt: cli.outprojwkt,
		out_x_res: cli.xres,
		out_y_res: cli.yres,
		resample_method: cli.resample,
	};

	let report = mosara_core::mosaic(&filelist, &cli.outfile, &options)?;

	if let Some(path) = &cli.monitorjson {
		let json = serde_json::to_string_pretty(&report)?;
		fs::write(path, json).with_context(|| format!("cannot write monitor report to {}", path.display()))?;
	}

	Ok(())
}

/// Reads the input list: one path per line, blank lines ignored.
fn read_filelist(path: &Path) -> Result<Vec<PathBuf>> {
	let content = fs::read_to_string(path).with_context(|| format!("cannot read input list {}", path.display()))?;
	Ok(
		content
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.map(PathBuf::from)
			.collect(),
	)
}
