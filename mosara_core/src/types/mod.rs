//! Value types shared across the engine: geotransforms, block rectangles,
//! raster geometry snapshots and typed pixel buffers.

mod block;
mod geo;
mod image_info;
mod pixel;

pub use block::*;
pub use geo::*;
pub use image_info::*;
pub use pixel::*;
