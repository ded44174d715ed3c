//! Block geometry, sample types and window assembly.

mod assembler;
mod geometry;
mod options;
mod resample;
mod samples;

pub use assembler::{plan_blocks, BlockRequest, RasterData, Rasters, WindowAssembler};
pub use geometry::ImageGeometry;
pub use options::{ReadRasterOptions, ResampleMethod, Window};
pub use resample::{bilinear, nearest, resample};
pub use samples::{f16_to_f32, RasterBuffer, Sample, SampleType, StoredSample};
