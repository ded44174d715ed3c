//! Assembly of decoded blocks into a requested window.
//!
//! The assembler owns the output buffers, pre-filled with the fill value, and
//! copies the part of each decoded block that falls inside the window. Blocks
//! can be inserted in any order; each output pixel is written by at most one
//! block.

use serde::Serialize;

use super::geometry::ImageGeometry;
use super::options::{ResampleMethod, Window};
use super::resample::resample;
use super::samples::{with_buffer, RasterBuffer, Sample, SampleType, StoredSample};
use crate::error::{DecodeError, GeoTiffError};

// =============================================================================
// Output
// =============================================================================

/// Samples of a read, either one buffer per band or one interleaved buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterData {
    Bands(Vec<RasterBuffer>),
    Interleaved(RasterBuffer),
}

/// Result of a windowed read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rasters {
    pub width: u32,
    pub height: u32,
    /// Number of bands in the result
    pub samples: usize,
    pub data: RasterData,
}

impl Rasters {
    pub fn bands(&self) -> Option<&[RasterBuffer]> {
        match &self.data {
            RasterData::Bands(bands) => Some(bands),
            RasterData::Interleaved(_) => None,
        }
    }

    pub fn interleaved(&self) -> Option<&RasterBuffer> {
        match &self.data {
            RasterData::Interleaved(buffer) => Some(buffer),
            RasterData::Bands(_) => None,
        }
    }

    pub fn into_bands(self) -> Option<Vec<RasterBuffer>> {
        match self.data {
            RasterData::Bands(bands) => Some(bands),
            RasterData::Interleaved(_) => None,
        }
    }

    /// Resample to `width` x `height`; a no-op when the size already matches.
    pub fn resampled(self, width: u32, height: u32, method: ResampleMethod) -> Self {
        if width == self.width && height == self.height {
            return self;
        }
        let (in_w, in_h) = (self.width as usize, self.height as usize);
        let (out_w, out_h) = (width as usize, height as usize);
        let data = match &self.data {
            RasterData::Bands(bands) => RasterData::Bands(
                bands
                    .iter()
                    .map(|b| resample(b, in_w, in_h, out_w, out_h, 1, method))
                    .collect(),
            ),
            RasterData::Interleaved(buffer) => RasterData::Interleaved(resample(
                buffer,
                in_w,
                in_h,
                out_w,
                out_h,
                self.samples,
                method,
            )),
        };
        Self {
            width,
            height,
            samples: self.samples,
            data,
        }
    }
}

// =============================================================================
// Block planning
// =============================================================================

/// One block needed by a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    /// Sample plane for planar images, 0 for chunky ones
    pub sample: usize,
}

/// Blocks intersecting `window`, clipped to the image. Blocks entirely
/// outside the image are never requested.
pub fn plan_blocks(geometry: &ImageGeometry, window: &Window, samples: &[usize]) -> Vec<BlockRequest> {
    let tw = geometry.tile_width as i64;
    let th = geometry.tile_height as i64;
    let min_x = window.x0.div_euclid(tw).max(0);
    let min_y = window.y0.div_euclid(th).max(0);
    let max_x = ceil_div(window.x1, tw).min(geometry.tiles_across as i64);
    let max_y = ceil_div(window.y1, th).min(geometry.tiles_down as i64);

    let planes: Vec<usize> = if geometry.is_planar() {
        let mut planes = samples.to_vec();
        planes.sort_unstable();
        planes.dedup();
        planes
    } else {
        vec![0]
    };

    let mut blocks = Vec::new();
    for y in min_y..max_y {
        for x in min_x..max_x {
            for &sample in &planes {
                let (x, y) = (x as u32, y as u32);
                blocks.push(BlockRequest {
                    index: geometry.chunk_index(x, y, sample),
                    x,
                    y,
                    sample,
                });
            }
        }
    }
    blocks
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    -((-value).div_euclid(divisor))
}

// =============================================================================
// WindowAssembler
// =============================================================================

enum Output {
    Bands(Vec<RasterBuffer>),
    Interleaved(RasterBuffer),
}

/// Collects decoded blocks into the output buffers of one window.
pub struct WindowAssembler<'a> {
    geometry: &'a ImageGeometry,
    window: Window,
    window_width: usize,
    samples: Vec<usize>,
    output: Output,
}

impl<'a> WindowAssembler<'a> {
    /// Allocate outputs for `samples` (image band indices) over `window`.
    pub fn new(
        geometry: &'a ImageGeometry,
        window: Window,
        samples: Vec<usize>,
        interleave: bool,
        fill_value: f64,
    ) -> Result<Self, GeoTiffError> {
        window.validate()?;
        if samples.is_empty() {
            return Err(GeoTiffError::InvalidReadOptions(
                "at least one sample must be requested".into(),
            ));
        }
        let types = samples
            .iter()
            .map(|&s| {
                geometry.sample_type(s).ok_or_else(|| {
                    GeoTiffError::InvalidReadOptions(format!(
                        "sample {} out of range, image has {} samples",
                        s, geometry.samples_per_pixel
                    ))
                })
            })
            .collect::<Result<Vec<SampleType>, _>>()?;

        let window_width = to_usize(window.width())?;
        let pixels = window_width
            .checked_mul(to_usize(window.height())?)
            .ok_or_else(too_large)?;

        let output = if interleave {
            let ty = SampleType::widest(&types).ok_or_else(too_large)?;
            let len = pixels.checked_mul(samples.len()).ok_or_else(too_large)?;
            Output::Interleaved(RasterBuffer::filled(ty, len, fill_value))
        } else {
            Output::Bands(
                types
                    .iter()
                    .map(|&ty| RasterBuffer::filled(ty, pixels, fill_value))
                    .collect(),
            )
        };

        Ok(Self {
            geometry,
            window,
            window_width,
            samples,
            output,
        })
    }

    /// Copy the window part of one normalized decoded block.
    pub fn insert(&mut self, block: &BlockRequest, data: &[u8]) -> Result<(), DecodeError> {
        let g = self.geometry;
        let tw = g.tile_width as i64;
        let first_col = block.x as i64 * tw;
        let first_line = block.y as i64 * g.tile_height as i64;
        let block_height = g.block_height(block.y) as i64;

        let x_start = (self.window.x0 - first_col).max(0);
        let x_end = tw
            .min(self.window.x1 - first_col)
            .min(g.width as i64 - first_col);
        let y_start = (self.window.y0 - first_line).max(0);
        let y_end = block_height
            .min(self.window.y1 - first_line)
            .min(g.height as i64 - first_line);
        if x_start >= x_end || y_start >= y_end {
            return Ok(());
        }

        let total = self.samples.len();
        for (channel, &sample) in self.samples.iter().enumerate() {
            if g.is_planar() && sample != block.sample {
                continue;
            }
            let Some(stored) = g.stored_sample(sample) else {
                continue;
            };
            let region = Region {
                x_start,
                x_end,
                y_start,
                y_end,
                first_col,
                first_line,
                tile_width: g.tile_width as usize,
                bytes_per_pixel: g.block_bytes_per_pixel(sample),
                sample_offset: g.sample_byte_offset(sample),
                stored: *stored,
            };

            let needed = region.required_len();
            if data.len() < needed {
                return Err(DecodeError::new(
                    g.compression,
                    format!(
                        "decoded block {} has {} bytes, expected at least {}",
                        block.index,
                        data.len(),
                        needed
                    ),
                ));
            }

            let target = Target {
                window: self.window,
                window_width: self.window_width,
                stride: 1,
                channel: 0,
            };
            match &mut self.output {
                Output::Bands(bands) => {
                    with_buffer!(&mut bands[channel], v => copy_region(v, &region, &target, data))
                }
                Output::Interleaved(buffer) => {
                    let target = Target {
                        stride: total,
                        channel,
                        ..target
                    };
                    with_buffer!(buffer, v => copy_region(v, &region, &target, data))
                }
            }
        }
        Ok(())
    }

    /// Finish at the native window size.
    pub fn finish(self) -> Rasters {
        let data = match self.output {
            Output::Bands(bands) => RasterData::Bands(bands),
            Output::Interleaved(buffer) => RasterData::Interleaved(buffer),
        };
        Rasters {
            width: self.window.width() as u32,
            height: self.window.height() as u32,
            samples: self.samples.len(),
            data,
        }
    }
}

/// Part of a block to copy, in block coordinates.
struct Region {
    x_start: i64,
    x_end: i64,
    y_start: i64,
    y_end: i64,
    first_col: i64,
    first_line: i64,
    tile_width: usize,
    bytes_per_pixel: usize,
    sample_offset: usize,
    stored: StoredSample,
}

impl Region {
    fn src_offset(&self, x: i64, y: i64) -> usize {
        (y as usize * self.tile_width + x as usize) * self.bytes_per_pixel + self.sample_offset
    }

    fn required_len(&self) -> usize {
        self.src_offset(self.x_end - 1, self.y_end - 1) + self.stored.stored_size()
    }
}

/// Where copied values land in the output.
#[derive(Clone, Copy)]
struct Target {
    window: Window,
    window_width: usize,
    stride: usize,
    channel: usize,
}

fn copy_region<T: Sample>(dst: &mut [T], region: &Region, target: &Target, data: &[u8]) {
    for y in region.y_start..region.y_end {
        let out_row = (y + region.first_line - target.window.y0) as usize * target.window_width;
        for x in region.x_start..region.x_end {
            let out_col = (x + region.first_col - target.window.x0) as usize;
            let dst_index = (out_row + out_col) * target.stride + target.channel;
            dst[dst_index] = region.stored.read::<T>(&data[region.src_offset(x, y)..]);
        }
    }
}

fn to_usize(value: i64) -> Result<usize, GeoTiffError> {
    usize::try_from(value).map_err(|_| too_large())
}

fn too_large() -> GeoTiffError {
    GeoTiffError::InvalidReadOptions("requested window is too large".into())
}
