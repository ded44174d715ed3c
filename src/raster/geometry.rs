//! Tile and strip geometry of one image.
//!
//! Strips are handled as tiles spanning the full image width, so the rest of
//! the read path only deals with a grid of blocks:
//!
//! ```text
//! tiles_across = ceil(width / tile_width)
//! tiles_down   = ceil(height / tile_height)
//! index        = y * tiles_across + x  (+ sample * tiles_across * tiles_down if planar)
//! ```

use bytes::Bytes;

use super::samples::{SampleType, StoredSample};
use crate::codec::{native_width, DecoderParams};
use crate::error::TiffError;
use crate::io::ByteOrder;
use crate::tiff::{
    ImageFileDirectory, TiffTag, PLANAR_CHUNKY, PLANAR_SEPARATE, PREDICTOR_NONE,
    SAMPLE_FORMAT_UINT,
};

/// Geometry and sample layout derived from a directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub is_tiled: bool,
    pub samples_per_pixel: u16,
    /// One entry per sample
    pub bits_per_sample: Vec<u16>,
    /// One entry per sample
    pub sample_format: Vec<u16>,
    pub planar_configuration: u16,
    pub compression: u16,
    pub predictor: u16,
    pub photometric_interpretation: Option<u16>,
    pub tiles_across: u32,
    pub tiles_down: u32,
    /// Byte offset of every block
    pub offsets: Vec<u64>,
    /// Byte count of every block; 0 marks a sparse block
    pub byte_counts: Vec<u64>,
    samples: Vec<StoredSample>,
}

impl ImageGeometry {
    /// Derive the geometry from a parsed directory.
    ///
    /// Fails when a required tag is missing, a value is out of range, or the
    /// offset tables do not match the block grid.
    pub fn from_directory(ifd: &ImageFileDirectory) -> Result<Self, TiffError> {
        let width = dimension(ifd, TiffTag::ImageWidth)?;
        let height = dimension(ifd, TiffTag::ImageLength)?;

        let is_tiled = ifd.contains(TiffTag::TileWidth);
        let (tile_width, tile_height) = if is_tiled {
            (
                dimension(ifd, TiffTag::TileWidth)?,
                dimension(ifd, TiffTag::TileLength)?,
            )
        } else {
            let rows = ifd
                .u64_value(TiffTag::RowsPerStrip)?
                .unwrap_or(height as u64)
                .min(height as u64);
            if rows == 0 {
                return Err(invalid(TiffTag::RowsPerStrip, "must be positive".into()));
            }
            (width, rows as u32)
        };

        let samples_per_pixel = ifd.u16_or(TiffTag::SamplesPerPixel, 1)?;
        if samples_per_pixel == 0 {
            return Err(invalid(TiffTag::SamplesPerPixel, "must be positive".into()));
        }
        let spp = samples_per_pixel as usize;
        let bits_per_sample = per_sample(ifd.u16_array(TiffTag::BitsPerSample)?, spp, 1);
        let sample_format = per_sample(
            ifd.u16_array(TiffTag::SampleFormat)?,
            spp,
            SAMPLE_FORMAT_UINT,
        );

        let planar_configuration = ifd.u16_or(TiffTag::PlanarConfiguration, PLANAR_CHUNKY)?;
        if planar_configuration != PLANAR_CHUNKY && planar_configuration != PLANAR_SEPARATE {
            return Err(invalid(
                TiffTag::PlanarConfiguration,
                format!("unknown value {}", planar_configuration),
            ));
        }

        let samples = bits_per_sample
            .iter()
            .zip(&sample_format)
            .map(|(&bits, &format)| StoredSample::new(format, bits))
            .collect::<Result<Vec<_>, _>>()?;

        let tiles_across = width.div_ceil(tile_width);
        let tiles_down = height.div_ceil(tile_height);

        let (offset_tag, count_tag) = if is_tiled {
            (TiffTag::TileOffsets, TiffTag::TileByteCounts)
        } else {
            (TiffTag::StripOffsets, TiffTag::StripByteCounts)
        };
        let offsets = ifd
            .u64_array(offset_tag)?
            .ok_or(TiffError::MissingTag(offset_tag.name()))?;
        let byte_counts = ifd
            .u64_array(count_tag)?
            .ok_or(TiffError::MissingTag(count_tag.name()))?;

        let mut geometry = Self {
            width,
            height,
            tile_width,
            tile_height,
            is_tiled,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            planar_configuration,
            compression: ifd.u16_or(TiffTag::Compression, 1)?,
            predictor: ifd.u16_or(TiffTag::Predictor, PREDICTOR_NONE)?,
            photometric_interpretation: ifd
                .u64_value(TiffTag::PhotometricInterpretation)?
                .map(|v| v as u16),
            tiles_across,
            tiles_down,
            offsets: Vec::new(),
            byte_counts: Vec::new(),
            samples,
        };

        let expected = geometry.block_count();
        for (tag, table) in [(offset_tag, &offsets), (count_tag, &byte_counts)] {
            if table.len() != expected {
                return Err(invalid(
                    tag,
                    format!("{} entries, expected {} blocks", table.len(), expected),
                ));
            }
        }
        geometry.offsets = offsets;
        geometry.byte_counts = byte_counts;
        Ok(geometry)
    }

    pub fn is_planar(&self) -> bool {
        self.planar_configuration == PLANAR_SEPARATE
    }

    /// Blocks in one sample plane.
    pub fn blocks_per_plane(&self) -> usize {
        self.tiles_across as usize * self.tiles_down as usize
    }

    /// Total number of blocks, across all planes for planar images.
    pub fn block_count(&self) -> usize {
        if self.is_planar() {
            self.blocks_per_plane() * self.samples_per_pixel as usize
        } else {
            self.blocks_per_plane()
        }
    }

    /// Index of the block at grid position `(x, y)`; `sample` only matters
    /// for planar images.
    pub fn chunk_index(&self, x: u32, y: u32, sample: usize) -> usize {
        let index = y as usize * self.tiles_across as usize + x as usize;
        if self.is_planar() {
            index + sample * self.blocks_per_plane()
        } else {
            index
        }
    }

    /// Rows stored in the block at grid row `y`. The last strip may be short.
    pub fn block_height(&self, y: u32) -> u32 {
        if self.is_tiled {
            return self.tile_height;
        }
        let start = y.saturating_mul(self.tile_height);
        self.tile_height.min(self.height.saturating_sub(start))
    }

    /// Byte range `(offset, length)` of a block, `None` for unknown indices.
    pub fn block_range(&self, index: usize) -> Option<(u64, u64)> {
        Some((*self.offsets.get(index)?, *self.byte_counts.get(index)?))
    }

    pub fn stored_sample(&self, sample: usize) -> Option<&StoredSample> {
        self.samples.get(sample)
    }

    pub fn sample_type(&self, sample: usize) -> Option<SampleType> {
        self.samples.get(sample).map(|s| s.sample_type)
    }

    /// Bytes per pixel in a normalized block holding `sample`.
    pub fn block_bytes_per_pixel(&self, sample: usize) -> usize {
        if self.is_planar() {
            self.bits_per_sample
                .get(sample)
                .map(|&b| native_width(b))
                .unwrap_or(0)
        } else {
            self.bits_per_sample.iter().map(|&b| native_width(b)).sum()
        }
    }

    /// Byte offset of `sample` inside a normalized pixel.
    pub fn sample_byte_offset(&self, sample: usize) -> usize {
        if self.is_planar() {
            0
        } else {
            self.bits_per_sample
                .iter()
                .take(sample)
                .map(|&b| native_width(b))
                .sum()
        }
    }

    /// Parameters handed to decoder factories and decode tasks.
    pub fn decoder_params(&self, byte_order: ByteOrder, jpeg_tables: Option<Bytes>) -> DecoderParams {
        DecoderParams {
            compression: self.compression,
            bits_per_sample: self.bits_per_sample.clone(),
            sample_format: self.sample_format.clone(),
            predictor: self.predictor,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            samples_per_pixel: self.samples_per_pixel,
            planar_configuration: self.planar_configuration,
            byte_order,
            photometric_interpretation: self.photometric_interpretation,
            jpeg_tables,
        }
    }
}

fn dimension(ifd: &ImageFileDirectory, tag: TiffTag) -> Result<u32, TiffError> {
    let value = ifd.required_u64(tag)?;
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid(tag, format!("invalid dimension {}", value))),
    }
}

/// Expand a per-sample tag to `count` entries, repeating the last value.
fn per_sample(values: Option<Vec<u16>>, count: usize, default: u16) -> Vec<u16> {
    let values = values.filter(|v| !v.is_empty()).unwrap_or_else(|| vec![default]);
    let last = values[values.len() - 1];
    (0..count)
        .map(|i| values.get(i).copied().unwrap_or(last))
        .collect()
}

fn invalid(tag: TiffTag, message: String) -> TiffError {
    TiffError::InvalidTagValue {
        tag: tag.name(),
        message,
    }
}
