//! JPEG decompression (compression 7, and old-style 6 on a best-effort basis).
//!
//! # Abbreviated JPEG Streams
//!
//! Tiled TIFFs usually store each tile as an abbreviated stream lacking the
//! quantization (DQT) and Huffman (DHT) tables. The tables live once in the
//! `JPEGTables` tag and are merged with each tile before decoding:
//!
//! 1. JPEGTables starts with SOI (FFD8) and ends with EOI (FFD9)
//! 2. Tile data also starts with SOI and ends with EOI
//! 3. Strip EOI from the tables, strip SOI from the tile, concatenate
//!
//! Decoded pixels are 8-bit; YCbCr and CMYK streams come out as RGB.

use std::sync::Arc;

use bytes::Bytes;
use image::ImageFormat;

use super::registry::{Decoder, DecoderParams};
use crate::error::DecodeError;

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// Factory registered under the JPEG compression codes.
pub fn factory(params: &DecoderParams) -> Result<Arc<dyn Decoder>, DecodeError> {
    Ok(Arc::new(JpegDecoder {
        compression: params.compression,
        tables: params.jpeg_tables.clone(),
    }))
}

pub struct JpegDecoder {
    compression: u16,
    tables: Option<Bytes>,
}

impl Decoder for JpegDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let stream = prepare_tile_jpeg(self.tables.as_deref(), data);
        let image = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
            .map_err(|e| DecodeError::new(self.compression, e.to_string()))?;
        Ok(image.into_bytes())
    }
}

/// Whether the stream starts with SOI and reaches SOS before any DQT/DHT.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Skip marker segment (marker + 2-byte length + payload)
        if pos + 3 < data.len() && marker[1] != 0x00 && marker[1] != 0xD8 && marker[1] != 0xD9 {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// Merge JPEGTables with abbreviated tile data: SOI + tables + scan data + EOI.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Vec<u8> {
    if tables.is_empty() {
        return tile_data.to_vec();
    }
    if tile_data.is_empty() {
        return Vec::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = Vec::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged
}

/// Tile bytes ready for a standard JPEG decoder, merged with the tables when needed.
pub fn prepare_tile_jpeg<'a>(tables: Option<&[u8]>, tile_data: &'a [u8]) -> std::borrow::Cow<'a, [u8]> {
    match tables {
        Some(tables) if is_abbreviated_stream(tile_data) => {
            std::borrow::Cow::Owned(merge_jpeg_tables(tables, tile_data))
        }
        _ => std::borrow::Cow::Borrowed(tile_data),
    }
}
