//! Deflate / Adobe Deflate decompression (compression 8 and 32946).

use std::io::Read;

use flate2::read::ZlibDecoder;

use super::registry::Decoder;
use crate::error::DecodeError;
use crate::tiff::compression::DEFLATE;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateDecoder;

impl Decoder for DeflateDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = Vec::with_capacity(data.len() * 4);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DecodeError::new(DEFLATE, e.to_string()))?;
        Ok(decompressed)
    }
}
