//! TIFF LZW decompression (compression 5).
//!
//! Codes are packed MSB-first and the code width switches one code early, as
//! TIFF 6.0 writers do. A stream that ends without an end-of-information code
//! yields whatever was decoded up to that point.

use weezl::{decode::Decoder as WeezlDecoder, BitOrder};

use super::registry::Decoder;
use crate::error::DecodeError;
use crate::tiff::compression::LZW;

#[derive(Debug, Clone, Copy, Default)]
pub struct LzwDecoder;

impl Decoder for LzwDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        decompress(data)
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = WeezlDecoder::with_tiff_size_switch(BitOrder::Msb, 8);
    let mut output = Vec::with_capacity(data.len() * 3);
    decoder
        .into_vec(&mut output)
        .decode(data)
        .status
        .map_err(|e| DecodeError::new(LZW, format!("LZW decode failure: {}", e)))?;
    Ok(output)
}
