//! PackBits decompression (compression 32773).
//!
//! Each run starts with a signed header byte:
//! - `0..=127`: copy the next `header + 1` literal bytes
//! - `-127..=-1`: repeat the next byte `1 - header` times
//! - `-128`: no operation

use super::registry::Decoder;
use crate::error::DecodeError;
use crate::tiff::compression::PACKBITS;

#[derive(Debug, Clone, Copy, Default)]
pub struct PackBitsDecoder;

impl Decoder for PackBitsDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        decompress(data)
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut pos = 0;

    while pos < data.len() {
        let header = data[pos] as i8;
        pos += 1;

        match header {
            -128 => continue,
            0..=127 => {
                let count = header as usize + 1;
                let literal = data.get(pos..pos + count).ok_or_else(|| {
                    DecodeError::new(PACKBITS, "literal run past end of input")
                })?;
                output.extend_from_slice(literal);
                pos += count;
            }
            -127..=-1 => {
                let byte = *data
                    .get(pos)
                    .ok_or_else(|| DecodeError::new(PACKBITS, "missing run byte"))?;
                pos += 1;
                let count = (1 - header as isize) as usize;
                output.resize(output.len() + count, byte);
            }
        }
    }

    Ok(output)
}
