//! Conversion of decoded blocks into little-endian native-width samples.
//!
//! After this step every sample of `b` bits occupies 1, 2, 4 or 8 bytes in
//! little-endian order, so the assembler never needs to know the file byte
//! order or deal with packed bits. Packed rows start on a byte boundary.

use crate::error::DecodeError;
use crate::io::ByteOrder;
use crate::tiff::SAMPLE_FORMAT_INT;

/// Bytes used to store one normalized sample of `bits` bits.
pub fn native_width(bits: u16) -> usize {
    match bits {
        0..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

fn is_native(bits: u16) -> bool {
    matches!(bits, 8 | 16 | 32 | 64)
}

/// Normalize one block whose rows hold `width` pixels of `bits.len()` samples.
///
/// `bits` and `formats` describe the samples stored in the block (one entry
/// for planar blocks). `byte_order` is the order of multi-byte samples in
/// `data`; packed samples are always read most significant bit first.
pub fn normalize(
    data: Vec<u8>,
    bits: &[u16],
    formats: &[u16],
    width: usize,
    byte_order: ByteOrder,
    compression: u16,
) -> Result<Vec<u8>, DecodeError> {
    if bits.is_empty() {
        return Err(DecodeError::new(compression, "block without samples"));
    }
    if let Some(&b) = bits.iter().find(|&&b| b == 0 || b > 64) {
        return Err(DecodeError::new(
            compression,
            format!("unsupported bits per sample {}", b),
        ));
    }

    if bits.iter().all(|&b| is_native(b)) {
        return Ok(swap_to_little_endian(data, bits, byte_order));
    }
    Ok(unpack(&data, bits, formats, width, byte_order))
}

fn swap_to_little_endian(mut data: Vec<u8>, bits: &[u16], byte_order: ByteOrder) -> Vec<u8> {
    if byte_order == ByteOrder::LittleEndian || bits.iter().all(|&b| b == 8) {
        return data;
    }

    let pixel_bytes: usize = bits.iter().map(|&b| b as usize / 8).sum();
    let whole = data.len() - data.len() % pixel_bytes;
    for pixel in data[..whole].chunks_exact_mut(pixel_bytes) {
        let mut pos = 0;
        for &b in bits {
            let n = b as usize / 8;
            pixel[pos..pos + n].reverse();
            pos += n;
        }
    }
    data
}

fn unpack(
    data: &[u8],
    bits: &[u16],
    formats: &[u16],
    width: usize,
    byte_order: ByteOrder,
) -> Vec<u8> {
    let pixel_bits: usize = bits.iter().map(|&b| b as usize).sum();
    let row_bytes = (width * pixel_bits).div_ceil(8);
    if row_bytes == 0 {
        return Vec::new();
    }
    let rows = data.len() / row_bytes;
    let out_pixel: usize = bits.iter().map(|&b| native_width(b)).sum();
    let mut out = vec![0u8; rows * width * out_pixel];

    let mut dst = 0;
    for row in data.chunks_exact(row_bytes).take(rows) {
        let mut reader = BitReader::new(row);
        for _ in 0..width {
            for (i, &b) in bits.iter().enumerate() {
                let mut value = if b % 8 == 0 {
                    read_whole_bytes(&mut reader, b, byte_order)
                } else {
                    reader.read(b)
                };
                if formats.get(i).copied() == Some(SAMPLE_FORMAT_INT) {
                    value = sign_extend(value, b);
                }
                let n = native_width(b);
                out[dst..dst + n].copy_from_slice(&value.to_le_bytes()[..n]);
                dst += n;
            }
        }
    }
    out
}

fn read_whole_bytes(reader: &mut BitReader<'_>, bits: u16, byte_order: ByteOrder) -> u64 {
    let n = bits / 8;
    let mut value = 0u64;
    for i in 0..n {
        let byte = reader.read(8);
        value = match byte_order {
            ByteOrder::BigEndian => (value << 8) | byte,
            ByteOrder::LittleEndian => value | (byte << (8 * i)),
        };
    }
    value
}

fn sign_extend(value: u64, bits: u16) -> u64 {
    let shift = 64 - bits as u32;
    (((value << shift) as i64) >> shift) as u64
}

/// MSB-first bit reader over one row. Reads past the end yield zero bits.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read(&mut self, count: u16) -> u64 {
        let mut value = 0u64;
        for _ in 0..count {
            let byte = self.data.get(self.bit / 8).copied().unwrap_or(0);
            let bit = (byte >> (7 - (self.bit % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.bit += 1;
        }
        value
    }
}
