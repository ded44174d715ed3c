//! Reversal of TIFF predictors on decoded blocks.
//!
//! Predictor 2 (horizontal differencing) stores each sample as the difference
//! to the same sample of the previous pixel in the row. Predictor 3 (floating
//! point) additionally splits every row into byte planes, most significant
//! plane first, and differences the bytes.

use crate::error::DecodeError;
use crate::io::ByteOrder;
use crate::tiff::{PREDICTOR_FLOATING_POINT, PREDICTOR_HORIZONTAL, PREDICTOR_NONE};

/// Shape of one decoded block as the predictor sees it.
#[derive(Debug, Clone, Copy)]
pub struct RowLayout {
    /// Pixels per row
    pub width: usize,
    /// Samples per pixel stored in the block
    pub samples: usize,
    /// Bits per sample; predictors need a uniform width
    pub bits: u16,
    pub byte_order: ByteOrder,
}

impl RowLayout {
    fn row_bytes(&self) -> usize {
        (self.width * self.samples * self.bits as usize).div_ceil(8)
    }
}

/// Undo `predictor` in place.
///
/// Rows are processed up to the last complete row, so short final strips work.
/// Returns `true` when the output is little-endian regardless of `byte_order`
/// (floating point predictor).
pub fn revert(
    predictor: u16,
    data: &mut [u8],
    layout: RowLayout,
    compression: u16,
) -> Result<bool, DecodeError> {
    let row_bytes = layout.row_bytes();
    if row_bytes == 0 {
        return Ok(false);
    }

    match predictor {
        PREDICTOR_NONE => Ok(false),
        PREDICTOR_HORIZONTAL => {
            for row in data.chunks_exact_mut(row_bytes) {
                horizontal_row(row, layout, compression)?;
            }
            Ok(false)
        }
        PREDICTOR_FLOATING_POINT => {
            let bytes_per_sample = match layout.bits {
                16 | 32 | 64 => layout.bits as usize / 8,
                bits => {
                    return Err(DecodeError::new(
                        compression,
                        format!("floating point predictor with {} bits per sample", bits),
                    ))
                }
            };
            let mut copy = vec![0u8; row_bytes];
            for row in data.chunks_exact_mut(row_bytes) {
                floating_point_row(row, layout.samples, bytes_per_sample, &mut copy);
            }
            Ok(true)
        }
        other => Err(DecodeError::new(
            compression,
            format!("unsupported predictor {}", other),
        )),
    }
}

macro_rules! accumulate {
    ($row:expr, $stride:expr, $n:expr, $read:ident, $write:ident, $order:expr) => {{
        let count = $row.len() / $n;
        for i in $stride..count {
            let prev = $order.$read(&$row[(i - $stride) * $n..]);
            let cur = $order.$read(&$row[i * $n..]);
            $order.$write(cur.wrapping_add(prev), &mut $row[i * $n..]);
        }
    }};
}

fn horizontal_row(row: &mut [u8], layout: RowLayout, compression: u16) -> Result<(), DecodeError> {
    let stride = layout.samples;
    let order = layout.byte_order;
    match layout.bits {
        8 => {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
        }
        16 => accumulate!(row, stride, 2, read_u16, write_u16, order),
        32 => accumulate!(row, stride, 4, read_u32, write_u32, order),
        64 => accumulate!(row, stride, 8, read_u64, write_u64, order),
        bits => {
            return Err(DecodeError::new(
                compression,
                format!("horizontal predictor with {} bits per sample", bits),
            ))
        }
    }
    Ok(())
}

fn floating_point_row(row: &mut [u8], stride: usize, bytes_per_sample: usize, copy: &mut [u8]) {
    for i in stride..row.len() {
        row[i] = row[i].wrapping_add(row[i - stride]);
    }

    let count = row.len() / bytes_per_sample;
    copy[..row.len()].copy_from_slice(row);
    for i in 0..count {
        for b in 0..bytes_per_sample {
            row[bytes_per_sample * i + b] = copy[(bytes_per_sample - b - 1) * count + i];
        }
    }
}
