//! Sample types and typed output buffers.
//!
//! Every band of a window is returned in the smallest numeric type that holds
//! its sample format and bit depth. Decoded blocks are already normalized to
//! little-endian native widths, so reading a stored sample is a plain
//! `from_le_bytes` whenever the stored and output types agree, and goes
//! through `f64` otherwise (half floats, mixed-type interleaving).

use serde::Serialize;

use crate::codec::native_width;
use crate::error::TiffError;
use crate::tiff::{SAMPLE_FORMAT_FLOAT, SAMPLE_FORMAT_INT, SAMPLE_FORMAT_UINT, SAMPLE_FORMAT_VOID};

// =============================================================================
// SampleType
// =============================================================================

/// Numeric type of an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    /// Minimal type for a TIFF sample format and bit depth.
    pub fn for_format(format: u16, bits: u16) -> Result<Self, TiffError> {
        let unsupported = TiffError::UnsupportedSampleFormat { format, bits };
        match format {
            SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_VOID => match bits {
                1..=8 => Ok(SampleType::U8),
                9..=16 => Ok(SampleType::U16),
                17..=32 => Ok(SampleType::U32),
                33..=64 => Ok(SampleType::U64),
                _ => Err(unsupported),
            },
            SAMPLE_FORMAT_INT => match bits {
                1..=8 => Ok(SampleType::I8),
                9..=16 => Ok(SampleType::I16),
                17..=32 => Ok(SampleType::I32),
                33..=64 => Ok(SampleType::I64),
                _ => Err(unsupported),
            },
            SAMPLE_FORMAT_FLOAT => match bits {
                16 | 32 => Ok(SampleType::F32),
                64 => Ok(SampleType::F64),
                _ => Err(unsupported),
            },
            _ => Err(unsupported),
        }
    }

    /// Size in bytes of one value.
    pub fn size(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            SampleType::I8 | SampleType::I16 | SampleType::I32 | SampleType::I64
        )
    }

    /// Common type for an interleaved buffer holding all of `types`.
    ///
    /// Floats win over integers, signed over unsigned, then the widest size.
    pub fn widest(types: &[SampleType]) -> Option<SampleType> {
        let first = *types.first()?;
        let size = types.iter().map(|t| t.size()).max().unwrap_or(first.size());
        let ty = if types.iter().any(|t| t.is_float()) {
            if size > 4 {
                SampleType::F64
            } else {
                SampleType::F32
            }
        } else if types.iter().any(|t| t.is_signed()) {
            match size {
                1 => SampleType::I8,
                2 => SampleType::I16,
                4 => SampleType::I32,
                _ => SampleType::I64,
            }
        } else {
            match size {
                1 => SampleType::U8,
                2 => SampleType::U16,
                4 => SampleType::U32,
                _ => SampleType::U64,
            }
        };
        Some(ty)
    }
}

// =============================================================================
// Stored samples
// =============================================================================

/// How one sample is stored in a normalized decoded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredSample {
    pub format: u16,
    pub bits: u16,
    pub sample_type: SampleType,
}

impl StoredSample {
    pub fn new(format: u16, bits: u16) -> Result<Self, TiffError> {
        Ok(Self {
            format,
            bits,
            sample_type: SampleType::for_format(format, bits)?,
        })
    }

    /// Bytes occupied in a normalized block.
    pub fn stored_size(&self) -> usize {
        native_width(self.bits)
    }

    /// Read the value at the start of `bytes` as `f64`.
    pub fn read_f64(&self, bytes: &[u8]) -> f64 {
        if self.format == SAMPLE_FORMAT_FLOAT && self.bits == 16 {
            return f16_to_f32(u16::read_le(bytes)) as f64;
        }
        match self.sample_type {
            SampleType::U8 => u8::read_le(bytes).to_f64(),
            SampleType::U16 => u16::read_le(bytes).to_f64(),
            SampleType::U32 => u32::read_le(bytes).to_f64(),
            SampleType::U64 => u64::read_le(bytes).to_f64(),
            SampleType::I8 => i8::read_le(bytes).to_f64(),
            SampleType::I16 => i16::read_le(bytes).to_f64(),
            SampleType::I32 => i32::read_le(bytes).to_f64(),
            SampleType::I64 => i64::read_le(bytes).to_f64(),
            SampleType::F32 => f32::read_le(bytes).to_f64(),
            SampleType::F64 => f64::read_le(bytes),
        }
    }

    /// Read the value at the start of `bytes` as `T`.
    #[inline]
    pub fn read<T: Sample>(&self, bytes: &[u8]) -> T {
        if self.sample_type == T::TYPE && self.stored_size() == T::TYPE.size() {
            T::read_le(bytes)
        } else {
            T::from_f64(self.read_f64(bytes))
        }
    }
}

/// IEEE 754 half precision to single precision.
pub fn f16_to_f32(half: u16) -> f32 {
    let sign = ((half >> 15) as u32) << 31;
    let exponent = ((half >> 10) & 0x1F) as u32;
    let fraction = (half & 0x3FF) as u32;

    match exponent {
        0 => {
            let magnitude = fraction as f32 * 2f32.powi(-24);
            if sign != 0 {
                -magnitude
            } else {
                magnitude
            }
        }
        0x1F => f32::from_bits(sign | 0x7F80_0000 | (fraction << 13)),
        _ => f32::from_bits(sign | ((exponent + 112) << 23) | (fraction << 13)),
    }
}

// =============================================================================
// Sample trait
// =============================================================================

/// A primitive that can be stored in a [`RasterBuffer`].
pub trait Sample: Copy + Default + PartialEq + Send + Sync + 'static {
    const TYPE: SampleType;

    /// Read from the first `TYPE.size()` bytes, little-endian.
    fn read_le(bytes: &[u8]) -> Self;

    /// Convert with saturating `as` semantics.
    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;

    fn into_buffer(values: Vec<Self>) -> RasterBuffer;
}

macro_rules! impl_sample {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl Sample for $ty {
                const TYPE: SampleType = SampleType::$variant;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(buf)
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn into_buffer(values: Vec<Self>) -> RasterBuffer {
                    RasterBuffer::$variant(values)
                }
            }
        )+
    };
}

impl_sample! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

// =============================================================================
// RasterBuffer
// =============================================================================

/// One typed output array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RasterBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner vector of a buffer.
macro_rules! with_buffer {
    ($buffer:expr, $v:ident => $body:expr) => {
        match $buffer {
            RasterBuffer::U8($v) => $body,
            RasterBuffer::U16($v) => $body,
            RasterBuffer::U32($v) => $body,
            RasterBuffer::U64($v) => $body,
            RasterBuffer::I8($v) => $body,
            RasterBuffer::I16($v) => $body,
            RasterBuffer::I32($v) => $body,
            RasterBuffer::I64($v) => $body,
            RasterBuffer::F32($v) => $body,
            RasterBuffer::F64($v) => $body,
        }
    };
}
pub(crate) use with_buffer;

macro_rules! typed_accessors {
    ($($name:ident => $variant:ident: $ty:ty),+ $(,)?) => {
        $(
            pub fn $name(&self) -> Option<&[$ty]> {
                match self {
                    RasterBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }
        )+
    };
}

impl RasterBuffer {
    /// A buffer of `len` values all set to `fill` (converted to the type).
    pub fn filled(sample_type: SampleType, len: usize, fill: f64) -> Self {
        fn make<T: Sample>(len: usize, fill: f64) -> RasterBuffer {
            T::into_buffer(vec![T::from_f64(fill); len])
        }
        match sample_type {
            SampleType::U8 => make::<u8>(len, fill),
            SampleType::U16 => make::<u16>(len, fill),
            SampleType::U32 => make::<u32>(len, fill),
            SampleType::U64 => make::<u64>(len, fill),
            SampleType::I8 => make::<i8>(len, fill),
            SampleType::I16 => make::<i16>(len, fill),
            SampleType::I32 => make::<i32>(len, fill),
            SampleType::I64 => make::<i64>(len, fill),
            SampleType::F32 => make::<f32>(len, fill),
            SampleType::F64 => make::<f64>(len, fill),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            RasterBuffer::U8(_) => SampleType::U8,
            RasterBuffer::U16(_) => SampleType::U16,
            RasterBuffer::U32(_) => SampleType::U32,
            RasterBuffer::U64(_) => SampleType::U64,
            RasterBuffer::I8(_) => SampleType::I8,
            RasterBuffer::I16(_) => SampleType::I16,
            RasterBuffer::I32(_) => SampleType::I32,
            RasterBuffer::I64(_) => SampleType::I64,
            RasterBuffer::F32(_) => SampleType::F32,
            RasterBuffer::F64(_) => SampleType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_buffer!(self, v => v.get(index).map(|x| x.to_f64()))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_buffer!(self, v => v.iter().map(|x| x.to_f64()).collect())
    }

    typed_accessors! {
        as_u8 => U8: u8,
        as_u16 => U16: u16,
        as_u32 => U32: u32,
        as_u64 => U64: u64,
        as_i8 => I8: i8,
        as_i16 => I16: i16,
        as_i32 => I32: i32,
        as_i64 => I64: i64,
        as_f32 => F32: f32,
        as_f64 => F64: f64,
    }
}
