//! Endian-aware, bounds-checked reads over a fetched byte range.
//!
//! TIFF files can be either little-endian or big-endian, determined by the
//! magic bytes at the start of the file. A [`ByteCursor`] remembers where its
//! bytes came from in the file so that errors can name absolute offsets, but
//! all reads take offsets relative to the start of the fetched range.

use bytes::Bytes;

use crate::error::TiffError;

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

macro_rules! order_reader {
    ($name:ident, $ty:ty, $n:expr) => {
        /// Decode a value from the first bytes of `bytes` using this byte order.
        ///
        /// # Panics
        /// Panics if `bytes` is shorter than the value.
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $ty {
            let mut raw = [0u8; $n];
            raw.copy_from_slice(&bytes[..$n]);
            match self {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
            }
        }
    };
}

macro_rules! order_writer {
    ($name:ident, $ty:ty) => {
        /// Encode a value into `out` using this byte order.
        #[inline]
        pub fn $name(self, value: $ty, out: &mut [u8]) {
            let raw = match self {
                ByteOrder::LittleEndian => value.to_le_bytes(),
                ByteOrder::BigEndian => value.to_be_bytes(),
            };
            out[..raw.len()].copy_from_slice(&raw);
        }
    };
}

impl ByteOrder {
    order_reader!(read_u16, u16, 2);
    order_reader!(read_u32, u32, 4);
    order_reader!(read_u64, u64, 8);
    order_reader!(read_i16, i16, 2);
    order_reader!(read_i32, i32, 4);
    order_reader!(read_i64, i64, 8);
    order_reader!(read_f32, f32, 4);
    order_reader!(read_f64, f64, 8);

    order_writer!(write_u16, u16);
    order_writer!(write_u32, u32);
    order_writer!(write_u64, u64);
}

/// A bounds-checked view over one fetched range.
#[derive(Debug, Clone)]
pub struct ByteCursor {
    data: Bytes,
    base: u64,
    order: ByteOrder,
}

impl ByteCursor {
    /// Wrap `data`, which was fetched from absolute file offset `base`.
    pub fn new(data: Bytes, base: u64, order: ByteOrder) -> Self {
        Self { data, base, order }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Absolute file offset of the first byte in this range.
    #[inline]
    pub fn base_offset(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn window(&self, offset: usize, len: usize) -> Result<&[u8], TiffError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(TiffError::OutOfRange {
                offset: self.base + offset as u64,
                len: len as u64,
                available: self.data.len() as u64,
            }),
        }
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, TiffError> {
        Ok(self.window(offset, 1)?[0])
    }

    pub fn read_i8(&self, offset: usize) -> Result<i8, TiffError> {
        Ok(self.window(offset, 1)?[0] as i8)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, TiffError> {
        Ok(self.order.read_u16(self.window(offset, 2)?))
    }

    pub fn read_i16(&self, offset: usize) -> Result<i16, TiffError> {
        Ok(self.order.read_i16(self.window(offset, 2)?))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, TiffError> {
        Ok(self.order.read_u32(self.window(offset, 4)?))
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, TiffError> {
        Ok(self.order.read_i32(self.window(offset, 4)?))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64, TiffError> {
        Ok(self.order.read_u64(self.window(offset, 8)?))
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64, TiffError> {
        Ok(self.order.read_i64(self.window(offset, 8)?))
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32, TiffError> {
        Ok(self.order.read_f32(self.window(offset, 4)?))
    }

    pub fn read_f64(&self, offset: usize) -> Result<f64, TiffError> {
        Ok(self.order.read_f64(self.window(offset, 8)?))
    }

    /// Read an offset-sized unsigned value: 4 bytes for classic TIFF, 8 for BigTIFF.
    pub fn read_offset(&self, offset: usize, bigtiff: bool) -> Result<u64, TiffError> {
        if bigtiff {
            self.read_u64(offset)
        } else {
            self.read_u32(offset).map(u64::from)
        }
    }

    /// Zero-copy sub-slice of the fetched range.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Bytes, TiffError> {
        self.window(offset, len)?;
        Ok(self.data.slice(offset..offset + len))
    }
}
