//! Typed tag values.
//!
//! Every directory entry is decoded eagerly into a [`TagValue`], a tagged
//! union over the TIFF field types. Accessors convert between numeric shapes
//! where the conversion is lossless enough for structural tags (counts,
//! offsets, sizes) and reject the rest.

use serde::Serialize;

use super::tags::FieldType;
use crate::io::ByteOrder;

/// Decoded value of one directory entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    /// BYTE and UNDEFINED
    Bytes(Vec<u8>),
    /// ASCII with the trailing NUL removed
    Ascii(String),
    Shorts(Vec<u16>),
    /// LONG and IFD
    Longs(Vec<u32>),
    /// LONG8 and IFD8
    Long8s(Vec<u64>),
    SBytes(Vec<i8>),
    SShorts(Vec<i16>),
    SLongs(Vec<i32>),
    SLong8s(Vec<i64>),
    Rationals(Vec<(u32, u32)>),
    SRationals(Vec<(i32, i32)>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
}

impl TagValue {
    /// Decode `count` values of `field_type` from raw entry bytes.
    ///
    /// `data` must hold at least `count * size_in_bytes` bytes; the parser
    /// guarantees this before calling.
    pub fn decode(field_type: FieldType, count: usize, data: &[u8], order: ByteOrder) -> Self {
        let size = field_type.size_in_bytes();
        let chunks = data.chunks_exact(size).take(count);
        match field_type {
            FieldType::Byte | FieldType::Undefined => TagValue::Bytes(data[..count].to_vec()),
            FieldType::Ascii => {
                let raw = &data[..count];
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                TagValue::Ascii(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            FieldType::Short => TagValue::Shorts(chunks.map(|c| order.read_u16(c)).collect()),
            FieldType::Long | FieldType::Ifd => {
                TagValue::Longs(chunks.map(|c| order.read_u32(c)).collect())
            }
            FieldType::Long8 | FieldType::Ifd8 => {
                TagValue::Long8s(chunks.map(|c| order.read_u64(c)).collect())
            }
            FieldType::SByte => TagValue::SBytes(data[..count].iter().map(|&b| b as i8).collect()),
            FieldType::SShort => TagValue::SShorts(chunks.map(|c| order.read_i16(c)).collect()),
            FieldType::SLong => TagValue::SLongs(chunks.map(|c| order.read_i32(c)).collect()),
            FieldType::SLong8 => TagValue::SLong8s(chunks.map(|c| order.read_i64(c)).collect()),
            FieldType::Rational => TagValue::Rationals(
                chunks
                    .map(|c| (order.read_u32(c), order.read_u32(&c[4..])))
                    .collect(),
            ),
            FieldType::SRational => TagValue::SRationals(
                chunks
                    .map(|c| (order.read_i32(c), order.read_i32(&c[4..])))
                    .collect(),
            ),
            FieldType::Float => TagValue::Floats(chunks.map(|c| order.read_f32(c)).collect()),
            FieldType::Double => TagValue::Doubles(chunks.map(|c| order.read_f64(c)).collect()),
        }
    }

    /// Number of values (characters for ASCII).
    pub fn len(&self) -> usize {
        match self {
            TagValue::Bytes(v) => v.len(),
            TagValue::Ascii(s) => s.len(),
            TagValue::Shorts(v) => v.len(),
            TagValue::Longs(v) => v.len(),
            TagValue::Long8s(v) => v.len(),
            TagValue::SBytes(v) => v.len(),
            TagValue::SShorts(v) => v.len(),
            TagValue::SLongs(v) => v.len(),
            TagValue::SLong8s(v) => v.len(),
            TagValue::Rationals(v) => v.len(),
            TagValue::SRationals(v) => v.len(),
            TagValue::Floats(v) => v.len(),
            TagValue::Doubles(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values as unsigned integers.
    ///
    /// Returns `None` for ASCII, floating point, rational and negative values.
    pub fn as_u64_vec(&self) -> Option<Vec<u64>> {
        fn unsigned<T: Copy + TryInto<u64>>(v: &[T]) -> Option<Vec<u64>> {
            v.iter().map(|&x| x.try_into().ok()).collect()
        }
        match self {
            TagValue::Bytes(v) => Some(v.iter().map(|&x| x as u64).collect()),
            TagValue::Shorts(v) => Some(v.iter().map(|&x| x as u64).collect()),
            TagValue::Longs(v) => Some(v.iter().map(|&x| x as u64).collect()),
            TagValue::Long8s(v) => Some(v.clone()),
            TagValue::SBytes(v) => unsigned(v),
            TagValue::SShorts(v) => unsigned(v),
            TagValue::SLongs(v) => unsigned(v),
            TagValue::SLong8s(v) => unsigned(v),
            _ => None,
        }
    }

    /// First value as an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TagValue::Bytes(v) => v.first().map(|&x| x as u64),
            TagValue::Shorts(v) => v.first().map(|&x| x as u64),
            TagValue::Longs(v) => v.first().map(|&x| x as u64),
            TagValue::Long8s(v) => v.first().copied(),
            _ => self.as_u64_vec()?.first().copied(),
        }
    }

    /// All values as `u16`, failing if any value does not fit.
    pub fn as_u16_vec(&self) -> Option<Vec<u16>> {
        match self {
            TagValue::Shorts(v) => Some(v.clone()),
            _ => self
                .as_u64_vec()?
                .into_iter()
                .map(|x| u16::try_from(x).ok())
                .collect(),
        }
    }

    /// All values as `f64`; rationals are divided out.
    ///
    /// Returns `None` only for ASCII.
    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        let ratio = |n: f64, d: f64| if d == 0.0 { f64::NAN } else { n / d };
        Some(match self {
            TagValue::Ascii(_) => return None,
            TagValue::Bytes(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::Shorts(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::Longs(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::Long8s(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::SBytes(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::SShorts(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::SLongs(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::SLong8s(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::Rationals(v) => v.iter().map(|&(n, d)| ratio(n as f64, d as f64)).collect(),
            TagValue::SRationals(v) => {
                v.iter().map(|&(n, d)| ratio(n as f64, d as f64)).collect()
            }
            TagValue::Floats(v) => v.iter().map(|&x| x as f64).collect(),
            TagValue::Doubles(v) => v.clone(),
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_f64_vec()?.first().copied()
    }

    /// ASCII content, or BYTE content interpreted as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s.as_str()),
            TagValue::Bytes(b) => {
                let end = b.iter().rposition(|&x| x != 0).map_or(0, |i| i + 1);
                std::str::from_utf8(&b[..end]).ok()
            }
            _ => None,
        }
    }

    /// Raw bytes of BYTE / UNDEFINED entries.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TagValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}
