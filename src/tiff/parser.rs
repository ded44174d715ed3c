//! TIFF header and directory parsing.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```
//!
//! # Directory Structure
//! ```text
//! entry count       2 bytes (classic) / 8 bytes (BigTIFF)
//! entries           count * 12 bytes (classic) / count * 20 bytes (BigTIFF)
//!   tag             2 bytes
//!   field type      2 bytes
//!   value count     4 / 8 bytes
//!   value or offset 4 / 8 bytes
//! next IFD offset   4 / 8 bytes, 0 terminates the chain
//! ```

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use super::directory::ImageFileDirectory;
use super::geokeys::GeoKeyDirectory;
use super::tags::{FieldType, TiffTag};
use super::values::TagValue;
use crate::error::{GeoTiffError, TiffError};
use crate::io::{AbortSignal, ByteCursor, ByteOrder, RangeReader};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
///
/// Holds what every later read needs: byte order, the classic/BigTIFF flag
/// (entry sizes and offset widths), and the location of the first IFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Byte order marker is symmetric, so either reading works here.
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Fetch and parse the header of `reader`.
    pub async fn read(
        reader: &dyn RangeReader,
        signal: Option<&AbortSignal>,
    ) -> Result<Self, GeoTiffError> {
        let size = reader.size();
        let len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let bytes = reader.fetch(0, len, signal).await?;
        Ok(Self::parse(&bytes, size)?)
    }

    #[inline]
    pub const fn header_size(&self) -> usize {
        if self.is_bigtiff {
            BIGTIFF_HEADER_SIZE
        } else {
            TIFF_HEADER_SIZE
        }
    }

    /// Classic TIFF: 12 bytes (2 tag + 2 type + 4 count + 4 value/offset)
    /// BigTIFF: 20 bytes (2 tag + 2 type + 8 count + 8 value/offset)
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of offsets, the value/offset field and the next IFD pointer.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// Directory parsing
// =============================================================================

fn corrupt(offset: u64, reason: impl Into<String>) -> GeoTiffError {
    TiffError::CorruptDirectory {
        offset,
        reason: reason.into(),
    }
    .into()
}

/// Parse the directory at absolute `offset`.
///
/// Fetches the entry count, then the entry table together with the trailing
/// next-IFD pointer in one request, then every out-of-line value array.
/// Finally the GeoKey directory is resolved against the double and ASCII
/// parameter tags of the same directory.
pub async fn parse_directory_at(
    reader: &dyn RangeReader,
    header: &TiffHeader,
    offset: u64,
    signal: Option<&AbortSignal>,
) -> Result<ImageFileDirectory, GeoTiffError> {
    let file_size = reader.size();
    let count_size = header.ifd_count_size();
    let entry_size = header.ifd_entry_size();
    let offset_size = header.offset_size();

    if offset
        .checked_add(count_size as u64)
        .map_or(true, |end| end > file_size)
    {
        return Err(corrupt(offset, "directory header lies outside the file"));
    }

    let count_bytes = reader.fetch(offset, count_size, signal).await?;
    let count_cursor = ByteCursor::new(count_bytes, offset, header.byte_order);
    let entry_count = if header.is_bigtiff {
        count_cursor.read_u64(0)?
    } else {
        count_cursor.read_u16(0)? as u64
    };

    let table_offset = offset + count_size as u64;
    let table_len = entry_count
        .checked_mul(entry_size as u64)
        .and_then(|len| len.checked_add(offset_size as u64))
        .filter(|len| table_offset.checked_add(*len).is_some_and(|end| end <= file_size))
        .ok_or_else(|| {
            corrupt(
                offset,
                format!("{} entries exceed the file size of {}", entry_count, file_size),
            )
        })?;

    let table = ByteCursor::new(
        reader.fetch(table_offset, table_len as usize, signal).await?,
        table_offset,
        header.byte_order,
    );

    let mut entries = BTreeMap::new();
    for i in 0..entry_count as usize {
        let base = i * entry_size;
        let tag = table.read_u16(base)?;
        let type_code = table.read_u16(base + 2)?;
        let count = table.read_offset(base + 4, header.is_bigtiff)?;
        let value_field = base + 4 + offset_size;

        let field_type = FieldType::from_u16(type_code).ok_or(TiffError::UnsupportedFieldType {
            tag,
            field_type: type_code,
        })?;

        let byte_len = field_type
            .byte_len(count)
            .filter(|len| *len <= file_size)
            .ok_or_else(|| {
                corrupt(offset, format!("tag {} declares {} values", tag, count))
            })?;

        let value = if field_type.fits_inline(count, header.is_bigtiff) {
            let raw = table.slice(value_field, byte_len as usize)?;
            TagValue::decode(field_type, count as usize, &raw, header.byte_order)
        } else {
            let value_offset = table.read_offset(value_field, header.is_bigtiff)?;
            if value_offset
                .checked_add(byte_len)
                .map_or(true, |end| end > file_size)
            {
                return Err(corrupt(
                    offset,
                    format!(
                        "tag {} values at {}+{} exceed the file size",
                        tag, value_offset, byte_len
                    ),
                ));
            }
            trace!(tag, value_offset, byte_len, "fetching out-of-line tag value");
            let raw = reader.fetch(value_offset, byte_len as usize, signal).await?;
            TagValue::decode(field_type, count as usize, &raw, header.byte_order)
        };

        if entries.contains_key(&tag) {
            warn!(offset, tag, "duplicate tag in directory, keeping the first");
            continue;
        }
        entries.insert(tag, value);
    }

    let next_offset = table.read_offset(entry_count as usize * entry_size, header.is_bigtiff)?;
    let next_ifd_offset = (next_offset != 0).then_some(next_offset);

    let geo_keys = resolve_geo_keys(&entries)?;

    debug!(
        offset,
        entries = entries.len(),
        next = ?next_ifd_offset,
        geo_keys = geo_keys.as_ref().map_or(0, |g| g.len()),
        "parsed directory"
    );

    Ok(ImageFileDirectory::new(
        offset,
        entries,
        geo_keys,
        next_ifd_offset,
    ))
}

fn resolve_geo_keys(
    entries: &BTreeMap<u16, TagValue>,
) -> Result<Option<GeoKeyDirectory>, TiffError> {
    let Some(raw) = entries.get(&TiffTag::GeoKeyDirectory.as_u16()) else {
        return Ok(None);
    };
    let raw = raw.as_u16_vec().ok_or_else(|| TiffError::InvalidTagValue {
        tag: TiffTag::GeoKeyDirectory.name(),
        message: "expected SHORT values".to_string(),
    })?;
    let doubles = entries
        .get(&TiffTag::GeoDoubleParams.as_u16())
        .and_then(TagValue::as_f64_vec);
    let ascii = entries
        .get(&TiffTag::GeoAsciiParams.as_u16())
        .and_then(TagValue::as_str);

    GeoKeyDirectory::parse(&raw, doubles.as_deref(), ascii).map(Some)
}

// =============================================================================
// Tests
// =============================================================================
