use std::collections::BTreeMap;

use super::geokeys::GeoKeyDirectory;
use super::tags::TiffTag;
use super::values::TagValue;
use crate::error::TiffError;

/// One parsed Image File Directory.
///
/// Immutable once built. Tag values are keyed by numeric id so private tags
/// survive parsing; [`TiffTag`] gives named access to the known ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFileDirectory {
    offset: u64,
    entries: BTreeMap<u16, TagValue>,
    geo_keys: Option<GeoKeyDirectory>,
    next_ifd_offset: Option<u64>,
}

impl ImageFileDirectory {
    pub fn new(
        offset: u64,
        entries: BTreeMap<u16, TagValue>,
        geo_keys: Option<GeoKeyDirectory>,
        next_ifd_offset: Option<u64>,
    ) -> Self {
        Self {
            offset,
            entries,
            geo_keys,
            next_ifd_offset,
        }
    }

    /// Absolute file offset this directory was parsed from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset of the following directory, `None` at the end of the chain.
    pub fn next_ifd_offset(&self) -> Option<u64> {
        self.next_ifd_offset
    }

    pub fn geo_keys(&self) -> Option<&GeoKeyDirectory> {
        self.geo_keys.as_ref()
    }

    pub fn get(&self, tag: TiffTag) -> Option<&TagValue> {
        self.entries.get(&tag.as_u16())
    }

    pub fn get_raw(&self, tag_id: u16) -> Option<&TagValue> {
        self.entries.get(&tag_id)
    }

    pub fn contains(&self, tag: TiffTag) -> bool {
        self.entries.contains_key(&tag.as_u16())
    }

    /// All entries in ascending tag order.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &TagValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // -------------------------------------------------------------------------
    // Typed accessors
    // -------------------------------------------------------------------------

    /// First value of an integer tag, `None` if the tag is absent.
    pub fn u64_value(&self, tag: TiffTag) -> Result<Option<u64>, TiffError> {
        match self.get(tag) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(tag, "expected an unsigned integer")),
        }
    }

    /// First value of a required integer tag.
    pub fn required_u64(&self, tag: TiffTag) -> Result<u64, TiffError> {
        self.u64_value(tag)?.ok_or(TiffError::MissingTag(tag.name()))
    }

    /// Integer tag narrowed to `u16`, with a default when absent.
    pub fn u16_or(&self, tag: TiffTag, default: u16) -> Result<u16, TiffError> {
        match self.u64_value(tag)? {
            None => Ok(default),
            Some(v) => u16::try_from(v).map_err(|_| invalid(tag, "value exceeds 16 bits")),
        }
    }

    pub fn u64_array(&self, tag: TiffTag) -> Result<Option<Vec<u64>>, TiffError> {
        match self.get(tag) {
            None => Ok(None),
            Some(value) => value
                .as_u64_vec()
                .map(Some)
                .ok_or_else(|| invalid(tag, "expected unsigned integers")),
        }
    }

    pub fn u16_array(&self, tag: TiffTag) -> Result<Option<Vec<u16>>, TiffError> {
        match self.get(tag) {
            None => Ok(None),
            Some(value) => value
                .as_u16_vec()
                .map(Some)
                .ok_or_else(|| invalid(tag, "expected 16-bit unsigned integers")),
        }
    }

    pub fn f64_array(&self, tag: TiffTag) -> Option<Vec<f64>> {
        self.get(tag)?.as_f64_vec()
    }

    pub fn ascii(&self, tag: TiffTag) -> Option<&str> {
        self.get(tag)?.as_str()
    }
}

fn invalid(tag: TiffTag, message: &str) -> TiffError {
    TiffError::InvalidTagValue {
        tag: tag.name(),
        message: message.to_string(),
    }
}
