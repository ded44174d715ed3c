//! GeoKey directory decoding.
//!
//! The GeoKeyDirectory tag holds a packed SHORT array: a four-value header
//! `(version, key_revision, minor_revision, key_count)` followed by
//! `key_count` records `(key_id, tiff_tag_location, count, value_offset)`.
//! A location of 0 stores the value inline in `value_offset`; otherwise the
//! record indexes into GeoDoubleParams, GeoAsciiParams or the directory
//! array itself.

use std::collections::BTreeMap;

use serde::Serialize;

use super::tags::TiffTag;
use crate::error::TiffError;

macro_rules! geo_keys {
    ($($name:ident = $value:literal,)+) => {
        /// GeoKey ids from the GeoTIFF 1.1 key registry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum GeoKey {
            $($name = $value,)+
        }

        impl GeoKey {
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(GeoKey::$name),)+
                    _ => None,
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(GeoKey::$name => stringify!($name),)+
                }
            }
        }
    };
}

geo_keys! {
    GTModelTypeGeoKey = 1024,
    GTRasterTypeGeoKey = 1025,
    GTCitationGeoKey = 1026,
    GeographicTypeGeoKey = 2048,
    GeogCitationGeoKey = 2049,
    GeogGeodeticDatumGeoKey = 2050,
    GeogPrimeMeridianGeoKey = 2051,
    GeogLinearUnitsGeoKey = 2052,
    GeogLinearUnitSizeGeoKey = 2053,
    GeogAngularUnitsGeoKey = 2054,
    GeogAngularUnitSizeGeoKey = 2055,
    GeogEllipsoidGeoKey = 2056,
    GeogSemiMajorAxisGeoKey = 2057,
    GeogSemiMinorAxisGeoKey = 2058,
    GeogInvFlatteningGeoKey = 2059,
    GeogAzimuthUnitsGeoKey = 2060,
    GeogPrimeMeridianLongGeoKey = 2061,
    GeogTOWGS84GeoKey = 2062,
    ProjectedCSTypeGeoKey = 3072,
    PCSCitationGeoKey = 3073,
    ProjectionGeoKey = 3074,
    ProjCoordTransGeoKey = 3075,
    ProjLinearUnitsGeoKey = 3076,
    ProjLinearUnitSizeGeoKey = 3077,
    ProjStdParallel1GeoKey = 3078,
    ProjStdParallel2GeoKey = 3079,
    ProjNatOriginLongGeoKey = 3080,
    ProjNatOriginLatGeoKey = 3081,
    ProjFalseEastingGeoKey = 3082,
    ProjFalseNorthingGeoKey = 3083,
    ProjFalseOriginLongGeoKey = 3084,
    ProjFalseOriginLatGeoKey = 3085,
    ProjFalseOriginEastingGeoKey = 3086,
    ProjFalseOriginNorthingGeoKey = 3087,
    ProjCenterLongGeoKey = 3088,
    ProjCenterLatGeoKey = 3089,
    ProjCenterEastingGeoKey = 3090,
    ProjCenterNorthingGeoKey = 3091,
    ProjScaleAtNatOriginGeoKey = 3092,
    ProjScaleAtCenterGeoKey = 3093,
    ProjAzimuthAngleGeoKey = 3094,
    ProjStraightVertPoleLongGeoKey = 3095,
    VerticalCSTypeGeoKey = 4096,
    VerticalCitationGeoKey = 4097,
    VerticalDatumGeoKey = 4098,
    VerticalUnitsGeoKey = 4099,
}

/// Resolved value of one GeoKey.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeoKeyValue {
    /// Inline SHORT value (location 0), or a single value from the directory array
    Short(u16),
    /// Several values taken from the directory array itself
    Shorts(Vec<u16>),
    Double(f64),
    Doubles(Vec<f64>),
    Ascii(String),
}

impl GeoKeyValue {
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            GeoKeyValue::Short(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GeoKeyValue::Short(v) => Some(*v as f64),
            GeoKeyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeoKeyValue::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

/// Decoded GeoKey directory of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoKeyDirectory {
    pub version: u16,
    pub key_revision: u16,
    pub minor_revision: u16,
    keys: BTreeMap<u16, GeoKeyValue>,
}

impl GeoKeyDirectory {
    /// Decode the packed directory.
    ///
    /// `doubles` and `ascii` are the GeoDoubleParams and GeoAsciiParams of
    /// the same image, when present.
    pub fn parse(
        raw: &[u16],
        doubles: Option<&[f64]>,
        ascii: Option<&str>,
    ) -> Result<Self, TiffError> {
        let invalid = |message: String| TiffError::InvalidTagValue {
            tag: TiffTag::GeoKeyDirectory.name(),
            message,
        };

        if raw.len() < 4 {
            return Err(invalid(format!("header needs 4 values, got {}", raw.len())));
        }
        let key_count = raw[3] as usize;
        if raw.len() < 4 + key_count * 4 {
            return Err(invalid(format!(
                "{} keys need {} values, got {}",
                key_count,
                4 + key_count * 4,
                raw.len()
            )));
        }

        let mut keys = BTreeMap::new();
        for record in raw[4..4 + key_count * 4].chunks_exact(4) {
            let (key_id, location, count, value_offset) =
                (record[0], record[1], record[2] as usize, record[3] as usize);

            let value = match location {
                0 => GeoKeyValue::Short(record[3]),
                loc if loc == TiffTag::GeoDoubleParams.as_u16() => {
                    let params = doubles.ok_or_else(|| {
                        invalid(format!("key {} references missing GeoDoubleParams", key_id))
                    })?;
                    let values = params.get(value_offset..value_offset + count).ok_or_else(|| {
                        invalid(format!("key {} indexes past GeoDoubleParams", key_id))
                    })?;
                    match values {
                        [single] => GeoKeyValue::Double(*single),
                        _ => GeoKeyValue::Doubles(values.to_vec()),
                    }
                }
                loc if loc == TiffTag::GeoAsciiParams.as_u16() => {
                    let params = ascii.ok_or_else(|| {
                        invalid(format!("key {} references missing GeoAsciiParams", key_id))
                    })?;
                    // The count includes the trailing '|' separator.
                    let end = value_offset + count.saturating_sub(1);
                    let text = params.as_bytes().get(value_offset..end).ok_or_else(|| {
                        invalid(format!("key {} indexes past GeoAsciiParams", key_id))
                    })?;
                    GeoKeyValue::Ascii(String::from_utf8_lossy(text).into_owned())
                }
                loc if loc == TiffTag::GeoKeyDirectory.as_u16() => {
                    let values = raw.get(value_offset..value_offset + count).ok_or_else(|| {
                        invalid(format!("key {} indexes past GeoKeyDirectory", key_id))
                    })?;
                    match values {
                        [single] => GeoKeyValue::Short(*single),
                        _ => GeoKeyValue::Shorts(values.to_vec()),
                    }
                }
                other => {
                    return Err(invalid(format!(
                        "key {} stored in unsupported tag {}",
                        key_id, other
                    )))
                }
            };

            keys.insert(key_id, value);
        }

        Ok(Self {
            version: raw[0],
            key_revision: raw[1],
            minor_revision: raw[2],
            keys,
        })
    }

    pub fn get(&self, key: GeoKey) -> Option<&GeoKeyValue> {
        self.keys.get(&(key as u16))
    }

    pub fn get_raw(&self, key_id: u16) -> Option<&GeoKeyValue> {
        self.keys.get(&key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &GeoKeyValue)> {
        self.keys.iter().map(|(k, v)| (*k, v))
    }

    /// EPSG code of the projected or geographic CRS, if declared.
    pub fn epsg_code(&self) -> Option<u16> {
        [GeoKey::ProjectedCSTypeGeoKey, GeoKey::GeographicTypeGeoKey]
            .into_iter()
            .filter_map(|key| self.get(key)?.as_u16())
            // 32767 is "user-defined"
            .find(|&code| code != 0 && code != 32767)
    }
}
