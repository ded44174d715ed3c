//! TIFF tag and field type definitions.
//!
//! This module defines the vocabulary for directory parsing:
//! - Field types that determine how entry values are encoded
//! - Tag ids for the baseline, extension, GeoTIFF and GDAL tags
//!
//! The definitions support both classic TIFF and BigTIFF formats.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// Each field type has a fixed element size, which decides whether a value
/// fits inline in the entry and how arrays are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,
    /// 8-bit ASCII character, NUL terminated
    Ascii = 2,
    /// Unsigned 16-bit integer
    Short = 3,
    /// Unsigned 32-bit integer
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    /// Signed 8-bit integer
    SByte = 6,
    /// Opaque byte
    Undefined = 7,
    /// Signed 16-bit integer
    SShort = 8,
    /// Signed 32-bit integer
    SLong = 9,
    /// Two SLONGs: numerator, denominator
    SRational = 10,
    /// IEEE single precision float
    Float = 11,
    /// IEEE double precision float
    Double = 12,
    /// 32-bit offset to a sub-IFD
    Ifd = 13,
    /// Unsigned 64-bit integer (BigTIFF)
    Long8 = 16,
    /// Signed 64-bit integer (BigTIFF)
    SLong8 = 17,
    /// 64-bit offset to a sub-IFD (BigTIFF)
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    ///
    /// Returns `None` for unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            13 => Some(FieldType::Ifd),
            16 => Some(FieldType::Long8),
            17 => Some(FieldType::SLong8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Maximum bytes stored inline in a classic TIFF entry.
    pub const INLINE_THRESHOLD_TIFF: usize = 4;

    /// Maximum bytes stored inline in a BigTIFF entry.
    pub const INLINE_THRESHOLD_BIGTIFF: usize = 8;

    /// Total byte length of `count` values, or `None` on overflow.
    #[inline]
    pub fn byte_len(self, count: u64) -> Option<u64> {
        count.checked_mul(self.size_in_bytes() as u64)
    }

    /// Check if `count` values of this type fit in the entry's value field.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff {
            Self::INLINE_THRESHOLD_BIGTIFF as u64
        } else {
            Self::INLINE_THRESHOLD_TIFF as u64
        };
        self.byte_len(count).is_some_and(|len| len <= threshold)
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

macro_rules! tiff_tags {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)+) => {
        /// Tag ids this reader understands by name.
        ///
        /// Tags not listed here are still parsed and stay reachable through
        /// their numeric id.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum TiffTag {
            $($(#[$doc])* $name = $value,)+
        }

        impl TiffTag {
            /// Create a TiffTag from its numeric value.
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(TiffTag::$name),)+
                    _ => None,
                }
            }

            /// Tag name as used in error messages and reports.
            pub const fn name(self) -> &'static str {
                match self {
                    $(TiffTag::$name => stringify!($name),)+
                }
            }
        }
    };
}

tiff_tags! {
    // Subfile and basic structure
    NewSubfileType = 254,
    SubfileType = 255,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    FillOrder = 266,
    DocumentName = 269,
    ImageDescription = 270,
    Make = 271,
    Model = 272,
    /// Byte offsets of strips
    StripOffsets = 273,
    Orientation = 274,
    SamplesPerPixel = 277,
    /// Row count per strip
    RowsPerStrip = 278,
    /// Byte counts of strips
    StripByteCounts = 279,
    MinSampleValue = 280,
    MaxSampleValue = 281,
    XResolution = 282,
    YResolution = 283,
    /// Chunky (1) or planar (2)
    PlanarConfiguration = 284,
    ResolutionUnit = 296,
    Software = 305,
    DateTime = 306,
    Artist = 315,
    /// 1 none, 2 horizontal differencing, 3 floating point
    Predictor = 317,
    ColorMap = 320,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    ExtraSamples = 338,
    /// 1 unsigned, 2 signed, 3 float
    SampleFormat = 339,
    SMinSampleValue = 340,
    SMaxSampleValue = 341,
    /// JPEG quantization and Huffman tables for abbreviated tile streams
    JpegTables = 347,
    YCbCrSubSampling = 530,
    ReferenceBlackWhite = 532,
    Copyright = 33432,
    // GeoTIFF
    ModelPixelScale = 33550,
    ModelTiepoint = 33922,
    ModelTransformation = 34264,
    GeoKeyDirectory = 34735,
    GeoDoubleParams = 34736,
    GeoAsciiParams = 34737,
    // GDAL
    GdalMetadata = 42112,
    GdalNodata = 42113,
}

impl TiffTag {
    /// Get the numeric tag id.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Enumerated tag values
// =============================================================================

/// Well-known compression codes. The decoder registry is keyed by raw `u16`,
/// so codes outside this list can still be registered.
pub mod compression {
    pub const NONE: u16 = 1;
    pub const CCITT_RLE: u16 = 2;
    pub const LZW: u16 = 5;
    pub const OLD_JPEG: u16 = 6;
    pub const JPEG: u16 = 7;
    pub const DEFLATE: u16 = 8;
    pub const PACKBITS: u16 = 32773;
    pub const ADOBE_DEFLATE: u16 = 32946;
    pub const JPEG2000: u16 = 34712;
    pub const LERC: u16 = 34887;
    pub const ZSTD: u16 = 50000;
    pub const WEBP: u16 = 50001;

    /// Human-readable name for a compression code.
    pub fn name(code: u16) -> &'static str {
        match code {
            NONE => "None",
            CCITT_RLE => "CCITT RLE",
            LZW => "LZW",
            OLD_JPEG => "Old JPEG",
            JPEG => "JPEG",
            DEFLATE => "Deflate",
            PACKBITS => "PackBits",
            ADOBE_DEFLATE => "Adobe Deflate",
            JPEG2000 => "JPEG 2000",
            LERC => "LERC",
            ZSTD => "Zstandard",
            WEBP => "WebP",
            _ => "Unknown",
        }
    }
}

pub const PLANAR_CHUNKY: u16 = 1;
pub const PLANAR_SEPARATE: u16 = 2;

pub const PREDICTOR_NONE: u16 = 1;
pub const PREDICTOR_HORIZONTAL: u16 = 2;
pub const PREDICTOR_FLOATING_POINT: u16 = 3;

pub const SAMPLE_FORMAT_UINT: u16 = 1;
pub const SAMPLE_FORMAT_INT: u16 = 2;
pub const SAMPLE_FORMAT_FLOAT: u16 = 3;
pub const SAMPLE_FORMAT_VOID: u16 = 4;

// =============================================================================
// Tests
// =============================================================================
