use thiserror::Error;

/// I/O errors raised by byte-range sources.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unexpected HTTP status from a remote source
    #[error("HTTP {status} while reading {url}")]
    Http { status: u16, url: String },

    /// Object or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The source was closed by its owner
    #[error("Source is closed: {0}")]
    Closed(String),

    /// The fetch was cancelled through its abort signal
    #[error("Fetch aborted")]
    Aborted,
}

/// Errors raised while parsing TIFF structures.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// First IFD offset points outside the file
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Directory structure is inconsistent with the file
    #[error("Corrupt directory at offset {offset}: {reason}")]
    CorruptDirectory { offset: u64, reason: String },

    /// Entry uses a field type this reader does not know
    #[error("Unsupported field type {field_type} for tag {tag}")]
    UnsupportedFieldType { tag: u16, field_type: u16 },

    /// Cursor read past the fetched range
    #[error("Read of {len} bytes at offset {offset} is outside the fetched range of {available} bytes")]
    OutOfRange {
        offset: u64,
        len: u64,
        available: u64,
    },

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Sample layout cannot be represented
    #[error("Unsupported sample format {format} with {bits} bits per sample")]
    UnsupportedSampleFormat { format: u16, bits: u16 },
}

/// A codec failed to turn compressed bytes into raw samples.
#[derive(Debug, Clone, Error)]
#[error("Decode error (compression {compression}): {message}")]
pub struct DecodeError {
    pub compression: u16,
    pub message: String,
}

impl DecodeError {
    pub fn new(compression: u16, message: impl Into<String>) -> Self {
        Self {
            compression,
            message: message.into(),
        }
    }
}

/// Top-level error for container and raster operations.
#[derive(Debug, Clone, Error)]
pub enum GeoTiffError {
    /// Fetch from the byte-range source failed
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] IoError),

    /// TIFF structure error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// No decoder registered for the compression code
    #[error("Unsupported compression {compression} (image at offset {ifd_offset})")]
    UnsupportedCompression { compression: u16, ifd_offset: u64 },

    /// A tile or strip could not be fetched or decoded
    #[error("Tile {tile_index} failed: {cause}")]
    TileDecodeFailed {
        tile_index: u32,
        cause: Box<GeoTiffError>,
    },

    /// Decoder error outside of a tile read
    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// Read options are inconsistent
    #[error("Invalid read options: {0}")]
    InvalidReadOptions(String),

    /// Requested image index past the end of the IFD chain
    #[error("Image index {index} out of range ({count} images)")]
    ImageIndexOutOfRange { index: usize, count: usize },

    /// Georeferenced request on an image without an affine transformation
    #[error("The image does not have an affine transformation")]
    NoAffineTransformation,

    /// The operation was cancelled through its abort signal
    #[error("Operation aborted")]
    Aborted,
}

impl GeoTiffError {
    /// Whether this error (or the error it wraps) came from cancellation.
    pub fn is_aborted(&self) -> bool {
        match self {
            GeoTiffError::Aborted => true,
            GeoTiffError::SourceUnavailable(IoError::Aborted) => true,
            GeoTiffError::TileDecodeFailed { cause, .. } => cause.is_aborted(),
            _ => false,
        }
    }
}

pub type Result<T, E = GeoTiffError> = std::result::Result<T, E>;
