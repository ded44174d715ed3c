//! # GeoTIFF Stream
//!
//! A lazy GeoTIFF / Cloud Optimized GeoTIFF reader driven by byte-range
//! requests.
//!
//! Only the bytes a request needs are fetched: the header, the directories on
//! the way to the requested image, and the tiles or strips intersecting the
//! requested window. Sources can be local files, HTTP(S) servers, S3 buckets
//! or memory buffers.
//!
//! ## Features
//!
//! - **Classic TIFF and BigTIFF**: both byte orders, tiled and stripped
//!   layouts, chunky and planar configurations
//! - **GeoTIFF**: GeoKey directory, tie points, pixel scale and
//!   transformation matrices, GDAL nodata and metadata, ghost area
//! - **Pluggable decoders**: none, LZW, Deflate, PackBits and JPEG built in;
//!   any compression code can be registered
//! - **Decode pool**: inline decoding or a bounded set of blocking workers
//! - **Coalescing caches**: concurrent requests for the same directory or
//!   tile share one fetch and one decode
//! - **Overviews**: external overview files and best-resolution selection
//!
//! ## Architecture
//!
//! - [`io`] - Range readers, block cache and cancellation
//! - [`tiff`] - Header, directory and GeoKey parsing
//! - [`codec`] - Decoder registry, predictors and the decode pool
//! - [`raster`] - Block geometry, sample types, window assembly, resampling
//! - [`mod@geotiff`] - Containers, images and their caches
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use geotiff_stream::{GeoTiff, GeoTiffSource, OpenOptions, ReadRasterOptions, Window};
//!
//! # async fn run() -> geotiff_stream::Result<()> {
//! let tiff = GeoTiff::open("https://example.com/dem.tif", OpenOptions::default()).await?;
//! let image = tiff.get_image(0).await?;
//! println!("{} x {}", image.width(), image.height());
//!
//! let rasters = image
//!     .read_rasters(&ReadRasterOptions::new().window(Window::new(0, 0, 256, 256)))
//!     .await?;
//!
//! // Or let the container pick the overview matching a target size
//! let preview = tiff
//!     .read_rasters(&ReadRasterOptions::new().size(512, 512))
//!     .await?;
//! # let _ = (rasters, preview);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod geotiff;
pub mod io;
pub mod raster;
pub mod tiff;

// Re-export commonly used types
pub use codec::{DecodePool, Decoder, DecoderFactory, DecoderParams, DecoderRegistry};
pub use error::{DecodeError, GeoTiffError, IoError, Result, TiffError};
pub use geotiff::{
    select_best_image, GeoTiff, GeoTiffImage, GeoTiffSource, MultiGeoTiff, OpenOptions, TiePoint,
};
pub use io::{
    AbortController, AbortSignal, BlockCache, ByteOrder, FileRangeReader, HttpRangeReader,
    MemoryReader, RangeReader, S3RangeReader,
};
pub use raster::{
    RasterBuffer, RasterData, Rasters, ReadRasterOptions, ResampleMethod, SampleType, Window,
};
pub use tiff::{
    compression, GeoKey, GeoKeyDirectory, GeoKeyValue, GhostValue, GhostValues,
    ImageFileDirectory, TagValue, TiffHeader, TiffTag,
};
