//! Command-line configuration for the `geotiff-stream` binary.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `GEOTIFF_` prefix for source settings
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! - `GEOTIFF_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `GEOTIFF_S3_REGION` - AWS region (default: us-east-1)
//! - `GEOTIFF_BLOCK_SIZE` - Block size of the source block cache (default: 64KB)
//! - `GEOTIFF_CACHE_BLOCKS` - Blocks kept by the block cache (default: 256)
//! - `GEOTIFF_NO_TILE_CACHE` - Disable the decoded tile cache
//! - `GEOTIFF_WORKERS` - Decode workers for `read` (0 = one per CPU)

use clap::{Args, Parser, Subcommand};

use crate::codec::DecodePool;
use crate::geotiff::{OpenOptions, DEFAULT_S3_REGION};
use crate::io::{DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::raster::{ReadRasterOptions, ResampleMethod, Window};

// =============================================================================
// CLI Arguments
// =============================================================================

/// GeoTIFF Stream - inspect and read GeoTIFF/COG files through range requests.
///
/// Sources can be local paths, `file://`, `http(s)://` or `s3://bucket/key`.
#[derive(Parser, Debug, Clone)]
#[command(name = "geotiff-stream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print image structure and georeferencing as JSON.
    Info(InfoConfig),

    /// Read a window and print per-band statistics as JSON.
    Read(ReadConfig),
}

// =============================================================================
// Source Configuration
// =============================================================================

/// Settings shared by every command that opens a source.
#[derive(Args, Debug, Clone)]
pub struct SourceConfig {
    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "GEOTIFF_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_S3_REGION, env = "GEOTIFF_S3_REGION")]
    pub s3_region: String,

    /// Block size in bytes for the source block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "GEOTIFF_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks kept by the source block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CAPACITY, env = "GEOTIFF_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Do not keep decoded tiles between reads.
    #[arg(long, default_value_t = false, env = "GEOTIFF_NO_TILE_CACHE")]
    pub no_tile_cache: bool,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.s3_region.is_empty() {
            return Err("s3_region must not be empty".to_string());
        }
        Ok(())
    }

    pub fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new()
            .cache(!self.no_tile_cache)
            .block_size(self.block_size)
            .block_capacity(self.cache_blocks)
            .s3_region(self.s3_region.clone());
        if let Some(endpoint) = &self.s3_endpoint {
            options = options.s3_endpoint(endpoint.clone());
        }
        options
    }
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Main GeoTIFF (path or URL).
    pub source: String,

    /// External overview file; may be repeated.
    #[arg(long = "overview")]
    pub overviews: Vec<String>,

    #[command(flatten)]
    pub source_config: SourceConfig,
}

impl InfoConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("a source is required".to_string());
        }
        self.source_config.validate()
    }
}

// =============================================================================
// Read Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ReadConfig {
    /// Main GeoTIFF (path or URL).
    pub source: String,

    /// External overview file; may be repeated.
    #[arg(long = "overview")]
    pub overviews: Vec<String>,

    /// Read this image index directly instead of picking the best image.
    #[arg(long)]
    pub image: Option<usize>,

    /// Pixel window `x0,y0,x1,y1`.
    #[arg(long)]
    pub window: Option<Window>,

    /// Georeferenced bounds `min_x,min_y,max_x,max_y`.
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<[f64; 4]>,

    /// Output width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Requested horizontal resolution in model units per pixel.
    #[arg(long)]
    pub res_x: Option<f64>,

    /// Requested vertical resolution in model units per pixel.
    #[arg(long)]
    pub res_y: Option<f64>,

    /// Bands to read (comma-separated); all bands by default.
    #[arg(long, value_delimiter = ',')]
    pub samples: Option<Vec<usize>>,

    /// Resampling method: nearest or bilinear.
    #[arg(long, default_value_t = ResampleMethod::Nearest)]
    pub resample: ResampleMethod,

    /// Value for pixels not covered by any tile.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub fill_value: f64,

    /// Decode worker count; 0 uses one per CPU. Decodes inline when unset.
    #[arg(long, env = "GEOTIFF_WORKERS")]
    pub workers: Option<usize>,

    #[command(flatten)]
    pub source_config: SourceConfig,
}

impl ReadConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("a source is required".to_string());
        }
        if self.window.is_some() && self.bbox.is_some() {
            return Err("--window and --bbox cannot be combined".to_string());
        }
        if let Some(window) = &self.window {
            window.validate().map_err(|e| e.to_string())?;
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.width.is_some() && self.res_x.is_some() {
            return Err("--width and --res-x cannot be combined".to_string());
        }
        if self.height.is_some() && self.res_y.is_some() {
            return Err("--height and --res-y cannot be combined".to_string());
        }
        if self.res_x.is_some_and(|r| r <= 0.0) || self.res_y.is_some_and(|r| r <= 0.0) {
            return Err("resolutions must be positive".to_string());
        }
        if self.samples.as_ref().is_some_and(|s| s.is_empty()) {
            return Err("--samples must name at least one band".to_string());
        }
        if self.image.is_some() && (self.bbox.is_some() || self.res_x.is_some() || self.res_y.is_some()) {
            return Err("--image cannot be combined with --bbox or resolutions".to_string());
        }
        self.source_config.validate()
    }

    pub fn decode_pool(&self) -> DecodePool {
        match self.workers {
            Some(workers) => DecodePool::with_workers(workers),
            None => DecodePool::inline(),
        }
    }

    pub fn read_options(&self) -> ReadRasterOptions {
        ReadRasterOptions {
            window: self.window,
            bbox: self.bbox,
            res_x: self.res_x,
            res_y: self.res_y,
            width: self.width,
            height: self.height,
            resample: self.resample,
            samples: self.samples.clone(),
            interleave: false,
            fill_value: self.fill_value,
            pool: None,
            signal: None,
        }
    }
}

fn parse_bbox(s: &str) -> Result<[f64; 4], String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid bbox '{}': {}", s, e))?;
    match parts.as_slice() {
        [a, b, c, d] => Ok([*a, *b, *c, *d]),
        _ => Err(format!("invalid bbox '{}': expected min_x,min_y,max_x,max_y", s)),
    }
}

// =============================================================================
// Tests
// =============================================================================
