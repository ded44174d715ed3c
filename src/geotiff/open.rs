//! Construction entry points.
//!
//! | Location | Source |
//! |---|---|
//! | `http://`, `https://` | [`HttpRangeReader`] |
//! | `s3://bucket/key` | [`S3RangeReader`] |
//! | `file://` or a plain path | [`FileRangeReader`] |
//!
//! Remote and file sources are wrapped in a [`BlockCache`] unless disabled,
//! so directory parsing costs a handful of requests instead of one per tag.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::container::GeoTiff;
use crate::codec::{DecodePool, DecoderRegistry};
use crate::error::{GeoTiffError, IoError, Result};
use crate::io::{
    create_s3_client, parse_s3_url, with_signal, AbortSignal, BlockCache, FileRangeReader,
    HttpRangeReader, MemoryReader, RangeReader, S3RangeReader, DEFAULT_BLOCK_CAPACITY,
    DEFAULT_BLOCK_SIZE,
};

/// Default AWS region when none is configured.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

// =============================================================================
// OpenOptions
// =============================================================================

/// Options shared by every construction entry point.
#[derive(Clone)]
pub struct OpenOptions {
    /// Keep decoded tiles for the lifetime of the container
    pub cache: bool,
    pub registry: Arc<DecoderRegistry>,
    /// Default decode pool for reads that do not bring their own
    pub pool: DecodePool,
    /// Wrap file and remote sources in a block cache
    pub block_cache: bool,
    pub block_size: usize,
    /// Block cache capacity in blocks
    pub block_capacity: usize,
    /// Custom S3 endpoint (MinIO, LocalStack...)
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub http_client: Option<reqwest::Client>,
    /// Cancels construction
    pub signal: Option<AbortSignal>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cache: true,
            registry: Arc::new(DecoderRegistry::with_defaults()),
            pool: DecodePool::inline(),
            block_cache: true,
            block_size: DEFAULT_BLOCK_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            s3_endpoint: None,
            s3_region: DEFAULT_S3_REGION.to_string(),
            http_client: None,
            signal: None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(mut self, registry: Arc<DecoderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn pool(mut self, pool: DecodePool) -> Self {
        self.pool = pool;
        self
    }

    pub fn block_cache(mut self, enabled: bool) -> Self {
        self.block_cache = enabled;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    pub fn s3_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.s3_endpoint = Some(endpoint.into());
        self
    }

    pub fn s3_region(mut self, region: impl Into<String>) -> Self {
        self.s3_region = region.into();
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    fn wrap(&self, reader: Arc<dyn RangeReader>) -> Arc<dyn RangeReader> {
        if !self.block_cache {
            return reader;
        }
        Arc::new(BlockCache::with_capacity(
            reader,
            self.block_size,
            self.block_capacity,
        ))
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("cache", &self.cache)
            .field("codecs", &self.registry.codes())
            .field("pool", &self.pool)
            .field("block_cache", &self.block_cache)
            .field("block_size", &self.block_size)
            .field("block_capacity", &self.block_capacity)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_region", &self.s3_region)
            .finish()
    }
}

// =============================================================================
// Entry points
// =============================================================================

impl GeoTiff {
    /// Open a URL (`http`, `https`, `s3`, `file`) or a local path.
    pub async fn open(location: &str, options: OpenOptions) -> Result<Self> {
        if location.contains("://") {
            Self::from_url(location, options).await
        } else {
            Self::from_path(location, options).await
        }
    }

    /// Open a remote or `file://` URL.
    pub async fn from_url(url: &str, options: OpenOptions) -> Result<Self> {
        let signal = options.signal.clone();
        let reader = with_signal(signal.as_ref(), || GeoTiffError::Aborted, async {
            let parsed = Url::parse(url)
                .map_err(|e| IoError::NotFound(format!("{}: {}", url, e)))?;
            let reader: Arc<dyn RangeReader> = match parsed.scheme() {
                "http" | "https" => {
                    let client = options.http_client.clone().unwrap_or_default();
                    Arc::new(HttpRangeReader::new(client, url).await?)
                }
                "s3" => {
                    let (bucket, key) = parse_s3_url(url)
                        .ok_or_else(|| IoError::NotFound(format!("invalid S3 URL: {}", url)))?;
                    let client =
                        create_s3_client(options.s3_endpoint.as_deref(), &options.s3_region).await;
                    Arc::new(S3RangeReader::new(client, bucket, key).await?)
                }
                "file" => {
                    let path = parsed
                        .to_file_path()
                        .map_err(|_| IoError::NotFound(url.to_string()))?;
                    Arc::new(FileRangeReader::open(path).await?)
                }
                scheme => {
                    return Err(IoError::Connection(format!(
                        "unsupported URL scheme '{}' in {}",
                        scheme, url
                    ))
                    .into())
                }
            };
            Ok::<_, GeoTiffError>(reader)
        })
        .await?;

        debug!(url, "opened URL source");
        Self::build(options.wrap(reader), true, &options).await
    }

    /// Open a local file. The file is closed by [`GeoTiff::close`].
    pub async fn from_path(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let signal = options.signal.clone();
        let reader = with_signal(signal.as_ref(), || GeoTiffError::Aborted, async {
            Ok::<_, GeoTiffError>(FileRangeReader::open(path).await?)
        })
        .await?;
        Self::build(options.wrap(Arc::new(reader)), true, &options).await
    }

    /// Read from an in-memory buffer.
    pub async fn from_bytes(data: impl Into<Bytes>, options: OpenOptions) -> Result<Self> {
        let reader: Arc<dyn RangeReader> = Arc::new(MemoryReader::new(data));
        Self::build(reader, true, &options).await
    }

    /// Read from a caller-provided source. [`GeoTiff::close`] leaves it open.
    pub async fn from_reader(reader: Arc<dyn RangeReader>, options: OpenOptions) -> Result<Self> {
        Self::build(reader, false, &options).await
    }

    /// Parse the header and the first directory.
    async fn build(
        reader: Arc<dyn RangeReader>,
        owns_source: bool,
        options: &OpenOptions,
    ) -> Result<Self> {
        let signal = options.signal.as_ref();
        let tiff = Self::from_source(
            reader,
            owns_source,
            options.cache,
            options.registry.clone(),
            options.pool.clone(),
            signal,
        )
        .await?;
        with_signal(signal, || GeoTiffError::Aborted, tiff.get_image(0)).await?;
        Ok(tiff)
    }
}
