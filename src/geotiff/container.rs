//! Single-file GeoTIFF container.
//!
//! The IFD chain is resolved lazily: `get_image(i)` walks from the last known
//! directory up to `i`, one directory at a time, since every "next" offset is
//! only known once the previous directory has been parsed. Directories are
//! cached by offset so manual walks through `parse_file_directory_at` share
//! the same entries.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::cache::SharedCache;
use super::image::{GeoTiffImage, TileCache};
use crate::codec::{DecodePool, DecoderRegistry};
use crate::error::{GeoTiffError, Result, TiffError};
use crate::io::{AbortSignal, ByteOrder, RangeReader};
use crate::tiff::{parse_directory_at, read_ghost_area, GhostValues, ImageFileDirectory, TiffHeader};

/// Progress of the IFD chain walk.
struct IfdChain {
    /// Offsets of the directories resolved so far, by image index
    offsets: Vec<u64>,
    visited: HashSet<u64>,
    /// Next unresolved offset, `None` once the end was reached
    next: Option<u64>,
}

struct Shared {
    reader: Arc<dyn RangeReader>,
    header: TiffHeader,
    owns_source: bool,
    registry: Arc<DecoderRegistry>,
    pool: DecodePool,
    directories: SharedCache<u64, Arc<ImageFileDirectory>>,
    tiles: Arc<TileCache>,
    chain: Mutex<IfdChain>,
    /// Copy of `IfdChain::offsets` readable without waiting on a walk
    resolved: RwLock<Vec<u64>>,
    image_count: OnceCell<usize>,
    ghost: OnceCell<Option<GhostValues>>,
}

/// A GeoTIFF read lazily from a [`RangeReader`].
///
/// Cloning is cheap and clones share all caches.
#[derive(Clone)]
pub struct GeoTiff {
    inner: Arc<Shared>,
}

impl GeoTiff {
    /// Read the header of `reader` and build a container over it.
    ///
    /// `owns_source` decides whether [`GeoTiff::close`] closes the reader.
    pub(crate) async fn from_source(
        reader: Arc<dyn RangeReader>,
        owns_source: bool,
        cache: bool,
        registry: Arc<DecoderRegistry>,
        pool: DecodePool,
        signal: Option<&AbortSignal>,
    ) -> Result<Self> {
        let header = TiffHeader::read(reader.as_ref(), signal).await?;
        debug!(
            source = reader.identifier(),
            bigtiff = header.is_bigtiff,
            byte_order = ?header.byte_order,
            first_ifd = header.first_ifd_offset,
            "opened TIFF"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                reader,
                header,
                owns_source,
                registry,
                pool,
                directories: SharedCache::new(true),
                tiles: Arc::new(SharedCache::new(cache)),
                chain: Mutex::new(IfdChain {
                    offsets: Vec::new(),
                    visited: HashSet::new(),
                    next: Some(header.first_ifd_offset),
                }),
                resolved: RwLock::new(Vec::new()),
                image_count: OnceCell::new(),
                ghost: OnceCell::new(),
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn header(&self) -> &TiffHeader {
        &self.inner.header
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.inner.header.byte_order
    }

    pub fn is_bigtiff(&self) -> bool {
        self.inner.header.is_bigtiff
    }

    pub fn first_ifd_offset(&self) -> u64 {
        self.inner.header.first_ifd_offset
    }

    pub fn source(&self) -> &Arc<dyn RangeReader> {
        &self.inner.reader
    }

    pub fn registry(&self) -> &Arc<DecoderRegistry> {
        &self.inner.registry
    }

    /// Whether decoded tiles are kept after a read.
    pub fn cache_enabled(&self) -> bool {
        self.inner.tiles.retains()
    }

    /// Number of decoded tiles currently cached.
    pub fn cached_tiles(&self) -> usize {
        self.inner.tiles.len()
    }

    // -------------------------------------------------------------------------
    // Directories
    // -------------------------------------------------------------------------

    /// Parse the directory at `offset`, or return the cached one.
    ///
    /// Concurrent calls for the same offset share one parse. Dropping the
    /// returned future (or firing `signal`) only abandons this caller.
    pub async fn parse_file_directory_at(
        &self,
        offset: u64,
        signal: Option<&AbortSignal>,
    ) -> Result<Arc<ImageFileDirectory>> {
        let reader = self.inner.reader.clone();
        let header = self.inner.header;
        self.inner
            .directories
            .get_or_load(offset, signal, move || async move {
                debug!(offset, "parsing directory");
                let ifd = parse_directory_at(reader.as_ref(), &header, offset, None).await?;
                Ok::<_, GeoTiffError>(Arc::new(ifd))
            })
            .await
    }

    /// Resolve one more directory of the chain. Returns `false` at the end.
    async fn advance(&self, chain: &mut IfdChain) -> Result<bool> {
        let Some(offset) = chain.next else {
            return Ok(false);
        };
        if chain.visited.contains(&offset) {
            return Err(TiffError::CorruptDirectory {
                offset,
                reason: format!(
                    "directory chain loops back after {} directories",
                    chain.offsets.len()
                ),
            }
            .into());
        }
        let ifd = self.parse_file_directory_at(offset, None).await?;
        chain.visited.insert(offset);
        chain.offsets.push(offset);
        chain.next = ifd.next_ifd_offset();
        self.inner
            .resolved
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(offset);
        Ok(true)
    }

    /// Offset of the directory of image `index`, walking the chain as needed.
    async fn directory_offset(&self, index: usize) -> Result<u64> {
        let known = self
            .inner
            .resolved
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(index)
            .copied();
        if let Some(offset) = known {
            return Ok(offset);
        }

        let mut chain = self.inner.chain.lock().await;
        while chain.offsets.len() <= index {
            if !self.advance(&mut chain).await? {
                return Err(GeoTiffError::ImageIndexOutOfRange {
                    index,
                    count: chain.offsets.len(),
                });
            }
        }
        Ok(chain.offsets[index])
    }

    /// The image at `index` of the IFD chain.
    pub async fn get_image(&self, index: usize) -> Result<GeoTiffImage> {
        let offset = self.directory_offset(index).await?;
        let ifd = self.parse_file_directory_at(offset, None).await?;
        self.image_for(ifd)
    }

    /// Wrap an already parsed directory of this file as an image.
    pub fn image_for(&self, ifd: Arc<ImageFileDirectory>) -> Result<GeoTiffImage> {
        GeoTiffImage::new(
            ifd,
            self.inner.reader.clone(),
            self.inner.header.byte_order,
            self.inner.registry.clone(),
            self.inner.pool.clone(),
            self.inner.tiles.clone(),
        )
    }

    /// Number of images in the file. Walks the whole chain once.
    pub async fn get_image_count(&self) -> Result<usize> {
        self.inner
            .image_count
            .get_or_try_init(|| async {
                let mut chain = self.inner.chain.lock().await;
                while self.advance(&mut chain).await? {}
                debug!(count = chain.offsets.len(), "walked directory chain");
                Ok::<_, GeoTiffError>(chain.offsets.len())
            })
            .await
            .copied()
    }

    /// GDAL ghost area values, `None` when the file has none.
    pub async fn ghost_values(&self) -> Result<Option<GhostValues>> {
        self.inner
            .ghost
            .get_or_try_init(|| read_ghost_area(self.inner.reader.as_ref(), &self.inner.header, None))
            .await
            .cloned()
    }

    /// Release the source if this container opened it and drop cached tiles.
    ///
    /// Sources handed in by the caller stay open.
    pub async fn close(&self) -> Result<()> {
        self.inner.tiles.clear();
        if self.inner.owns_source {
            debug!(source = self.inner.reader.identifier(), "closing source");
            self.inner.reader.close().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for GeoTiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoTiff")
            .field("source", &self.inner.reader.identifier())
            .field("header", &self.inner.header)
            .field("owns_source", &self.inner.owns_source)
            .field("cache", &self.cache_enabled())
            .finish()
    }
}
