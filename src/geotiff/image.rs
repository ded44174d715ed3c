//! One image of a GeoTIFF: geometry, georeferencing and windowed reads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use super::cache::SharedCache;
use crate::codec::{DecodePool, DecodeTask, Decoder, DecoderParams, DecoderRegistry};
use crate::error::{DecodeError, GeoTiffError, Result, TiffError};
use crate::io::{with_signal, AbortSignal, ByteOrder, RangeReader};
use crate::raster::{
    plan_blocks, BlockRequest, ImageGeometry, Rasters, ReadRasterOptions, Window, WindowAssembler,
};
use crate::tiff::{GeoKey, GeoKeyDirectory, ImageFileDirectory, TiffTag};

/// Decoded tiles keyed by (directory offset, block index).
pub(crate) type TileCache = SharedCache<(u64, usize), Bytes>;

/// A tie point mapping raster `(i, j, k)` to model `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TiePoint {
    pub i: f64,
    pub j: f64,
    pub k: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

type DecoderSetup = (Arc<dyn Decoder>, Arc<DecoderParams>);

struct ImageInner {
    directory: Arc<ImageFileDirectory>,
    geometry: ImageGeometry,
    reader: Arc<dyn RangeReader>,
    byte_order: ByteOrder,
    registry: Arc<DecoderRegistry>,
    pool: DecodePool,
    tiles: Arc<TileCache>,
    decoder: OnceLock<DecoderSetup>,
}

/// One parsed image bound to its source, decoder registry and tile cache.
///
/// Cheap to clone; clones share the decoder and the owning container's cache.
#[derive(Clone)]
pub struct GeoTiffImage {
    inner: Arc<ImageInner>,
}

impl GeoTiffImage {
    pub(crate) fn new(
        directory: Arc<ImageFileDirectory>,
        reader: Arc<dyn RangeReader>,
        byte_order: ByteOrder,
        registry: Arc<DecoderRegistry>,
        pool: DecodePool,
        tiles: Arc<TileCache>,
    ) -> Result<Self> {
        let geometry = ImageGeometry::from_directory(&directory)?;
        Ok(Self {
            inner: Arc::new(ImageInner {
                directory,
                geometry,
                reader,
                byte_order,
                registry,
                pool,
                tiles,
                decoder: OnceLock::new(),
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    pub fn file_directory(&self) -> &ImageFileDirectory {
        &self.inner.directory
    }

    pub fn geo_keys(&self) -> Option<&GeoKeyDirectory> {
        self.inner.directory.geo_keys()
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.inner.geometry
    }

    pub fn width(&self) -> u32 {
        self.inner.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.inner.geometry.height
    }

    pub fn tile_width(&self) -> u32 {
        self.inner.geometry.tile_width
    }

    /// Tile height, or rows per strip for stripped images.
    pub fn tile_height(&self) -> u32 {
        self.inner.geometry.tile_height
    }

    pub fn is_tiled(&self) -> bool {
        self.inner.geometry.is_tiled
    }

    pub fn samples_per_pixel(&self) -> u16 {
        self.inner.geometry.samples_per_pixel
    }

    pub fn bits_per_sample(&self) -> &[u16] {
        &self.inner.geometry.bits_per_sample
    }

    pub fn sample_format(&self) -> &[u16] {
        &self.inner.geometry.sample_format
    }

    pub fn compression(&self) -> u16 {
        self.inner.geometry.compression
    }

    pub fn predictor(&self) -> u16 {
        self.inner.geometry.predictor
    }

    pub fn planar_configuration(&self) -> u16 {
        self.inner.geometry.planar_configuration
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.inner.byte_order
    }

    /// Reduced-resolution copy of another image (SubfileType 2 or bit 0 of
    /// NewSubfileType).
    pub fn is_reduced_resolution(&self) -> bool {
        let dir = &self.inner.directory;
        let subfile = dir.u64_value(TiffTag::SubfileType).ok().flatten();
        let new_subfile = dir.u64_value(TiffTag::NewSubfileType).ok().flatten().unwrap_or(0);
        subfile == Some(2) || new_subfile & 1 != 0
    }

    /// Transparency mask (bit 2 of NewSubfileType).
    pub fn is_mask(&self) -> bool {
        let new_subfile = self
            .inner
            .directory
            .u64_value(TiffTag::NewSubfileType)
            .ok()
            .flatten()
            .unwrap_or(0);
        new_subfile & 4 != 0
    }

    // -------------------------------------------------------------------------
    // Georeferencing
    // -------------------------------------------------------------------------

    pub fn tie_points(&self) -> Vec<TiePoint> {
        let Some(values) = self.inner.directory.f64_array(TiffTag::ModelTiepoint) else {
            return Vec::new();
        };
        values
            .chunks_exact(6)
            .map(|c| TiePoint {
                i: c[0],
                j: c[1],
                k: c[2],
                x: c[3],
                y: c[4],
                z: c[5],
            })
            .collect()
    }

    /// Model coordinates of the upper left corner.
    pub fn origin(&self) -> Result<[f64; 3]> {
        let dir = &self.inner.directory;
        if let Some(tie) = dir.f64_array(TiffTag::ModelTiepoint).filter(|t| t.len() >= 6) {
            return Ok([tie[3], tie[4], tie[5]]);
        }
        if let Some(t) = transformation(dir) {
            return Ok([t[3], t[7], t[11]]);
        }
        Err(GeoTiffError::NoAffineTransformation)
    }

    /// Pixel size `[x, y, z]`; `y` is negative for north-up images.
    ///
    /// Without its own georeferencing, an image derives its resolution from
    /// `reference` scaled by the size ratio (overviews usually carry none).
    pub fn resolution(&self, reference: Option<&GeoTiffImage>) -> Result<[f64; 3]> {
        let dir = &self.inner.directory;
        if let Some(scale) = dir.f64_array(TiffTag::ModelPixelScale).filter(|s| s.len() >= 3) {
            return Ok([scale[0], -scale[1], scale[2]]);
        }
        if let Some(t) = transformation(dir) {
            if t[1] == 0.0 && t[4] == 0.0 {
                return Ok([t[0], -t[5], t[10]]);
            }
            return Ok([
                (t[0] * t[0] + t[4] * t[4]).sqrt(),
                -(t[1] * t[1] + t[5] * t[5]).sqrt(),
                t[10],
            ]);
        }
        if let Some(reference) = reference {
            let [rx, ry, rz] = reference.resolution(None)?;
            let sx = reference.width() as f64 / self.width() as f64;
            let sy = reference.height() as f64 / self.height() as f64;
            return Ok([rx * sx, ry * sy, rz * sx]);
        }
        Err(GeoTiffError::NoAffineTransformation)
    }

    /// Whether pixel values describe areas (GTRasterTypeGeoKey 1).
    pub fn pixel_is_area(&self) -> bool {
        self.geo_keys()
            .and_then(|keys| keys.get(GeoKey::GTRasterTypeGeoKey))
            .and_then(|v| v.as_u16())
            == Some(1)
    }

    /// Model bounds `[min_x, min_y, max_x, max_y]`.
    pub fn bounding_box(&self) -> Result<[f64; 4]> {
        let width = self.width() as f64;
        let height = self.height() as f64;

        if let Some(t) = transformation(&self.inner.directory) {
            let corners = [(0.0, 0.0), (0.0, height), (width, 0.0), (width, height)];
            let projected: Vec<(f64, f64)> = corners
                .iter()
                .map(|&(i, j)| (t[3] + t[0] * i + t[1] * j, t[7] + t[4] * i + t[5] * j))
                .collect();
            let xs = projected.iter().map(|p| p.0);
            let ys = projected.iter().map(|p| p.1);
            return Ok([
                xs.clone().fold(f64::INFINITY, f64::min),
                ys.clone().fold(f64::INFINITY, f64::min),
                xs.fold(f64::NEG_INFINITY, f64::max),
                ys.fold(f64::NEG_INFINITY, f64::max),
            ]);
        }

        let [x1, y1, _] = self.origin()?;
        let [rx, ry, _] = self.resolution(None)?;
        let x2 = x1 + rx * width;
        let y2 = y1 + ry * height;
        Ok([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)])
    }

    // -------------------------------------------------------------------------
    // GDAL extensions
    // -------------------------------------------------------------------------

    /// `GDAL_NODATA` as a number.
    pub fn gdal_nodata(&self) -> Option<f64> {
        let text = self.inner.directory.ascii(TiffTag::GdalNodata)?;
        text.trim_end_matches('\0').trim().parse().ok()
    }

    /// `GDAL_METADATA` items for one band, or dataset-level items when
    /// `sample` is `None`. `Ok(None)` when the tag is absent.
    pub fn gdal_metadata(&self, sample: Option<usize>) -> Result<Option<BTreeMap<String, String>>> {
        let Some(xml) = self.inner.directory.ascii(TiffTag::GdalMetadata) else {
            return Ok(None);
        };
        let items = parse_gdal_metadata(xml)?;
        Ok(Some(
            items
                .into_iter()
                .filter(|item| item.sample == sample)
                .map(|item| (item.name, item.value))
                .collect(),
        ))
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Read a window of this image.
    ///
    /// Only `window`, `width`, `height`, `resample`, `samples`, `interleave`,
    /// `fill_value`, `pool` and `signal` are used here; `bbox` and resolution
    /// requests are resolved by the containers.
    pub async fn read_rasters(&self, options: &ReadRasterOptions) -> Result<Rasters> {
        let geometry = &self.inner.geometry;
        let window = options
            .window
            .unwrap_or_else(|| Window::full(geometry.width, geometry.height));
        let samples = options
            .samples
            .clone()
            .unwrap_or_else(|| (0..geometry.samples_per_pixel as usize).collect());

        let mut assembler = WindowAssembler::new(
            geometry,
            window,
            samples.clone(),
            options.interleave,
            options.fill_value,
        )?;
        let blocks = plan_blocks(geometry, &window, &samples);
        let (decoder, params) = self.decoder()?;
        let pool = options.pool.clone().unwrap_or_else(|| self.inner.pool.clone());
        let signal = options.signal.clone();

        debug!(
            ifd = self.inner.directory.offset(),
            ?window,
            blocks = blocks.len(),
            "reading rasters"
        );

        let mut pending = JoinSet::new();
        for block in blocks {
            let image = self.clone();
            let decoder = decoder.clone();
            let params = params.clone();
            let pool = pool.clone();
            let signal = signal.clone();
            pending.spawn(async move {
                let result = image
                    .load_block(block, decoder, params, pool, signal.as_ref())
                    .await;
                (block, result)
            });
        }

        let collect = async {
            while let Some(joined) = pending.join_next().await {
                let (block, result) = joined.map_err(|e| {
                    GeoTiffError::Decode(DecodeError::new(
                        self.compression(),
                        format!("tile task failed: {}", e),
                    ))
                })?;
                let data = result.map_err(|cause| tile_failed(&block, cause))?;
                if let Some(data) = data {
                    assembler
                        .insert(&block, &data)
                        .map_err(|e| tile_failed(&block, e.into()))?;
                }
            }
            Ok::<(), GeoTiffError>(())
        };
        with_signal(signal.as_ref(), || GeoTiffError::Aborted, collect).await?;

        let rasters = assembler.finish();
        let out_width = options.width.unwrap_or(rasters.width);
        let out_height = options.height.unwrap_or(rasters.height);
        if out_width == 0 || out_height == 0 {
            return Err(GeoTiffError::InvalidReadOptions(
                "output width and height must be positive".into(),
            ));
        }
        Ok(rasters.resampled(out_width, out_height, options.resample))
    }

    /// Fetch and decode one block through the tile cache. `None` for sparse
    /// blocks, which stay filled.
    async fn load_block(
        &self,
        block: BlockRequest,
        decoder: Arc<dyn Decoder>,
        params: Arc<DecoderParams>,
        pool: DecodePool,
        signal: Option<&AbortSignal>,
    ) -> Result<Option<Bytes>> {
        let (offset, len) = self.inner.geometry.block_range(block.index).ok_or_else(|| {
            TiffError::CorruptDirectory {
                offset: self.inner.directory.offset(),
                reason: format!("no offset for block {}", block.index),
            }
        })?;
        if len == 0 {
            trace!(index = block.index, "sparse block");
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| TiffError::CorruptDirectory {
            offset: self.inner.directory.offset(),
            reason: format!("block {} is too large ({} bytes)", block.index, len),
        })?;

        let reader = self.inner.reader.clone();
        let key = (self.inner.directory.offset(), block.index);
        let data = self
            .inner
            .tiles
            .get_or_load(key, signal, move || async move {
                trace!(index = block.index, offset, len, "fetching block");
                let data = reader.fetch(offset, len, None).await?;
                let task = DecodeTask::new(data, decoder, params, block.sample);
                Ok::<_, GeoTiffError>(pool.decode(task).await?)
            })
            .await?;
        Ok(Some(data))
    }

    /// Decoder and parameters for this image. Only a successful lookup is
    /// kept, so a decoder registered later is still found.
    fn decoder(&self) -> std::result::Result<DecoderSetup, GeoTiffError> {
        if let Some(setup) = self.inner.decoder.get() {
            return Ok(setup.clone());
        }
        let geometry = &self.inner.geometry;
        let ifd_offset = self.inner.directory.offset();
        let factory = self.inner.registry.lookup(geometry.compression).ok_or(
            GeoTiffError::UnsupportedCompression {
                compression: geometry.compression,
                ifd_offset,
            },
        )?;
        let tables = self
            .inner
            .directory
            .get(TiffTag::JpegTables)
            .and_then(|v| v.as_bytes())
            .map(Bytes::copy_from_slice);
        let params = geometry.decoder_params(self.inner.byte_order, tables);
        let decoder = factory.create(&params)?;
        Ok(self
            .inner
            .decoder
            .get_or_init(|| (decoder, Arc::new(params)))
            .clone())
    }
}

impl fmt::Debug for GeoTiffImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoTiffImage")
            .field("offset", &self.inner.directory.offset())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("samples", &self.samples_per_pixel())
            .field("compression", &self.compression())
            .finish()
    }
}

fn tile_failed(block: &BlockRequest, cause: GeoTiffError) -> GeoTiffError {
    if cause.is_aborted() {
        return GeoTiffError::Aborted;
    }
    GeoTiffError::TileDecodeFailed {
        tile_index: block.index as u32,
        cause: Box::new(cause),
    }
}

fn transformation(dir: &ImageFileDirectory) -> Option<Vec<f64>> {
    dir.f64_array(TiffTag::ModelTransformation)
        .filter(|t| t.len() >= 16)
}

// =============================================================================
// GDAL_METADATA
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct MetadataItem {
    name: String,
    sample: Option<usize>,
    value: String,
}

fn metadata_error(message: impl fmt::Display) -> GeoTiffError {
    TiffError::InvalidTagValue {
        tag: TiffTag::GdalMetadata.name(),
        message: message.to_string(),
    }
    .into()
}

/// Parse `<GDALMetadata><Item name=".." sample="0">value</Item>...`.
fn parse_gdal_metadata(xml: &str) -> Result<Vec<MetadataItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<MetadataItem> = None;
    loop {
        match reader.read_event().map_err(metadata_error)? {
            Event::Start(e) if e.name().as_ref() == b"Item" => {
                let mut item = MetadataItem {
                    name: String::new(),
                    sample: None,
                    value: String::new(),
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(metadata_error)?;
                    let value = attr.unescape_value().map_err(metadata_error)?;
                    match attr.key.as_ref() {
                        b"name" => item.name = value.into_owned(),
                        b"sample" => item.sample = value.trim().parse().ok(),
                        _ => {}
                    }
                }
                current = Some(item);
            }
            Event::Text(text) => {
                if let Some(item) = current.as_mut() {
                    item.value.push_str(&text.unescape().map_err(metadata_error)?);
                }
            }
            Event::End(e) if e.name().as_ref() == b"Item" => {
                if let Some(item) = current.take() {
                    items.push(item);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}
