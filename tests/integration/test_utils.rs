//! Test utilities for integration tests.
//!
//! This module provides a request-tracking reader and a builder for small
//! in-memory TIFF/BigTIFF files with known sample values.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geotiff_stream::error::IoError;
use geotiff_stream::io::{ByteOrder, RangeReader};

// =============================================================================
// Tracking Reader
// =============================================================================

/// A range reader over a byte buffer that records every request.
///
/// An optional delay makes each read suspend, which lets tests overlap
/// concurrent callers.
#[derive(Clone)]
pub struct TrackingReader {
    data: Bytes,
    identifier: String,
    delay: Option<Duration>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
    closed: Arc<AtomicUsize>,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: "mock://tracking".to_string(),
            delay: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests that started at one of `offsets`.
    pub fn requests_at(&self, offsets: &[u64]) -> usize {
        self.requests()
            .iter()
            .filter(|(offset, _)| offsets.contains(offset))
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((offset, len));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn close(&self) -> Result<(), IoError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Sample patterns
// =============================================================================

/// Default sample value at `(x, y)` of band `s`; fits in a u8.
pub fn pattern(x: u32, y: u32, s: usize) -> f64 {
    ((x + 3 * y + 50 * s as u32) % 251) as f64
}

// =============================================================================
// Image description
// =============================================================================

/// Extra tag written into an image directory.
#[derive(Clone, Debug)]
pub enum TagData {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Double(Vec<f64>),
    Ascii(String),
}

type ValueFn = Arc<dyn Fn(u32, u32, usize) -> f64 + Send + Sync>;

/// One image of a test file.
#[derive(Clone)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    /// `(tile_width, tile_height)`, or `None` for strips
    pub tile: Option<(u32, u32)>,
    pub rows_per_strip: u32,
    pub samples: u16,
    pub bits: u16,
    pub sample_format: u16,
    pub planar: bool,
    pub compression: u16,
    pub predictor: u16,
    values: ValueFn,
    sparse: Vec<usize>,
    corrupt: Vec<usize>,
    tags: Vec<(u16, TagData)>,
}

impl ImageSpec {
    pub fn tiled(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            width,
            height,
            tile: Some((tile_width, tile_height)),
            rows_per_strip: height,
            samples: 1,
            bits: 8,
            sample_format: 1,
            planar: false,
            compression: 1,
            predictor: 1,
            values: Arc::new(pattern),
            sparse: Vec::new(),
            corrupt: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn stripped(width: u32, height: u32, rows_per_strip: u32) -> Self {
        Self {
            tile: None,
            rows_per_strip,
            ..Self::tiled(width, height, width, height)
        }
    }

    pub fn samples(mut self, samples: u16) -> Self {
        self.samples = samples;
        self
    }

    /// Bits per sample and SampleFormat (1 uint, 2 int, 3 float).
    pub fn format(mut self, bits: u16, sample_format: u16) -> Self {
        self.bits = bits;
        self.sample_format = sample_format;
        self
    }

    pub fn planar(mut self) -> Self {
        self.planar = true;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.compression = 8;
        self
    }

    pub fn packbits(mut self) -> Self {
        self.compression = 32773;
        self
    }

    pub fn compression(mut self, code: u16) -> Self {
        self.compression = code;
        self
    }

    /// Horizontal differencing; integer formats only.
    pub fn horizontal_predictor(mut self) -> Self {
        self.predictor = 2;
        self
    }

    pub fn values(mut self, f: impl Fn(u32, u32, usize) -> f64 + Send + Sync + 'static) -> Self {
        self.values = Arc::new(f);
        self
    }

    /// Write block `index` with a byte count of 0.
    pub fn sparse(mut self, index: usize) -> Self {
        self.sparse.push(index);
        self
    }

    /// Replace the payload of block `index` with bytes no codec accepts.
    pub fn corrupt(mut self, index: usize) -> Self {
        self.corrupt.push(index);
        self
    }

    pub fn tag(mut self, tag: u16, data: TagData) -> Self {
        self.tags.push((tag, data));
        self
    }

    /// NewSubfileType bit 0.
    pub fn reduced(self) -> Self {
        self.tag(254, TagData::Long(vec![1]))
    }

    /// NewSubfileType bit 2.
    pub fn mask(self) -> Self {
        self.tag(254, TagData::Long(vec![4]))
    }

    /// North-up georeferencing with square pixels and EPSG:32633.
    pub fn georeferenced(self, origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        self.tag(33550, TagData::Double(vec![pixel_size, pixel_size, 0.0]))
            .tag(
                33922,
                TagData::Double(vec![0.0, 0.0, 0.0, origin_x, origin_y, 0.0]),
            )
            .tag(
                34735,
                TagData::Short(vec![
                    1, 1, 0, 3, // header
                    1024, 0, 1, 1, // GTModelTypeGeoKey = projected
                    1025, 0, 1, 1, // GTRasterTypeGeoKey = PixelIsArea
                    3072, 0, 1, 32633, // ProjectedCSTypeGeoKey
                ]),
            )
    }

    pub fn value(&self, x: u32, y: u32, s: usize) -> f64 {
        (self.values)(x, y, s)
    }

    fn block_size(&self) -> (u32, u32) {
        self.tile.unwrap_or((self.width, self.rows_per_strip.min(self.height)))
    }

    fn blocks_across(&self) -> u32 {
        let (bw, _) = self.block_size();
        self.width.div_ceil(bw)
    }

    fn blocks_down(&self) -> u32 {
        let (_, bh) = self.block_size();
        self.height.div_ceil(bh)
    }

    /// Number of blocks per plane.
    pub fn blocks_per_plane(&self) -> usize {
        (self.blocks_across() * self.blocks_down()) as usize
    }

    /// Raw (uncompressed) sample bytes of one block.
    fn raw_block(&self, bx: u32, by: u32, plane: Option<usize>, order: ByteOrder) -> Vec<u8> {
        let (bw, bh) = self.block_size();
        let rows = if self.tile.is_some() {
            bh
        } else {
            bh.min(self.height - by * bh)
        };
        let bands: Vec<usize> = match plane {
            Some(p) => vec![p],
            None => (0..self.samples as usize).collect(),
        };
        let bytes = (self.bits / 8) as usize;
        let mask = if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        };

        let mut out = Vec::new();
        for row in 0..rows {
            let mut raw: Vec<u64> = Vec::with_capacity(bw as usize * bands.len());
            for col in 0..bw {
                let x = bx * bw + col;
                let y = by * bh + row;
                for &s in &bands {
                    let v = if x < self.width && y < self.height {
                        self.value(x, y, s)
                    } else {
                        0.0
                    };
                    raw.push(self.to_bits(v) & mask);
                }
            }
            if self.predictor == 2 {
                let stride = bands.len();
                for i in (stride..raw.len()).rev() {
                    raw[i] = raw[i].wrapping_sub(raw[i - stride]) & mask;
                }
            }
            for v in raw {
                put(&mut out, v, bytes, order);
            }
        }
        out
    }

    fn to_bits(&self, v: f64) -> u64 {
        match (self.sample_format, self.bits) {
            (3, 32) => (v as f32).to_bits() as u64,
            (3, 64) => v.to_bits(),
            (2, _) => v as i64 as u64,
            _ => v as u64,
        }
    }

    fn encode(&self, raw: Vec<u8>) -> Vec<u8> {
        match self.compression {
            8 => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw).unwrap();
                encoder.finish().unwrap()
            }
            32773 => {
                let mut out = Vec::new();
                for chunk in raw.chunks(128) {
                    out.push((chunk.len() - 1) as u8);
                    out.extend_from_slice(chunk);
                }
                out
            }
            _ => raw,
        }
    }
}

// =============================================================================
// TIFF File Builder
// =============================================================================

/// Where the pieces of one built image ended up.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub ifd_offset: u64,
    pub block_offsets: Vec<u64>,
    pub block_counts: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct BuiltTiff {
    pub data: Vec<u8>,
    pub images: Vec<BuiltImage>,
}

impl BuiltTiff {
    pub fn reader(&self) -> TrackingReader {
        TrackingReader::new(self.data.clone())
    }
}

/// Builder for test TIFF files.
pub struct TiffBuilder {
    byte_order: ByteOrder,
    is_bigtiff: bool,
    ghost: Option<String>,
    cyclic: bool,
    images: Vec<ImageSpec>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            ghost: None,
            cyclic: false,
            images: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, is_bigtiff: bool) -> Self {
        self.is_bigtiff = is_bigtiff;
        self
    }

    /// GDAL ghost area written right after the header.
    pub fn with_ghost(mut self, lines: &[&str]) -> Self {
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        let text = format!("GDAL_STRUCTURAL_METADATA_SIZE={:06} bytes\n{}", body.len(), body);
        self.ghost = Some(text);
        self
    }

    /// Point the last directory back at the first one.
    pub fn with_cycle(mut self) -> Self {
        self.cyclic = true;
        self
    }

    pub fn add_image(mut self, image: ImageSpec) -> Self {
        self.images.push(image);
        self
    }

    pub fn build(self) -> BuiltTiff {
        let order = self.byte_order;
        let offset_size = if self.is_bigtiff { 8 } else { 4 };
        let mut data = Vec::new();

        match order {
            ByteOrder::LittleEndian => data.extend_from_slice(b"II"),
            ByteOrder::BigEndian => data.extend_from_slice(b"MM"),
        }
        if self.is_bigtiff {
            put(&mut data, 43, 2, order);
            put(&mut data, 8, 2, order);
            put(&mut data, 0, 2, order);
        } else {
            put(&mut data, 42, 2, order);
        }
        let mut next_pointer = data.len();
        put(&mut data, 0, offset_size, order);

        if let Some(ghost) = &self.ghost {
            data.extend_from_slice(ghost.as_bytes());
        }

        let mut built = Vec::new();
        for image in &self.images {
            // Block payloads first
            let planes: Vec<Option<usize>> = if image.planar {
                (0..image.samples as usize).map(Some).collect()
            } else {
                vec![None]
            };
            let mut block_offsets = Vec::new();
            let mut block_counts = Vec::new();
            for plane in &planes {
                for by in 0..image.blocks_down() {
                    for bx in 0..image.blocks_across() {
                        let index = block_offsets.len();
                        if image.sparse.contains(&index) {
                            block_offsets.push(0);
                            block_counts.push(0);
                            continue;
                        }
                        let payload = if image.corrupt.contains(&index) {
                            vec![0xFF; 16]
                        } else {
                            image.encode(image.raw_block(bx, by, *plane, order))
                        };
                        block_offsets.push(data.len() as u64);
                        block_counts.push(payload.len() as u64);
                        data.extend_from_slice(&payload);
                    }
                }
            }

            let spp = image.samples as usize;
            let (bw, bh) = image.block_size();
            let offsets_tag = if image.tile.is_some() { 324 } else { 273 };
            let counts_tag = if image.tile.is_some() { 325 } else { 279 };
            let offsets_data = if self.is_bigtiff {
                Entry::long8s(offsets_tag, &block_offsets)
            } else {
                Entry::longs(offsets_tag, &block_offsets)
            };
            let counts_data = if self.is_bigtiff {
                Entry::long8s(counts_tag, &block_counts)
            } else {
                Entry::longs(counts_tag, &block_counts)
            };

            let mut entries = vec![
                Entry::longs(256, &[image.width as u64]),
                Entry::longs(257, &[image.height as u64]),
                Entry::shorts(258, &vec![image.bits; spp]),
                Entry::shorts(259, &[image.compression]),
                Entry::shorts(262, &[if spp >= 3 { 2 } else { 1 }]),
                Entry::shorts(277, &[image.samples]),
                Entry::shorts(284, &[if image.planar { 2 } else { 1 }]),
                Entry::shorts(339, &vec![image.sample_format; spp]),
                offsets_data,
                counts_data,
            ];
            if image.predictor != 1 {
                entries.push(Entry::shorts(317, &[image.predictor]));
            }
            if image.tile.is_some() {
                entries.push(Entry::longs(322, &[bw as u64]));
                entries.push(Entry::longs(323, &[bh as u64]));
            } else {
                entries.push(Entry::longs(278, &[image.rows_per_strip as u64]));
            }
            for (tag, value) in &image.tags {
                entries.push(Entry::from_tag(*tag, value));
            }
            entries.sort_by_key(|e| e.tag);
            entries.dedup_by_key(|e| e.tag);

            // Out-of-line values, then the directory
            let inline = offset_size;
            let mut value_offsets = Vec::with_capacity(entries.len());
            for entry in &entries {
                let bytes = entry.bytes(order);
                if bytes.len() > inline {
                    if data.len() % 2 == 1 {
                        data.push(0);
                    }
                    value_offsets.push(Some(data.len() as u64));
                    data.extend_from_slice(&bytes);
                } else {
                    value_offsets.push(None);
                }
            }

            if data.len() % 2 == 1 {
                data.push(0);
            }
            let ifd_offset = data.len() as u64;
            patch(&mut data, next_pointer, ifd_offset, offset_size, order);

            put(&mut data, entries.len() as u64, if self.is_bigtiff { 8 } else { 2 }, order);
            for (entry, value_offset) in entries.iter().zip(&value_offsets) {
                put(&mut data, entry.tag as u64, 2, order);
                put(&mut data, entry.field_type as u64, 2, order);
                put(&mut data, entry.count as u64, offset_size, order);
                match value_offset {
                    Some(offset) => put(&mut data, *offset, offset_size, order),
                    None => {
                        let mut bytes = entry.bytes(order);
                        bytes.resize(inline, 0);
                        data.extend_from_slice(&bytes);
                    }
                }
            }
            next_pointer = data.len();
            put(&mut data, 0, offset_size, order);

            built.push(BuiltImage {
                ifd_offset,
                block_offsets,
                block_counts,
            });
        }

        if self.cyclic {
            if let Some(first) = built.first() {
                patch(&mut data, next_pointer, first.ifd_offset, offset_size, order);
            }
        }

        BuiltTiff {
            data,
            images: built,
        }
    }
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Directory entries
// =============================================================================

struct Entry {
    tag: u16,
    field_type: u16,
    count: usize,
    values: EntryValues,
}

enum EntryValues {
    Ints(Vec<u64>, usize),
    Doubles(Vec<f64>),
    Ascii(Vec<u8>),
}

impl Entry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: 3,
            count: values.len(),
            values: EntryValues::Ints(values.iter().map(|&v| v as u64).collect(), 2),
        }
    }

    fn longs(tag: u16, values: &[u64]) -> Self {
        Self {
            tag,
            field_type: 4,
            count: values.len(),
            values: EntryValues::Ints(values.to_vec(), 4),
        }
    }

    fn long8s(tag: u16, values: &[u64]) -> Self {
        Self {
            tag,
            field_type: 16,
            count: values.len(),
            values: EntryValues::Ints(values.to_vec(), 8),
        }
    }

    fn from_tag(tag: u16, data: &TagData) -> Self {
        match data {
            TagData::Short(v) => Self::shorts(tag, v),
            TagData::Long(v) => {
                Self::longs(tag, &v.iter().map(|&x| x as u64).collect::<Vec<_>>())
            }
            TagData::Double(v) => Self {
                tag,
                field_type: 12,
                count: v.len(),
                values: EntryValues::Doubles(v.clone()),
            },
            TagData::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                Self {
                    tag,
                    field_type: 2,
                    count: bytes.len(),
                    values: EntryValues::Ascii(bytes),
                }
            }
        }
    }

    fn bytes(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.values {
            EntryValues::Ints(values, size) => {
                for &v in values {
                    put(&mut out, v, *size, order);
                }
            }
            EntryValues::Doubles(values) => {
                for &v in values {
                    put(&mut out, v.to_bits(), 8, order);
                }
            }
            EntryValues::Ascii(bytes) => out.extend_from_slice(bytes),
        }
        out
    }
}

// =============================================================================
// Byte helpers
// =============================================================================

/// Append the low `size` bytes of `value` in `order`.
pub fn put(out: &mut Vec<u8>, value: u64, size: usize, order: ByteOrder) {
    let le = value.to_le_bytes();
    match order {
        ByteOrder::LittleEndian => out.extend_from_slice(&le[..size]),
        ByteOrder::BigEndian => out.extend(le[..size].iter().rev()),
    }
}

fn patch(data: &mut [u8], at: usize, value: u64, size: usize, order: ByteOrder) {
    let mut bytes = Vec::with_capacity(size);
    put(&mut bytes, value, size, order);
    data[at..at + size].copy_from_slice(&bytes);
}
