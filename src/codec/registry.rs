//! Mapping from compression code to decoder.
//!
//! A [`DecoderFactory`] is looked up once per image and builds a [`Decoder`]
//! from that image's parameters; the decoder is then shared by every tile
//! of the image.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use super::{deflate, jpeg, lzw, packbits, raw};
use crate::error::DecodeError;
use crate::io::ByteOrder;
use crate::tiff::{compression, PLANAR_SEPARATE};

/// Per-image parameters handed to decoder factories and the decode pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderParams {
    pub compression: u16,
    /// One entry per sample of the pixel
    pub bits_per_sample: Vec<u16>,
    /// One entry per sample of the pixel
    pub sample_format: Vec<u16>,
    pub predictor: u16,
    /// Block width; the image width for strips
    pub tile_width: u32,
    /// Block height; rows per strip for strips
    pub tile_height: u32,
    pub samples_per_pixel: u16,
    pub planar_configuration: u16,
    pub byte_order: ByteOrder,
    pub photometric_interpretation: Option<u16>,
    /// Shared JPEG tables for abbreviated streams
    pub jpeg_tables: Option<Bytes>,
}

impl DecoderParams {
    /// Bits of each sample stored in one block: all samples for chunky
    /// images, only `sample` for planar ones.
    pub fn block_bits(&self, sample: usize) -> Vec<u16> {
        if self.planar_configuration == PLANAR_SEPARATE {
            self.bits_per_sample.get(sample).copied().into_iter().collect()
        } else {
            self.bits_per_sample.clone()
        }
    }

    /// Sample formats of the samples stored in one block.
    pub fn block_formats(&self, sample: usize) -> Vec<u16> {
        if self.planar_configuration == PLANAR_SEPARATE {
            self.sample_format.get(sample).copied().into_iter().collect()
        } else {
            self.sample_format.clone()
        }
    }
}

/// Turns one compressed block into raw sample bytes in file byte order.
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

/// Builds a decoder for one image.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, params: &DecoderParams) -> Result<Arc<dyn Decoder>, DecodeError>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&DecoderParams) -> Result<Arc<dyn Decoder>, DecodeError> + Send + Sync,
{
    fn create(&self, params: &DecoderParams) -> Result<Arc<dyn Decoder>, DecodeError> {
        self(params)
    }
}

/// Registry of decoder factories keyed by compression code.
///
/// Registration replaces any previous factory for the same code.
pub struct DecoderRegistry {
    factories: RwLock<HashMap<u16, Arc<dyn DecoderFactory>>>,
}

impl DecoderRegistry {
    /// A registry without any decoders.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in codecs.
    ///
    /// | Code | Codec |
    /// |---|---|
    /// | 1 | none |
    /// | 5 | LZW |
    /// | 6, 7 | JPEG |
    /// | 8, 32946 | Deflate |
    /// | 32773 | PackBits |
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(compression::NONE, stateless(|| raw::RawDecoder));
        registry.register(compression::LZW, stateless(|| lzw::LzwDecoder));
        registry.register(compression::DEFLATE, stateless(|| deflate::DeflateDecoder));
        registry.register(compression::ADOBE_DEFLATE, stateless(|| deflate::DeflateDecoder));
        registry.register(compression::PACKBITS, stateless(|| packbits::PackBitsDecoder));
        registry.register(compression::JPEG, jpeg::factory);
        registry.register(compression::OLD_JPEG, jpeg::factory);
        registry
    }

    pub fn register(&self, code: u16, factory: impl DecoderFactory + 'static) {
        self.register_arc(code, Arc::new(factory));
    }

    pub fn register_arc(&self, code: u16, factory: Arc<dyn DecoderFactory>) {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(code, factory);
    }

    pub fn lookup(&self, code: u16) -> Option<Arc<dyn DecoderFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&code)
            .cloned()
    }

    /// Registered codes in ascending order.
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        codes.sort_unstable();
        codes
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("codes", &self.codes())
            .finish()
    }
}

/// Factory for decoders that ignore the image parameters.
pub fn stateless<D, F>(make: F) -> impl DecoderFactory
where
    D: Decoder + 'static,
    F: Fn() -> D + Send + Sync,
{
    move |_: &DecoderParams| -> Result<Arc<dyn Decoder>, DecodeError> { Ok(Arc::new(make())) }
}
