//! Decoder registry, decode pool and the built-in compression codecs.
//!
//! Decoding a block is a fixed pipeline run by [`DecodeTask::run`]:
//!
//! 1. The registered [`Decoder`] decompresses the bytes
//! 2. The predictor, if any, is reverted
//! 3. Samples are normalized to little-endian native widths
//!
//! The codec modules are public so callers can reuse them when registering
//! their own factories.

pub mod deflate;
pub mod jpeg;
pub mod lzw;
pub mod packbits;
pub mod raw;

mod normalize;
mod pool;
mod predictor;
mod registry;

pub use normalize::{native_width, normalize};
pub use pool::{default_worker_count, DecodePool, DecodeTask};
pub use predictor::{revert as revert_predictor, RowLayout};
pub use registry::{stateless, Decoder, DecoderFactory, DecoderParams, DecoderRegistry};
