//! Decode pool: inline or worker-backed execution of decode tasks.
//!
//! Both strategies expose the same `decode(task).await`; callers never know
//! whether the work ran on their task or on a blocking worker thread. Worker
//! mode bounds concurrency with a semaphore and runs each task through
//! `spawn_blocking`, so CPU-heavy decompression stays off the async workers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::trace;

use super::normalize::normalize;
use super::predictor::{revert, RowLayout};
use super::registry::{Decoder, DecoderParams};
use crate::error::DecodeError;
use crate::io::ByteOrder;
use crate::tiff::PREDICTOR_NONE;

/// One compressed tile or strip plus everything needed to decode it.
#[derive(Clone)]
pub struct DecodeTask {
    pub data: Bytes,
    pub decoder: Arc<dyn Decoder>,
    pub params: Arc<DecoderParams>,
    /// Sample plane for planar images; ignored for chunky ones
    pub sample: usize,
}

impl DecodeTask {
    pub fn new(
        data: Bytes,
        decoder: Arc<dyn Decoder>,
        params: Arc<DecoderParams>,
        sample: usize,
    ) -> Self {
        Self {
            data,
            decoder,
            params,
            sample,
        }
    }

    /// Decompress, revert the predictor and normalize to little-endian
    /// native-width samples.
    pub fn run(&self) -> Result<Vec<u8>, DecodeError> {
        let params = &self.params;
        let bits = params.block_bits(self.sample);
        let formats = params.block_formats(self.sample);
        let width = params.tile_width as usize;

        let mut data = self.decoder.decode(&self.data)?;
        let mut byte_order = params.byte_order;

        if params.predictor != PREDICTOR_NONE {
            let first = bits.first().copied().unwrap_or(0);
            if bits.iter().any(|&b| b != first) {
                return Err(DecodeError::new(
                    params.compression,
                    "predictor requires the same bits per sample for every sample",
                ));
            }
            let layout = RowLayout {
                width,
                samples: bits.len(),
                bits: first,
                byte_order,
            };
            if revert(params.predictor, &mut data, layout, params.compression)? {
                byte_order = ByteOrder::LittleEndian;
            }
        }

        normalize(data, &bits, &formats, width, byte_order, params.compression)
    }
}

impl fmt::Debug for DecodeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeTask")
            .field("len", &self.data.len())
            .field("compression", &self.params.compression)
            .field("sample", &self.sample)
            .finish()
    }
}

#[derive(Clone)]
enum Strategy {
    Inline,
    Workers { permits: Arc<Semaphore>, size: usize },
}

/// Executes decode tasks either on the calling task or on a bounded set of
/// blocking workers.
#[derive(Clone)]
pub struct DecodePool {
    strategy: Strategy,
}

impl DecodePool {
    /// Decode on the calling task.
    pub fn inline() -> Self {
        Self {
            strategy: Strategy::Inline,
        }
    }

    /// Decode on up to `workers` blocking threads at once.
    ///
    /// `0` uses the available parallelism of the machine.
    pub fn with_workers(workers: usize) -> Self {
        let size = if workers == 0 {
            default_worker_count()
        } else {
            workers
        };
        Self {
            strategy: Strategy::Workers {
                permits: Arc::new(Semaphore::new(size)),
                size,
            },
        }
    }

    /// Number of workers, `0` for inline decoding.
    pub fn workers(&self) -> usize {
        match &self.strategy {
            Strategy::Inline => 0,
            Strategy::Workers { size, .. } => *size,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.strategy, Strategy::Inline)
    }

    pub async fn decode(&self, task: DecodeTask) -> Result<Bytes, DecodeError> {
        match &self.strategy {
            Strategy::Inline => task.run().map(Bytes::from),
            Strategy::Workers { permits, .. } => {
                let compression = task.params.compression;
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| DecodeError::new(compression, "decode pool is closed"))?;
                trace!(len = task.data.len(), compression, "dispatching decode to worker");

                let result = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    task.run()
                })
                .await
                .map_err(|e| DecodeError::new(compression, format!("decode worker failed: {}", e)))?;
                result.map(Bytes::from)
            }
        }
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::inline()
    }
}

impl fmt::Debug for DecodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodePool")
            .field("workers", &self.workers())
            .finish()
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
