use async_trait::async_trait;
use bytes::Bytes;

use super::abort::{with_signal, AbortSignal};
use crate::error::IoError;

/// Trait for reading byte ranges from a file-like resource.
///
/// This abstraction lets the directory parser and the tile reader work with
/// files without downloading them entirely. Implementations must accept
/// concurrent, overlapping and out-of-order calls.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and errors).
    fn identifier(&self) -> &str;

    /// Read a range, giving up as soon as `signal` fires.
    async fn fetch(
        &self,
        offset: u64,
        len: usize,
        signal: Option<&AbortSignal>,
    ) -> Result<Bytes, IoError> {
        with_signal(signal, || IoError::Aborted, self.read_exact_at(offset, len)).await
    }

    /// Release underlying handles. Later reads may fail with `IoError::Closed`.
    async fn close(&self) -> Result<(), IoError> {
        Ok(())
    }
}

/// Check that `offset + len` stays inside a resource of `size` bytes.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}
