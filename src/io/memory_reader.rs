use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// In-memory byte buffer served through the range interface.
///
/// Backs `GeoTiff::from_bytes` and blob-style inputs. Slicing is zero-copy.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    identifier: String,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_identifier(data, "memory://buffer")
    }

    pub fn with_identifier(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
