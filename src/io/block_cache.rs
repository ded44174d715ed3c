use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Notify, RwLock};
use tracing::trace;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// Default block size: 64KB.
///
/// Enough to hold a typical COG header plus its first directories in one request.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (16MB with the default block size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 256;

/// Block-based caching layer that wraps any RangeReader.
///
/// Directory parsing issues many small reads at scattered offsets. Without
/// this layer each of them would become one request against the source.
///
/// Features:
/// - Fixed-size aligned blocks
/// - LRU eviction when the cache reaches capacity
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Reads spanning several blocks are stitched together
pub struct BlockCache {
    inner: Arc<dyn RangeReader>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: InFlight,
}

type InFlight = Mutex<HashMap<u64, Arc<Notify>>>;

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<u64, Arc<Notify>>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight marker for a block on completion, or when the leader
/// is dropped mid-fetch, and wakes every waiter.
struct LeaderGuard<'a> {
    in_flight: &'a InFlight,
    block_idx: u64,
    notify: Arc<Notify>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.in_flight).remove(&self.block_idx);
        self.notify.notify_waiters();
    }
}

impl BlockCache {
    /// Wrap a reader with the default block size and capacity.
    pub fn new(inner: Arc<dyn RangeReader>) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Wrap a reader with a custom block size and capacity.
    ///
    /// Zero values fall back to one byte blocks and a single cached block.
    pub fn with_capacity(inner: Arc<dyn RangeReader>, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently held.
    pub async fn cached_blocks(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Get a block from cache or fetch it from the underlying reader.
    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cache.write().await.get(&block_idx) {
                return Ok(data.clone());
            }

            let (notify, leader) = {
                let mut in_flight = lock_in_flight(&self.in_flight);
                match in_flight.get(&block_idx) {
                    Some(notify) => (notify.clone(), false),
                    None => {
                        let notify = Arc::new(Notify::new());
                        in_flight.insert(block_idx, notify.clone());
                        (notify, true)
                    }
                }
            };

            if !leader {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                // The leader may have finished between the map lookup and enable().
                let still_running = lock_in_flight(&self.in_flight)
                    .get(&block_idx)
                    .is_some_and(|current| Arc::ptr_eq(current, &notify));
                if still_running {
                    notified.await;
                }
                continue;
            }

            let _guard = LeaderGuard {
                in_flight: &self.in_flight,
                block_idx,
                notify,
            };

            let result = self.fetch_block_from_source(block_idx).await;
            if let Ok(ref data) = result {
                self.cache.write().await.put(block_idx, data.clone());
            }

            return result;
        }
    }

    async fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        trace!(source = self.inner.identifier(), block_idx, len, "fetching block");
        self.inner.read_exact_at(offset, len).await
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl RangeReader for BlockCache {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        if start_block == end_block {
            let block = self.get_block(start_block).await?;
            let block_offset = self.offset_within_block(offset);
            return Ok(block.slice(block_offset..block_offset + len));
        }

        let mut result = BytesMut::with_capacity(len);
        let mut remaining = len;
        let mut current_offset = offset;

        for block_idx in start_block..=end_block {
            let block = self.get_block(block_idx).await?;
            let block_offset = self.offset_within_block(current_offset);
            let bytes_in_block = std::cmp::min(block.len() - block_offset, remaining);

            result.extend_from_slice(&block[block_offset..block_offset + bytes_in_block]);

            remaining -= bytes_in_block;
            current_offset += bytes_in_block as u64;
        }

        Ok(result.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    async fn close(&self) -> Result<(), IoError> {
        self.cache.write().await.clear();
        self.inner.close().await
    }
}
