//! Byte-range sources and the primitives layered on them.

mod abort;
mod block_cache;
mod cursor;
mod file_reader;
mod http_reader;
mod memory_reader;
mod range_reader;
mod s3_reader;

pub use abort::{with_signal, AbortController, AbortSignal};
pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use cursor::{ByteCursor, ByteOrder};
pub use file_reader::FileRangeReader;
pub use http_reader::HttpRangeReader;
pub use memory_reader::MemoryReader;
pub use range_reader::RangeReader;
pub use s3_reader::{create_s3_client, parse_s3_url, S3RangeReader};
