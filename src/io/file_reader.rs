use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// Local file implementation of RangeReader.
///
/// The handle is opened once and shared behind a mutex; every read seeks to
/// its offset first. [`close`](RangeReader::close) drops the handle, after
/// which reads fail with `IoError::Closed`.
pub struct FileRangeReader {
    file: Mutex<Option<File>>,
    path: PathBuf,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open `path` and record its size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = format!("file://{}", path.display());

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(identifier.clone()),
            _ => IoError::Connection(format!("{}: {}", identifier, e)),
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", identifier, e)))?
            .len();

        debug!(path = %path.display(), size, "opened local file");

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            size,
            identifier,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| IoError::Closed(self.identifier.clone()))?;

        let io_err = |e: std::io::Error| IoError::Connection(format!("{}: {}", self.identifier, e));
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(io_err)?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn close(&self) -> Result<(), IoError> {
        if self.file.lock().await.take().is_some() {
            debug!(path = %self.path.display(), "closed local file");
        }
        Ok(())
    }
}
