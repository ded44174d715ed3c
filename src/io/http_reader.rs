use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// HTTP(S) implementation of RangeReader using `Range` requests.
///
/// The resource size is discovered once on creation, from a HEAD request or,
/// when the server omits `Content-Length`, from the `Content-Range` of a
/// one-byte ranged GET. Servers that ignore `Range` and answer `200` with the
/// full body are tolerated by slicing the response.
#[derive(Clone)]
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
}

impl HttpRangeReader {
    pub async fn new(client: Client, url: impl Into<String>) -> Result<Self, IoError> {
        let url = url.into();

        let head = client
            .head(&url)
            .send()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", url, e)))?;
        check_status(head.status(), &url)?;

        let size = match header_u64(head.headers().get(CONTENT_LENGTH)) {
            Some(size) if size > 0 => size,
            _ => probe_size(&client, &url).await?,
        };

        debug!(url = %url, size, "opened HTTP source");

        Ok(Self { client, url, size })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), IoError> {
    if status == StatusCode::NOT_FOUND {
        return Err(IoError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(IoError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(())
}

fn header_u64(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    value?.to_str().ok()?.trim().parse().ok()
}

/// Parse the total length out of `bytes 0-0/12345`.
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

async fn probe_size(client: &Client, url: &str) -> Result<u64, IoError> {
    let resp = client
        .get(url)
        .header(RANGE, "bytes=0-0")
        .send()
        .await
        .map_err(|e| IoError::Connection(format!("{}: {}", url, e)))?;
    check_status(resp.status(), url)?;

    if let Some(total) = resp
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(content_range_total)
    {
        return Ok(total);
    }

    // No range support: the body is the whole resource.
    let body = resp
        .bytes()
        .await
        .map_err(|e| IoError::Connection(format!("{}: {}", url, e)))?;
    Ok(body.len() as u64)
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        trace!(url = %self.url, %range, "HTTP range request");

        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", self.url, e)))?;

        let status = resp.status();
        check_status(status, &self.url)?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", self.url, e)))?;

        let data = if status == StatusCode::PARTIAL_CONTENT {
            body
        } else {
            let start = offset as usize;
            if body.len() < start + len {
                return Err(IoError::Connection(format!(
                    "{}: full response of {} bytes is shorter than requested range",
                    self.url,
                    body.len()
                )));
            }
            body.slice(start..start + len)
        };

        if data.len() != len {
            return Err(IoError::Connection(format!(
                "{}: expected {} bytes, got {}",
                self.url,
                len,
                data.len()
            )));
        }
        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}
