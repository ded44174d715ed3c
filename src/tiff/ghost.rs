//! GDAL "ghost area": structural metadata written right after the header of
//! cloud-optimized files.
//!
//! ```text
//! GDAL_STRUCTURAL_METADATA_SIZE=000140 bytes
//! LAYOUT=IFDS_BEFORE_DATA
//! BLOCK_ORDER=ROW_MAJOR
//! ...
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::parser::TiffHeader;
use crate::error::GeoTiffError;
use crate::io::{AbortSignal, RangeReader};

const DETECTION: &str = "GDAL_STRUCTURAL_METADATA_SIZE=";

/// Bytes fetched on the first probe.
const HEURISTIC_AREA_SIZE: usize = DETECTION.len() + 100;

/// One ghost value. Purely numeric values are kept as numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GhostValue {
    Number(f64),
    Text(String),
}

impl GhostValue {
    fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if !raw.trim().is_empty() => GhostValue::Number(n),
            _ => GhostValue::Text(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GhostValue::Text(s) => Some(s),
            GhostValue::Number(_) => None,
        }
    }
}

pub type GhostValues = BTreeMap<String, GhostValue>;

/// Parse the newline-delimited `key=value` block.
///
/// Text stops at the first NUL byte; lines without `=` are skipped.
pub fn parse_ghost_text(text: &str) -> GhostValues {
    let text = text.split('\0').next().unwrap_or_default();
    text.split('\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), GhostValue::parse(value)))
        .collect()
}

/// Declared size of the block after the first line, from `000140 bytes`.
fn declared_size(first_line: &str) -> Option<usize> {
    let value = first_line.split_once('=')?.1;
    value.split(' ').next()?.trim().parse().ok()
}

/// Probe for a ghost area right after the header.
///
/// Returns `Ok(None)` when the signature is absent; only fetch failures are errors.
pub async fn read_ghost_area(
    reader: &dyn RangeReader,
    header: &TiffHeader,
    signal: Option<&AbortSignal>,
) -> Result<Option<GhostValues>, GeoTiffError> {
    let offset = header.header_size() as u64;
    let available = reader.size().saturating_sub(offset);
    let probe_len = HEURISTIC_AREA_SIZE.min(available as usize);
    if probe_len < DETECTION.len() {
        return Ok(None);
    }

    let mut data = reader.fetch(offset, probe_len, signal).await?;
    if !data.starts_with(DETECTION.as_bytes()) {
        return Ok(None);
    }

    let probe = String::from_utf8_lossy(&data).into_owned();
    let first_line = probe.split('\n').next().unwrap_or_default();
    let Some(size) = declared_size(first_line) else {
        warn!(source = reader.identifier(), "unreadable ghost area size: {first_line:?}");
        return Ok(None);
    };

    let total = (size + first_line.len()).min(available as usize);
    if total > data.len() {
        data = reader.fetch(offset, total, signal).await?;
    }

    let text = String::from_utf8_lossy(&data[..total.min(data.len())]).into_owned();
    let values = parse_ghost_text(&text);
    debug!(source = reader.identifier(), keys = values.len(), "parsed ghost area");
    Ok(Some(values))
}
