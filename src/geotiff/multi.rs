//! Main file plus external overview files addressed as one image sequence.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::base::GeoTiffSource;
use super::container::GeoTiff;
use super::image::GeoTiffImage;
use super::open::OpenOptions;
use crate::error::{GeoTiffError, Result};
use crate::io::with_signal;

/// A GeoTIFF whose overviews live in separate files (`.tif` + `.tif.ovr`).
///
/// Image indices run through the main file first, then each overview file in
/// order. Per-file image counts are resolved on first access.
#[derive(Debug)]
pub struct MultiGeoTiff {
    files: Vec<GeoTiff>,
    counts: OnceCell<Vec<usize>>,
}

impl MultiGeoTiff {
    pub fn new(main: GeoTiff, overviews: Vec<GeoTiff>) -> Self {
        let mut files = Vec::with_capacity(overviews.len() + 1);
        files.push(main);
        files.extend(overviews);
        Self {
            files,
            counts: OnceCell::new(),
        }
    }

    /// Open the main file and every overview file with shared options.
    pub async fn from_urls<S: AsRef<str>>(
        main: &str,
        overviews: &[S],
        options: OpenOptions,
    ) -> Result<Self> {
        let signal = options.signal.clone();
        with_signal(signal.as_ref(), || GeoTiffError::Aborted, async {
            let main = GeoTiff::open(main, options.clone()).await?;
            let mut files = Vec::with_capacity(overviews.len());
            for location in overviews {
                files.push(GeoTiff::open(location.as_ref(), options.clone()).await?);
            }
            Ok(Self::new(main, files))
        })
        .await
    }

    pub fn main(&self) -> &GeoTiff {
        &self.files[0]
    }

    pub fn overviews(&self) -> &[GeoTiff] {
        &self.files[1..]
    }

    async fn counts(&self) -> Result<&[usize]> {
        let counts = self
            .counts
            .get_or_try_init(|| async {
                let mut counts = Vec::with_capacity(self.files.len());
                for file in &self.files {
                    counts.push(file.get_image_count().await?);
                }
                debug!(?counts, "resolved image counts");
                Ok::<_, GeoTiffError>(counts)
            })
            .await?;
        Ok(counts)
    }

    /// Map a flat index to `(file, local index)`.
    async fn locate(&self, index: usize) -> Result<(usize, usize)> {
        let counts = self.counts().await?;
        let mut local = index;
        for (file, &count) in counts.iter().enumerate() {
            if local < count {
                return Ok((file, local));
            }
            local -= count;
        }
        Err(GeoTiffError::ImageIndexOutOfRange {
            index,
            count: counts.iter().sum(),
        })
    }
}

#[async_trait]
impl GeoTiffSource for MultiGeoTiff {
    async fn get_image(&self, index: usize) -> Result<GeoTiffImage> {
        let (file, local) = self.locate(index).await?;
        self.files[file].get_image(local).await
    }

    async fn get_image_count(&self) -> Result<usize> {
        Ok(self.counts().await?.iter().sum())
    }

    async fn close(&self) -> Result<()> {
        for file in &self.files {
            file.close().await?;
        }
        Ok(())
    }

    /// Reduced images of the main file plus every non-mask image of the
    /// overview files.
    async fn resolution_candidates(&self) -> Result<Vec<GeoTiffImage>> {
        let counts = self.counts().await?.to_vec();
        let mut candidates = Vec::new();
        for (file, count) in counts.into_iter().enumerate() {
            for local in 0..count {
                let image = self.files[file].get_image(local).await?;
                let eligible = if file == 0 {
                    local == 0 || image.is_reduced_resolution()
                } else {
                    !image.is_mask()
                };
                if eligible {
                    candidates.push(image);
                }
            }
        }
        Ok(candidates)
    }
}
