//! Operations shared by single-file and multi-file containers.
//!
//! Georeferenced reads (`bbox`, `res_x`/`res_y`, or an output size) pick the
//! image of the pyramid that best matches the request and translate the
//! request into a pixel window of that image.

use async_trait::async_trait;
use tracing::debug;

use super::container::GeoTiff;
use super::image::GeoTiffImage;
use crate::error::{GeoTiffError, Result};
use crate::io::with_signal;
use crate::raster::{Rasters, ReadRasterOptions, Window};

/// An image lets a request through when its pixel size is within this factor
/// of the requested one.
const RESOLUTION_TOLERANCE: f64 = 0.99;

// =============================================================================
// GeoTiffSource Trait
// =============================================================================

/// Container API shared by [`GeoTiff`] and
/// [`MultiGeoTiff`](super::MultiGeoTiff).
#[async_trait]
pub trait GeoTiffSource: Send + Sync {
    /// The image at flat index `index`.
    async fn get_image(&self, index: usize) -> Result<GeoTiffImage>;

    /// Total number of images.
    async fn get_image_count(&self) -> Result<usize>;

    /// Release owned sources.
    async fn close(&self) -> Result<()>;

    /// Images eligible for resolution-based selection: the first image plus
    /// every reduced-resolution image.
    async fn resolution_candidates(&self) -> Result<Vec<GeoTiffImage>> {
        let count = self.get_image_count().await?;
        let mut candidates = Vec::with_capacity(count);
        for index in 0..count {
            let image = self.get_image(index).await?;
            if index == 0 || image.is_reduced_resolution() {
                candidates.push(image);
            }
        }
        Ok(candidates)
    }

    /// Read rasters from the image best matching `options`.
    async fn read_rasters(&self, options: &ReadRasterOptions) -> Result<Rasters> {
        let signal = options.signal.clone();
        let (image, options) = with_signal(
            signal.as_ref(),
            || GeoTiffError::Aborted,
            plan_read(self, options),
        )
        .await?;
        image.read_rasters(&options).await
    }
}

#[async_trait]
impl GeoTiffSource for GeoTiff {
    async fn get_image(&self, index: usize) -> Result<GeoTiffImage> {
        GeoTiff::get_image(self, index).await
    }

    async fn get_image_count(&self) -> Result<usize> {
        GeoTiff::get_image_count(self).await
    }

    async fn close(&self) -> Result<()> {
        GeoTiff::close(self).await
    }
}

// =============================================================================
// Read planning
// =============================================================================

/// Reference frame of the first image used to convert between pixel windows
/// and model coordinates.
struct Frame {
    origin: [f64; 2],
    resolution: [f64; 2],
    bbox: [f64; 4],
    georeferenced: bool,
}

impl Frame {
    /// Georeferenced frame, or the pixel grid of `first` when the image
    /// carries no affine transformation.
    fn of(first: &GeoTiffImage) -> Result<Self> {
        let georeferenced = (|| {
            let [ox, oy, _] = first.origin()?;
            let [rx, ry, _] = first.resolution(None)?;
            Ok::<_, GeoTiffError>(Frame {
                origin: [ox, oy],
                resolution: [rx, ry],
                bbox: first.bounding_box()?,
                georeferenced: true,
            })
        })();
        match georeferenced {
            Ok(frame) => Ok(frame),
            Err(GeoTiffError::NoAffineTransformation) => Ok(Frame {
                origin: [0.0, 0.0],
                resolution: [1.0, 1.0],
                bbox: [0.0, 0.0, first.width() as f64, first.height() as f64],
                georeferenced: false,
            }),
            Err(e) => Err(e),
        }
    }

    fn window_to_bbox(&self, window: &Window) -> [f64; 4] {
        let [ox, oy] = self.origin;
        let [rx, ry] = self.resolution;
        let x0 = ox + window.x0 as f64 * rx;
        let y0 = oy + window.y0 as f64 * ry;
        let x1 = ox + window.x1 as f64 * rx;
        let y1 = oy + window.y1 as f64 * ry;
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    /// Pixel size of `image` in this frame.
    fn resolution_of(&self, image: &GeoTiffImage, first: &GeoTiffImage) -> Result<[f64; 2]> {
        if self.georeferenced {
            let [rx, ry, _] = image.resolution(Some(first))?;
            return Ok([rx, ry]);
        }
        Ok([
            first.width() as f64 / image.width() as f64,
            first.height() as f64 / image.height() as f64,
        ])
    }

    fn bbox_to_window(&self, bbox: &[f64; 4], resolution: [f64; 2]) -> Window {
        let [ox, oy] = self.origin;
        let [rx, ry] = resolution;
        let x0 = ((bbox[0] - ox) / rx).round() as i64;
        let y0 = ((bbox[1] - oy) / ry).round() as i64;
        let x1 = ((bbox[2] - ox) / rx).round() as i64;
        let y1 = ((bbox[3] - oy) / ry).round() as i64;
        Window::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Index into `sizes` of the coarsest image whose pixel size still satisfies
/// the requested resolution; the finest image when none does.
///
/// `sizes` are image `(width, height)` pairs covering `extent` model units.
pub fn select_best_image(
    sizes: &[(u32, u32)],
    extent: (f64, f64),
    res_x: Option<f64>,
    res_y: Option<f64>,
) -> Option<usize> {
    let pixel_size = |&(w, h): &(u32, u32)| (extent.0 / w as f64, extent.1 / h as f64);
    let satisfies = |size: &(u32, u32)| {
        let (px, py) = pixel_size(size);
        res_x.map_or(true, |r| px * RESOLUTION_TOLERANCE <= r)
            && res_y.map_or(true, |r| py * RESOLUTION_TOLERANCE <= r)
    };

    let coarsest = sizes
        .iter()
        .enumerate()
        .filter(|(_, size)| satisfies(size))
        .min_by_key(|(_, &(w, h))| (w as u64) * (h as u64))
        .map(|(i, _)| i);

    coarsest.or_else(|| {
        sizes
            .iter()
            .enumerate()
            .max_by_key(|(_, &(w, h))| (w as u64) * (h as u64))
            .map(|(i, _)| i)
    })
}

/// Choose the image for `options` and rewrite them as a pixel read on it.
async fn plan_read<S>(
    source: &S,
    options: &ReadRasterOptions,
) -> Result<(GeoTiffImage, ReadRasterOptions)>
where
    S: GeoTiffSource + ?Sized,
{
    if options.window.is_some() && options.bbox.is_some() {
        return Err(GeoTiffError::InvalidReadOptions(
            "window and bbox cannot be combined".into(),
        ));
    }
    if options.width.is_some() && options.res_x.is_some() {
        return Err(GeoTiffError::InvalidReadOptions(
            "width and res_x cannot be combined".into(),
        ));
    }
    if options.height.is_some() && options.res_y.is_some() {
        return Err(GeoTiffError::InvalidReadOptions(
            "height and res_y cannot be combined".into(),
        ));
    }

    let first = source.get_image(0).await?;
    let sized = options.width.is_some() || options.height.is_some();
    let by_resolution = options.res_x.is_some() || options.res_y.is_some();
    if !sized && !by_resolution && options.bbox.is_none() {
        return Ok((first, options.clone()));
    }

    let frame = Frame::of(&first)?;
    if !frame.georeferenced && (options.bbox.is_some() || by_resolution) {
        return Err(GeoTiffError::NoAffineTransformation);
    }

    let mut bbox = options.bbox.map(|b| [b[0].min(b[2]), b[1].min(b[3]), b[0].max(b[2]), b[1].max(b[3])]);
    let mut res_x = options.res_x.map(f64::abs);
    let mut res_y = options.res_y.map(f64::abs);
    if sized {
        if let Some(window) = &options.window {
            window.validate()?;
            bbox = Some(frame.window_to_bbox(window));
        }
        let used = bbox.unwrap_or(frame.bbox);
        if let Some(width) = options.width.filter(|&w| w > 0) {
            res_x = Some((used[2] - used[0]) / width as f64);
        }
        if let Some(height) = options.height.filter(|&h| h > 0) {
            res_y = Some((used[3] - used[1]) / height as f64);
        }
    }

    let image = if res_x.is_some() || res_y.is_some() {
        let candidates = source.resolution_candidates().await?;
        let sizes: Vec<(u32, u32)> = candidates.iter().map(|i| (i.width(), i.height())).collect();
        let extent = (frame.bbox[2] - frame.bbox[0], frame.bbox[3] - frame.bbox[1]);
        let chosen = select_best_image(&sizes, extent, res_x, res_y).unwrap_or(0);
        candidates.into_iter().nth(chosen).unwrap_or_else(|| first.clone())
    } else {
        first.clone()
    };

    let mut planned = options.clone();
    planned.bbox = None;
    planned.res_x = None;
    planned.res_y = None;
    if let Some(bbox) = bbox {
        let resolution = frame.resolution_of(&image, &first)?;
        planned.window = Some(frame.bbox_to_window(&bbox, resolution));
    }

    debug!(
        width = image.width(),
        height = image.height(),
        window = ?planned.window,
        "selected image for read"
    );
    Ok((image, planned))
}
