//! Image selection across internal and external overviews.

use std::sync::Arc;

use geotiff_stream::{
    GeoTiff, GeoTiffError, GeoTiffSource, MultiGeoTiff, OpenOptions, ReadRasterOptions, Window,
};

use super::test_utils::{ImageSpec, TiffBuilder, TrackingReader};

const ORIGIN: (f64, f64) = (1000.0, 2000.0);
const PIXEL: f64 = 10.0;

async fn open(reader: &TrackingReader) -> GeoTiff {
    GeoTiff::from_reader(Arc::new(reader.clone()), OpenOptions::default())
        .await
        .unwrap()
}

fn reduced_value(x: u32, y: u32, _: usize) -> f64 {
    (x + y + 100) as f64
}

/// 64x64 georeferenced image with an internal 32x32 overview.
fn main_file() -> TiffBuilder {
    TiffBuilder::new()
        .add_image(ImageSpec::tiled(64, 64, 16, 16).georeferenced(ORIGIN.0, ORIGIN.1, PIXEL))
        .add_image(
            ImageSpec::tiled(32, 32, 16, 16)
                .reduced()
                .values(reduced_value),
        )
}

/// External overview file with 16x16 and 8x8 images.
fn overview_file() -> TiffBuilder {
    TiffBuilder::new()
        .add_image(ImageSpec::tiled(16, 16, 16, 16).values(|_, _, _| 16.0))
        .add_image(ImageSpec::tiled(8, 8, 8, 8).reduced().values(|_, _, _| 8.0))
}

async fn pyramid() -> MultiGeoTiff {
    let main = open(&main_file().build().reader()).await;
    let overviews = open(&overview_file().build().reader()).await;
    MultiGeoTiff::new(main, vec![overviews])
}

// =============================================================================
// Index mapping
// =============================================================================

#[tokio::test]
async fn test_flat_indices_span_files() {
    let multi = pyramid().await;

    assert_eq!(multi.get_image_count().await.unwrap(), 4);
    let widths = [64, 32, 16, 8];
    for (index, width) in widths.into_iter().enumerate() {
        assert_eq!(multi.get_image(index).await.unwrap().width(), width);
    }

    let err = multi.get_image(4).await.unwrap_err();
    assert!(matches!(
        err,
        GeoTiffError::ImageIndexOutOfRange { index: 4, count: 4 }
    ));
}

#[tokio::test]
async fn test_counts_resolved_on_first_use() {
    let built = main_file().build();
    let reader = built.reader();
    let main = open(&reader).await;
    let second_ifd = built.images[1].ifd_offset;
    assert_eq!(reader.requests_at(&[second_ifd]), 0);

    let overviews = open(&overview_file().build().reader()).await;
    let multi = MultiGeoTiff::new(main, vec![overviews]);
    assert_eq!(reader.requests_at(&[second_ifd]), 0);

    multi.get_image(0).await.unwrap();
    assert_eq!(reader.requests_at(&[second_ifd]), 1);
    assert_eq!(multi.overviews().len(), 1);
}

// =============================================================================
// Best image selection
// =============================================================================

#[tokio::test]
async fn test_resolution_picks_coarsest_sufficient_image() {
    let multi = pyramid().await;

    let rasters = multi
        .read_rasters(&ReadRasterOptions::new().resolution(40.0, 40.0))
        .await
        .unwrap();
    assert_eq!((rasters.width, rasters.height), (16, 16));
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), vec![16.0; 256]);

    // Finer than everything: the full resolution image
    let rasters = multi
        .read_rasters(&ReadRasterOptions::new().resolution(1.0, 1.0))
        .await
        .unwrap();
    assert_eq!(rasters.width, 64);
}

#[tokio::test]
async fn test_output_size_picks_image_then_resamples() {
    let multi = pyramid().await;

    let exact = multi
        .read_rasters(&ReadRasterOptions::new().size(8, 8))
        .await
        .unwrap();
    assert_eq!(exact.bands().unwrap()[0].to_f64_vec(), vec![8.0; 64]);

    // 32 model units per pixel: the 32x32 overview, resampled to 20x20
    let resampled = multi
        .read_rasters(&ReadRasterOptions::new().size(20, 20))
        .await
        .unwrap();
    assert_eq!((resampled.width, resampled.height), (20, 20));
    let values = resampled.bands().unwrap()[0].to_f64_vec();
    assert!(values.iter().all(|v| *v >= 100.0));
}

#[tokio::test]
async fn test_bbox_becomes_window_of_chosen_image() {
    let multi = pyramid().await;
    // Upper left quarter of the main image
    let bbox = [1000.0, 1680.0, 1320.0, 2000.0];

    let full_res = multi
        .read_rasters(&ReadRasterOptions::new().bbox(bbox))
        .await
        .unwrap();
    assert_eq!((full_res.width, full_res.height), (32, 32));
    let first = full_res.bands().unwrap()[0].to_f64_vec();
    assert_eq!(first[0], 0.0);
    assert_eq!(first[32 + 1], 4.0);

    let overview = multi
        .read_rasters(&ReadRasterOptions::new().bbox(bbox).resolution(20.0, 20.0))
        .await
        .unwrap();
    assert_eq!((overview.width, overview.height), (16, 16));
    let want: Vec<f64> = (0..16)
        .flat_map(|y| (0..16).map(move |x| reduced_value(x, y, 0)))
        .collect();
    assert_eq!(overview.bands().unwrap()[0].to_f64_vec(), want);
}

#[tokio::test]
async fn test_single_file_uses_internal_overviews() {
    let tiff = open(&main_file().build().reader()).await;
    let rasters = tiff
        .read_rasters(&ReadRasterOptions::new().size(32, 32))
        .await
        .unwrap();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec()[0], 100.0);
}

#[tokio::test]
async fn test_mask_images_are_skipped() {
    let reader = TiffBuilder::new()
        .add_image(ImageSpec::tiled(32, 32, 16, 16))
        .add_image(ImageSpec::tiled(16, 16, 16, 16).mask().values(|_, _, _| 250.0))
        .add_image(ImageSpec::tiled(8, 8, 8, 8).reduced().values(|_, _, _| 7.0))
        .build()
        .reader();
    let tiff = open(&reader).await;

    let rasters = tiff
        .read_rasters(&ReadRasterOptions::new().size(16, 16))
        .await
        .unwrap();
    let main = ImageSpec::tiled(32, 32, 16, 16);
    let want: Vec<f64> = (0..16)
        .flat_map(|y| (0..16).map(move |x| (x, y)))
        .map(|(x, y)| main.value(x * 2, y * 2, 0))
        .collect();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), want);
}

// =============================================================================
// Option conflicts and missing georeferencing
// =============================================================================

#[tokio::test]
async fn test_conflicting_options() {
    let multi = pyramid().await;

    let both = ReadRasterOptions::new()
        .window(Window::new(0, 0, 4, 4))
        .bbox([1000.0, 1900.0, 1100.0, 2000.0]);
    assert!(matches!(
        multi.read_rasters(&both).await,
        Err(GeoTiffError::InvalidReadOptions(_))
    ));

    let mut width_and_res = ReadRasterOptions::new().resolution(20.0, 20.0);
    width_and_res.width = Some(10);
    assert!(matches!(
        multi.read_rasters(&width_and_res).await,
        Err(GeoTiffError::InvalidReadOptions(_))
    ));
}

#[tokio::test]
async fn test_pixel_frame_without_georeferencing() {
    let tiff = open(&overview_file().build().reader()).await;

    let err = tiff
        .read_rasters(&ReadRasterOptions::new().bbox([0.0, 0.0, 4.0, 4.0]))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoTiffError::NoAffineTransformation));

    let err = tiff
        .read_rasters(&ReadRasterOptions::new().resolution(2.0, 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoTiffError::NoAffineTransformation));

    // Sizes still work on the pixel grid
    let rasters = tiff
        .read_rasters(&ReadRasterOptions::new().size(8, 8))
        .await
        .unwrap();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), vec![8.0; 64]);
}

#[tokio::test]
async fn test_plain_window_reads_first_image() {
    let multi = pyramid().await;
    let rasters = multi
        .read_rasters(&ReadRasterOptions::new().window(Window::new(60, 60, 68, 62)).fill_value(1.0))
        .await
        .unwrap();
    assert_eq!((rasters.width, rasters.height), (8, 2));
    let values = rasters.bands().unwrap()[0].to_f64_vec();
    assert_eq!(values[4], 1.0);
    assert_eq!(values[0], ((60 + 180) % 251) as f64);
}
