//! Request coalescing, tile caching and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use geotiff_stream::{
    AbortController, GeoTiff, GeoTiffError, GeoTiffSource, OpenOptions, ReadRasterOptions, Window,
};

use super::test_utils::{ImageSpec, TiffBuilder, TrackingReader};

const DELAY: Duration = Duration::from_millis(150);

async fn open_with(reader: &TrackingReader, options: OpenOptions) -> GeoTiff {
    GeoTiff::from_reader(Arc::new(reader.clone()), options)
        .await
        .unwrap()
}

fn image_spec() -> ImageSpec {
    ImageSpec::tiled(32, 32, 8, 8).deflate()
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_overlapping_reads_fetch_each_block_once() {
    let built = TiffBuilder::new().add_image(image_spec()).build();
    let reader = built.reader().with_delay(Duration::from_millis(20));
    let tiff = open_with(&reader, OpenOptions::default()).await;
    let image = tiff.get_image(0).await.unwrap();
    reader.reset_tracking();

    let left = ReadRasterOptions::new().window(Window::new(0, 0, 20, 32));
    let right = ReadRasterOptions::new().window(Window::new(12, 0, 32, 32));
    let again = ReadRasterOptions::new().window(Window::new(0, 0, 20, 32));
    let (a, b, c) = tokio::join!(
        image.read_rasters(&left),
        image.read_rasters(&right),
        image.read_rasters(&again),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a, c);
    assert_eq!(b.width, 20);

    // Every block of the 4x4 grid once, including the shared middle columns
    let offsets = &built.images[0].block_offsets;
    for offset in offsets {
        assert_eq!(reader.requests_at(&[*offset]), 1, "block at {offset}");
    }
    assert_eq!(tiff.cached_tiles(), 16);

    // Served from the tile cache afterwards
    reader.reset_tracking();
    image.read_rasters(&left).await.unwrap();
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_disabled_cache_still_coalesces() {
    let built = TiffBuilder::new().add_image(image_spec()).build();
    let reader = built.reader().with_delay(Duration::from_millis(20));
    let tiff = open_with(&reader, OpenOptions::default().cache(false)).await;
    assert!(!tiff.cache_enabled());
    let image = tiff.get_image(0).await.unwrap();
    reader.reset_tracking();

    let options = ReadRasterOptions::new();
    let (a, b) = tokio::join!(image.read_rasters(&options), image.read_rasters(&options));
    assert_eq!(a.unwrap(), b.unwrap());
    let offsets = &built.images[0].block_offsets;
    assert_eq!(reader.requests_at(offsets), 16);
    assert_eq!(tiff.cached_tiles(), 0);

    // Nothing was kept, so a later read fetches again
    image.read_rasters(&options).await.unwrap();
    assert_eq!(reader.requests_at(offsets), 32);
}

#[tokio::test]
async fn test_concurrent_get_image_parses_each_directory_once() {
    let built = TiffBuilder::new()
        .add_image(ImageSpec::tiled(32, 32, 16, 16))
        .add_image(ImageSpec::tiled(16, 16, 16, 16).reduced())
        .add_image(ImageSpec::tiled(8, 8, 8, 8).reduced())
        .build();
    let reader = built.reader().with_delay(Duration::from_millis(10));
    let tiff = open_with(&reader, OpenOptions::default()).await;

    let (a, b, count) = tokio::join!(tiff.get_image(2), tiff.get_image(1), tiff.get_image_count());
    assert_eq!(a.unwrap().width(), 8);
    assert_eq!(b.unwrap().width(), 16);
    assert_eq!(count.unwrap(), 3);

    for image in &built.images {
        assert_eq!(reader.requests_at(&[image.ifd_offset]), 1);
    }
}

#[tokio::test]
async fn test_resolved_image_does_not_wait_for_chain_walk() {
    let built = TiffBuilder::new()
        .add_image(ImageSpec::tiled(32, 32, 16, 16))
        .add_image(ImageSpec::tiled(16, 16, 16, 16).reduced())
        .add_image(ImageSpec::tiled(8, 8, 8, 8).reduced())
        .build();
    let reader = built.reader().with_delay(DELAY);
    let tiff = open_with(&reader, OpenOptions::default()).await;
    tiff.get_image(0).await.unwrap();

    let started = Instant::now();
    let first = async {
        // Let the count walk take the chain first
        tokio::time::sleep(Duration::from_millis(10)).await;
        let image = tiff.get_image(0).await;
        (image, started.elapsed())
    };
    let ((image, elapsed), count) = tokio::join!(first, tiff.get_image_count());

    assert_eq!(image.unwrap().width(), 32);
    assert!(elapsed < DELAY, "get_image(0) took {elapsed:?}");
    assert_eq!(count.unwrap(), 3);
    assert!(started.elapsed() >= DELAY * 2);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_aborting_one_read_leaves_the_other() {
    let spec = image_spec();
    let built = TiffBuilder::new().add_image(spec.clone()).build();
    let reader = built.reader().with_delay(DELAY);
    let tiff = open_with(&reader, OpenOptions::default()).await;
    let image = tiff.get_image(0).await.unwrap();

    let controller = AbortController::new();
    let cancelled = ReadRasterOptions::new().signal(controller.signal());
    let kept = ReadRasterOptions::new();
    let started = Instant::now();

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.abort();
    };
    let aborted_read = async {
        let result = image.read_rasters(&cancelled).await;
        (result, started.elapsed())
    };
    let ((aborted, elapsed), kept, ()) =
        tokio::join!(aborted_read, image.read_rasters(&kept), trigger);

    let err = aborted.unwrap_err();
    assert!(matches!(err, GeoTiffError::Aborted));
    assert!(elapsed < DELAY, "abort took {elapsed:?}");

    let kept = kept.unwrap();
    let want: Vec<f64> = (0..32)
        .flat_map(|y| (0..32).map(move |x| (x, y)))
        .map(|(x, y)| spec.value(x, y, 0))
        .collect();
    assert_eq!(kept.bands().unwrap()[0].to_f64_vec(), want);
}

#[tokio::test]
async fn test_abandoned_load_is_not_cached() {
    let built = TiffBuilder::new().add_image(image_spec()).build();
    let reader = built.reader().with_delay(Duration::from_millis(60));
    let tiff = open_with(&reader, OpenOptions::default()).await;
    let image = tiff.get_image(0).await.unwrap();

    let controller = AbortController::new();
    let options = ReadRasterOptions::new()
        .window(Window::new(0, 0, 8, 8))
        .signal(controller.signal());
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort();
    };
    let (result, ()) = tokio::join!(image.read_rasters(&options), trigger);
    assert!(result.unwrap_err().is_aborted());

    // Past the point where the fetch would have finished
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(tiff.cached_tiles(), 0);
}

#[tokio::test]
async fn test_pre_aborted_signal() {
    let built = TiffBuilder::new().add_image(image_spec()).build();
    let reader = built.reader();
    let tiff = open_with(&reader, OpenOptions::default()).await;
    let controller = AbortController::new();
    controller.abort();
    reader.reset_tracking();

    let options = ReadRasterOptions::new().signal(controller.signal());
    let err = tiff.read_rasters(&options).await.unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(reader.request_count(), 0);

    let err = GeoTiff::from_reader(
        Arc::new(reader.clone()),
        OpenOptions::default().signal(controller.signal()),
    )
    .await
    .unwrap_err();
    assert!(err.is_aborted());
}
