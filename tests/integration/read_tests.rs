//! Windowed reads on single images: layouts, sample types, codecs, fill.

use std::sync::Arc;

use geotiff_stream::codec::stateless;
use geotiff_stream::io::ByteOrder;
use geotiff_stream::{
    DecodeError, DecodePool, Decoder, DecoderRegistry, GeoTiff, GeoTiffError, GeoTiffImage,
    OpenOptions, RasterBuffer, ReadRasterOptions, ResampleMethod, Window,
};

use super::test_utils::{ImageSpec, TiffBuilder, TrackingReader};

async fn open_with(reader: &TrackingReader, options: OpenOptions) -> GeoTiffImage {
    let tiff = GeoTiff::from_reader(Arc::new(reader.clone()), options)
        .await
        .unwrap();
    tiff.get_image(0).await.unwrap()
}

async fn first_image(builder: TiffBuilder) -> (GeoTiffImage, TrackingReader) {
    let reader = builder.build().reader();
    let image = open_with(&reader, OpenOptions::default()).await;
    (image, reader)
}

/// Expected band values of `spec` over `window`, filled outside the image.
fn expected(spec: &ImageSpec, window: Window, sample: usize, fill: f64) -> Vec<f64> {
    let mut out = Vec::new();
    for y in window.y0..window.y1 {
        for x in window.x0..window.x1 {
            let inside = x >= 0 && y >= 0 && x < spec.width as i64 && y < spec.height as i64;
            out.push(if inside {
                spec.value(x as u32, y as u32, sample)
            } else {
                fill
            });
        }
    }
    out
}

fn full(spec: &ImageSpec) -> Window {
    Window::full(spec.width, spec.height)
}

// =============================================================================
// Layouts
// =============================================================================

#[tokio::test]
async fn test_full_read_chunky_tiles() {
    let spec = ImageSpec::tiled(40, 30, 16, 16).samples(3);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;

    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    assert_eq!((rasters.width, rasters.height, rasters.samples), (40, 30, 3));

    let bands = rasters.bands().unwrap();
    for (sample, band) in bands.iter().enumerate() {
        assert!(band.as_u8().is_some());
        assert_eq!(band.to_f64_vec(), expected(&spec, full(&spec), sample, 0.0));
    }
}

#[tokio::test]
async fn test_window_past_edges_fetches_only_intersecting_blocks() {
    let spec = ImageSpec::tiled(16, 16, 4, 4);
    let built = TiffBuilder::new().add_image(spec.clone()).build();
    let reader = built.reader();
    let image = open_with(&reader, OpenOptions::default()).await;
    reader.reset_tracking();

    let window = Window::new(-2, -2, 5, 5);
    let rasters = image
        .read_rasters(&ReadRasterOptions::new().window(window).fill_value(255.0))
        .await
        .unwrap();

    assert_eq!((rasters.width, rasters.height), (7, 7));
    assert_eq!(
        rasters.bands().unwrap()[0].to_f64_vec(),
        expected(&spec, window, 0, 255.0)
    );

    let offsets = &built.images[0].block_offsets;
    let wanted: Vec<u64> = [0, 1, 4, 5].iter().map(|&i| offsets[i]).collect();
    assert_eq!(reader.requests_at(&wanted), 4);
    assert_eq!(reader.requests_at(offsets), 4);
}

#[tokio::test]
async fn test_window_fully_outside() {
    let spec = ImageSpec::tiled(16, 16, 8, 8);
    let built = TiffBuilder::new().add_image(spec).build();
    let reader = built.reader();
    let image = open_with(&reader, OpenOptions::default()).await;
    reader.reset_tracking();

    let rasters = image
        .read_rasters(
            &ReadRasterOptions::new()
                .window(Window::new(100, 100, 104, 102))
                .fill_value(9.0),
        )
        .await
        .unwrap();

    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), vec![9.0; 8]);
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_strips_with_short_last_strip() {
    let spec = ImageSpec::stripped(20, 10, 3).samples(2);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;
    assert_eq!(image.geometry().tiles_down, 4);

    let window = Window::new(3, 5, 17, 10);
    let rasters = image
        .read_rasters(&ReadRasterOptions::new().window(window))
        .await
        .unwrap();
    let bands = rasters.bands().unwrap();
    assert_eq!(bands[0].to_f64_vec(), expected(&spec, window, 0, 0.0));
    assert_eq!(bands[1].to_f64_vec(), expected(&spec, window, 1, 0.0));
}

#[tokio::test]
async fn test_planar_sample_subset_and_order() {
    let spec = ImageSpec::tiled(24, 20, 16, 16).samples(3).planar();
    let built = TiffBuilder::new().add_image(spec.clone()).build();
    let reader = built.reader();
    let image = open_with(&reader, OpenOptions::default()).await;
    reader.reset_tracking();

    let window = Window::new(10, 4, 22, 18);
    let rasters = image
        .read_rasters(
            &ReadRasterOptions::new()
                .window(window)
                .samples(vec![2, 0]),
        )
        .await
        .unwrap();

    assert_eq!(rasters.samples, 2);
    let bands = rasters.bands().unwrap();
    assert_eq!(bands[0].to_f64_vec(), expected(&spec, window, 2, 0.0));
    assert_eq!(bands[1].to_f64_vec(), expected(&spec, window, 0, 0.0));

    // Band 1 blocks are never touched
    let per_plane = spec.blocks_per_plane();
    let plane_one = &built.images[0].block_offsets[per_plane..2 * per_plane];
    assert_eq!(reader.requests_at(plane_one), 0);
}

#[tokio::test]
async fn test_interleaved_output() {
    let spec = ImageSpec::tiled(12, 9, 8, 8).samples(3);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;

    let window = Window::new(2, 2, 10, 9);
    let rasters = image
        .read_rasters(
            &ReadRasterOptions::new()
                .window(window)
                .samples(vec![1, 2])
                .interleave(true),
        )
        .await
        .unwrap();

    let values = rasters.interleaved().unwrap().to_f64_vec();
    let b1 = expected(&spec, window, 1, 0.0);
    let b2 = expected(&spec, window, 2, 0.0);
    let want: Vec<f64> = b1.iter().zip(&b2).flat_map(|(a, b)| [*a, *b]).collect();
    assert_eq!(values, want);
    assert!(rasters.bands().is_none());
}

// =============================================================================
// Sample types and byte orders
// =============================================================================

#[tokio::test]
async fn test_deflate_predictor_u16_big_endian() {
    let spec = ImageSpec::tiled(33, 17, 16, 16)
        .format(16, 1)
        .deflate()
        .horizontal_predictor()
        .values(|x, y, _| (x * 700 + y * 3) as f64);
    let (image, _) = first_image(
        TiffBuilder::new()
            .with_byte_order(ByteOrder::BigEndian)
            .add_image(spec.clone()),
    )
    .await;

    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    let band = &rasters.bands().unwrap()[0];
    assert!(matches!(band, RasterBuffer::U16(_)));
    assert_eq!(band.to_f64_vec(), expected(&spec, full(&spec), 0, 0.0));
}

#[tokio::test]
async fn test_packbits_strips() {
    let spec = ImageSpec::stripped(30, 7, 2).packbits();
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;

    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    assert_eq!(
        rasters.bands().unwrap()[0].to_f64_vec(),
        expected(&spec, full(&spec), 0, 0.0)
    );
}

#[tokio::test]
async fn test_bigtiff_signed_samples() {
    let spec = ImageSpec::tiled(20, 20, 16, 16)
        .format(16, 2)
        .values(|x, y, _| x as f64 - (y as f64) * 40.0);
    let (image, _) = first_image(
        TiffBuilder::new()
            .with_bigtiff(true)
            .with_byte_order(ByteOrder::BigEndian)
            .add_image(spec.clone()),
    )
    .await;

    let window = Window::new(4, 10, 20, 20);
    let rasters = image
        .read_rasters(&ReadRasterOptions::new().window(window))
        .await
        .unwrap();
    let band = &rasters.bands().unwrap()[0];
    assert!(band.as_i16().is_some());
    assert_eq!(band.to_f64_vec(), expected(&spec, window, 0, 0.0));
    assert!(band.to_f64_vec().iter().any(|v| *v < 0.0));
}

#[tokio::test]
async fn test_float_samples() {
    let values = |x: u32, y: u32, s: usize| x as f64 * 0.5 - y as f64 + s as f64 * 0.25;

    let f32_spec = ImageSpec::tiled(18, 10, 8, 8).format(32, 3).samples(2).values(values);
    let (image, _) = first_image(TiffBuilder::new().add_image(f32_spec.clone())).await;
    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    let bands = rasters.bands().unwrap();
    assert!(bands[1].as_f32().is_some());
    assert_eq!(bands[1].to_f64_vec(), expected(&f32_spec, full(&f32_spec), 1, 0.0));

    let f64_spec = ImageSpec::stripped(9, 5, 2).format(64, 3).values(values);
    let (image, _) = first_image(
        TiffBuilder::new()
            .with_byte_order(ByteOrder::BigEndian)
            .add_image(f64_spec.clone()),
    )
    .await;
    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    let band = &rasters.bands().unwrap()[0];
    assert!(band.as_f64().is_some());
    assert_eq!(band.to_f64_vec(), expected(&f64_spec, full(&f64_spec), 0, 0.0));
}

// =============================================================================
// Resampling
// =============================================================================

#[tokio::test]
async fn test_nearest_resample_to_half() {
    let spec = ImageSpec::tiled(16, 16, 8, 8);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;

    let rasters = image
        .read_rasters(&ReadRasterOptions::new().size(8, 8))
        .await
        .unwrap();
    assert_eq!((rasters.width, rasters.height), (8, 8));

    let want: Vec<f64> = (0..8)
        .flat_map(|y| (0..8).map(move |x| (x, y)))
        .map(|(x, y)| spec.value(x * 2, y * 2, 0))
        .collect();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), want);
}

#[tokio::test]
async fn test_bilinear_keeps_constant_images() {
    let spec = ImageSpec::tiled(16, 16, 8, 8)
        .format(32, 3)
        .values(|_, _, _| 42.0);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec)).await;

    let rasters = image
        .read_rasters(
            &ReadRasterOptions::new()
                .size(5, 7)
                .resample(ResampleMethod::Bilinear),
        )
        .await
        .unwrap();
    let values = rasters.bands().unwrap()[0].to_f64_vec();
    assert_eq!(values.len(), 35);
    assert!(values.iter().all(|v| (v - 42.0).abs() < 1e-4));
}

// =============================================================================
// Sparse, corrupt and unsupported blocks
// =============================================================================

#[tokio::test]
async fn test_sparse_block_is_filled() {
    let spec = ImageSpec::tiled(8, 8, 4, 4).sparse(1);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec.clone())).await;

    let rasters = image
        .read_rasters(&ReadRasterOptions::new().fill_value(200.0))
        .await
        .unwrap();
    let values = rasters.bands().unwrap()[0].to_f64_vec();
    for y in 0..8u32 {
        for x in 0..8u32 {
            let want = if x >= 4 && y < 4 { 200.0 } else { spec.value(x, y, 0) };
            assert_eq!(values[(y * 8 + x) as usize], want, "pixel {x},{y}");
        }
    }
}

#[tokio::test]
async fn test_corrupt_block_names_the_tile() {
    let spec = ImageSpec::tiled(8, 8, 4, 4).deflate().corrupt(2);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec)).await;

    // Blocks 0 and 1 are intact
    let top = image
        .read_rasters(&ReadRasterOptions::new().window(Window::new(0, 0, 8, 4)))
        .await;
    assert!(top.is_ok());

    let err = image.read_rasters(&ReadRasterOptions::new()).await.unwrap_err();
    match err {
        GeoTiffError::TileDecodeFailed { tile_index, cause } => {
            assert_eq!(tile_index, 2);
            assert!(matches!(*cause, GeoTiffError::Decode(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_compression() {
    let spec = ImageSpec::tiled(8, 8, 8, 8).compression(50000);
    let built = TiffBuilder::new().add_image(spec).build();
    let reader = built.reader();
    let image = open_with(&reader, OpenOptions::default()).await;

    // Metadata is still available
    assert_eq!(image.compression(), 50000);

    let err = image.read_rasters(&ReadRasterOptions::new()).await.unwrap_err();
    let ifd_offset = built.images[0].ifd_offset;
    assert!(matches!(
        err,
        GeoTiffError::UnsupportedCompression { compression: 50000, ifd_offset: o } if o == ifd_offset
    ));
}

struct Inverting;

impl Decoder for Inverting {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(data.iter().map(|b| 255 - b).collect())
    }
}

#[tokio::test]
async fn test_registered_decoder() {
    // Payload is stored raw; the custom codec inverts it
    let spec = ImageSpec::tiled(10, 10, 8, 8).compression(65000);
    let reader = TiffBuilder::new().add_image(spec.clone()).build().reader();

    let registry = DecoderRegistry::with_defaults();
    registry.register(65000, stateless(|| Inverting));
    let options = OpenOptions::default().registry(Arc::new(registry));
    let image = open_with(&reader, options).await;

    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    let want: Vec<f64> = expected(&spec, full(&spec), 0, 0.0)
        .into_iter()
        .map(|v| 255.0 - v)
        .collect();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), want);
}

#[tokio::test]
async fn test_decoder_registered_after_failed_read() {
    let spec = ImageSpec::tiled(10, 10, 8, 8).compression(65001);
    let reader = TiffBuilder::new().add_image(spec.clone()).build().reader();

    let registry = Arc::new(DecoderRegistry::with_defaults());
    let options = OpenOptions::default().registry(registry.clone());
    let image = open_with(&reader, options).await;

    let err = image.read_rasters(&ReadRasterOptions::new()).await.unwrap_err();
    assert!(matches!(
        err,
        GeoTiffError::UnsupportedCompression { compression: 65001, .. }
    ));

    // The same image picks up the codec once it is registered
    registry.register(65001, stateless(|| Inverting));
    let rasters = image.read_rasters(&ReadRasterOptions::new()).await.unwrap();
    let want: Vec<f64> = expected(&spec, full(&spec), 0, 0.0)
        .into_iter()
        .map(|v| 255.0 - v)
        .collect();
    assert_eq!(rasters.bands().unwrap()[0].to_f64_vec(), want);
}

#[tokio::test]
async fn test_worker_pool_matches_inline() {
    let spec = ImageSpec::tiled(50, 40, 16, 16).samples(2).deflate();
    let reader = TiffBuilder::new().add_image(spec).build().reader();

    let inline = open_with(&reader, OpenOptions::default().cache(false)).await;
    let pooled = open_with(
        &reader,
        OpenOptions::default()
            .cache(false)
            .pool(DecodePool::with_workers(3)),
    )
    .await;

    let options = ReadRasterOptions::new().window(Window::new(5, 5, 45, 38));
    let a = inline.read_rasters(&options).await.unwrap();
    let b = pooled.read_rasters(&options).await.unwrap();
    let c = inline
        .read_rasters(&options.clone().pool(DecodePool::with_workers(2)))
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
}

// =============================================================================
// Option validation
// =============================================================================

#[tokio::test]
async fn test_invalid_windows_and_samples() {
    let spec = ImageSpec::tiled(8, 8, 8, 8).samples(2);
    let (image, _) = first_image(TiffBuilder::new().add_image(spec)).await;

    let empty = image
        .read_rasters(&ReadRasterOptions::new().window(Window::new(4, 4, 4, 8)))
        .await;
    assert!(matches!(empty, Err(GeoTiffError::InvalidReadOptions(_))));

    let bad_sample = image
        .read_rasters(&ReadRasterOptions::new().samples(vec![0, 2]))
        .await;
    assert!(matches!(bad_sample, Err(GeoTiffError::InvalidReadOptions(_))));

    let zero_size = image
        .read_rasters(&ReadRasterOptions::new().size(0, 4))
        .await;
    assert!(matches!(zero_size, Err(GeoTiffError::InvalidReadOptions(_))));
}
