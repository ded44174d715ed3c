//! GeoTIFF Stream - inspect and read GeoTIFF/COG files over range requests.
//!
//! Both commands print JSON to stdout; logs go to stderr.

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geotiff_stream::{
    compression,
    config::{Cli, Command, InfoConfig, ReadConfig},
    GeoKey, GeoTiff, GeoTiffError, GeoTiffImage, GeoTiffSource, MultiGeoTiff, OpenOptions,
    RasterBuffer, Rasters,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Info(config) => run_info(config).await,
        Command::Read(config) => run_read(config).await,
    };

    match result {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to serialize output: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "geotiff_stream=debug"
    } else {
        "geotiff_stream=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Open the main file and, when overview files are given, wrap both.
async fn open_sources(
    source: &str,
    overviews: &[String],
    options: OpenOptions,
) -> Result<(GeoTiff, Box<dyn GeoTiffSource>), String> {
    let main = GeoTiff::open(source, options.clone())
        .await
        .map_err(|e| format!("{}: {}", source, e))?;
    info!(source, "opened");

    if overviews.is_empty() {
        return Ok((main.clone(), Box::new(main)));
    }
    let mut files = Vec::with_capacity(overviews.len());
    for overview in overviews {
        let file = GeoTiff::open(overview, options.clone())
            .await
            .map_err(|e| format!("{}: {}", overview, e))?;
        files.push(file);
    }
    Ok((main.clone(), Box::new(MultiGeoTiff::new(main, files))))
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> Result<Value, String> {
    config.validate()?;
    let options = config.source_config.open_options();
    let (main, source) =
        open_sources(&config.source, &config.overviews, options).await?;

    let result = describe(&main, source.as_ref()).await;
    source.close().await.map_err(|e| e.to_string())?;
    let (count, images, ghost) = result.map_err(|e| e.to_string())?;

    Ok(json!({
        "source": config.source,
        "overviews": config.overviews,
        "bigtiff": main.is_bigtiff(),
        "byte_order": format!("{:?}", main.byte_order()),
        "image_count": count,
        "ghost": ghost,
        "images": images,
    }))
}

async fn describe(
    main: &GeoTiff,
    source: &dyn GeoTiffSource,
) -> Result<(usize, Vec<Value>, Value), GeoTiffError> {
    let count = source.get_image_count().await?;
    let first = source.get_image(0).await?;
    let mut images = Vec::with_capacity(count);
    for index in 0..count {
        let image = source.get_image(index).await?;
        images.push(describe_image(index, &image, &first)?);
    }
    let ghost = serde_json::to_value(main.ghost_values().await?).unwrap_or(Value::Null);
    Ok((count, images, ghost))
}

fn describe_image(index: usize, image: &GeoTiffImage, first: &GeoTiffImage) -> Result<Value, GeoTiffError> {
    let mut geokeys = BTreeMap::new();
    if let Some(keys) = image.geo_keys() {
        for (id, value) in keys.iter() {
            let name = GeoKey::from_u16(id)
                .map(|k| k.name().to_string())
                .unwrap_or_else(|| id.to_string());
            geokeys.insert(name, serde_json::to_value(value).unwrap_or(Value::Null));
        }
    }

    Ok(json!({
        "index": index,
        "width": image.width(),
        "height": image.height(),
        "tiled": image.is_tiled(),
        "tile_width": image.tile_width(),
        "tile_height": image.tile_height(),
        "samples_per_pixel": image.samples_per_pixel(),
        "bits_per_sample": image.bits_per_sample(),
        "sample_format": image.sample_format(),
        "planar_configuration": image.planar_configuration(),
        "compression": {
            "code": image.compression(),
            "name": compression::name(image.compression()),
        },
        "predictor": image.predictor(),
        "reduced_resolution": image.is_reduced_resolution(),
        "mask": image.is_mask(),
        "origin": image.origin().ok(),
        "resolution": image.resolution(Some(first)).ok(),
        "bbox": image.bounding_box().ok(),
        "pixel_is_area": image.pixel_is_area(),
        "epsg": image.geo_keys().and_then(|k| k.epsg_code()),
        "geokeys": geokeys,
        "nodata": image.gdal_nodata(),
        "metadata": image.gdal_metadata(None)?,
    }))
}

// =============================================================================
// Read Command
// =============================================================================

#[derive(Debug, Serialize)]
struct BandStats {
    band: usize,
    sample_type: String,
    count: usize,
    valid: usize,
    min: Option<f64>,
    max: Option<f64>,
    mean: Option<f64>,
}

fn band_stats(band: usize, buffer: &RasterBuffer, fill_value: f64) -> BandStats {
    let values = buffer.to_f64_vec();
    let valid: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan() && *v != fill_value)
        .collect();
    let (min, max, sum) = valid.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
    );
    let any = !valid.is_empty();
    BandStats {
        band,
        sample_type: format!("{:?}", buffer.sample_type()).to_lowercase(),
        count: values.len(),
        valid: valid.len(),
        min: any.then_some(min),
        max: any.then_some(max),
        mean: any.then(|| sum / valid.len() as f64),
    }
}

async fn run_read(config: ReadConfig) -> Result<Value, String> {
    config.validate()?;
    let options = config.source_config.open_options().pool(config.decode_pool());
    let (_, source) =
        open_sources(&config.source, &config.overviews, options).await?;

    let read = read_with(&config, source.as_ref()).await;
    source.close().await.map_err(|e| e.to_string())?;
    let rasters = read.map_err(|e| e.to_string())?;

    let bands = rasters.bands().unwrap_or_default();
    let samples: Vec<usize> = config
        .samples
        .clone()
        .unwrap_or_else(|| (0..bands.len()).collect());
    let stats: Vec<BandStats> = bands
        .iter()
        .zip(samples)
        .map(|(buffer, band)| band_stats(band, buffer, config.fill_value))
        .collect();

    Ok(json!({
        "source": config.source,
        "width": rasters.width,
        "height": rasters.height,
        "bands": stats,
    }))
}

async fn read_with(config: &ReadConfig, source: &dyn GeoTiffSource) -> Result<Rasters, GeoTiffError> {
    let options = config.read_options();
    match config.image {
        Some(index) => {
            let image = source.get_image(index).await?;
            debug!(index, width = image.width(), height = image.height(), "reading image");
            image.read_rasters(&options).await
        }
        None => source.read_rasters(&options).await,
    }
}
