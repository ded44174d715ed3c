//! Options for windowed raster reads.

use std::fmt;
use std::str::FromStr;

use crate::codec::DecodePool;
use crate::error::GeoTiffError;
use crate::io::AbortSignal;

/// Resampling used when the output size differs from the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    #[default]
    Nearest,
    /// Best effort; values between source pixels are linearly interpolated
    Bilinear,
}

impl FromStr for ResampleMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResampleMethod::Nearest),
            "bilinear" | "linear" => Ok(ResampleMethod::Bilinear),
            other => Err(format!(
                "unknown resample method '{}', expected nearest or bilinear",
                other
            )),
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleMethod::Nearest => f.write_str("nearest"),
            ResampleMethod::Bilinear => f.write_str("bilinear"),
        }
    }
}

/// Pixel window `[x0, y0, x1)` x `[y0, y1)` in image coordinates.
///
/// The window may extend past the image; pixels outside it are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Window {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// The whole image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i64, height as i64)
    }

    /// Saturates instead of overflowing; [`Window::validate`] rejects such windows.
    pub fn width(&self) -> i64 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> i64 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn validate(&self) -> Result<(), GeoTiffError> {
        let extent = |start: i64, end: i64| {
            end.checked_sub(start)
                .filter(|size| *size > 0 && *size <= u32::MAX as i64)
        };
        if extent(self.x0, self.x1).is_none() || extent(self.y0, self.y1).is_none() {
            return Err(GeoTiffError::InvalidReadOptions(format!(
                "window [{}, {}, {}, {}] is empty, inverted or too large",
                self.x0, self.y0, self.x1, self.y1
            )));
        }
        Ok(())
    }
}

impl FromStr for Window {
    type Err = String;

    /// Parse `x0,y0,x1,y1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i64> = s
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid window '{}': {}", s, e))?;
        match parts.as_slice() {
            [x0, y0, x1, y1] => Ok(Window::new(*x0, *y0, *x1, *y1)),
            _ => Err(format!("invalid window '{}': expected x0,y0,x1,y1", s)),
        }
    }
}

/// Options accepted by `read_rasters`.
///
/// `bbox` and `res_x`/`res_y` are only meaningful on containers, where they
/// select the best image and are translated into `window`/`width`/`height`.
#[derive(Debug, Clone, Default)]
pub struct ReadRasterOptions {
    pub window: Option<Window>,
    /// Georeferenced bounds `[min_x, min_y, max_x, max_y]`
    pub bbox: Option<[f64; 4]>,
    pub res_x: Option<f64>,
    pub res_y: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resample: ResampleMethod,
    /// Band indices to read; all bands when `None`
    pub samples: Option<Vec<usize>>,
    pub interleave: bool,
    pub fill_value: f64,
    /// Overrides the container's decode pool for this read
    pub pool: Option<DecodePool>,
    pub signal: Option<AbortSignal>,
}

impl ReadRasterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn resolution(mut self, res_x: f64, res_y: f64) -> Self {
        self.res_x = Some(res_x);
        self.res_y = Some(res_y);
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn resample(mut self, method: ResampleMethod) -> Self {
        self.resample = method;
        self
    }

    pub fn samples(mut self, samples: Vec<usize>) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn interleave(mut self, interleave: bool) -> Self {
        self.interleave = interleave;
        self
    }

    pub fn fill_value(mut self, value: f64) -> Self {
        self.fill_value = value;
        self
    }

    pub fn pool(mut self, pool: DecodePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}
