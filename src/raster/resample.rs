//! Resampling of assembled windows to the requested output size.
//!
//! Both kernels work on a buffer of `in_width * in_height * samples` values,
//! where `samples` is 1 for a band buffer and the band count for an
//! interleaved one. Source coordinates are `out * (in / out)`.

use super::options::ResampleMethod;
use super::samples::{with_buffer, RasterBuffer, Sample};

/// Resample a whole buffer, keeping its type.
pub fn resample(
    buffer: &RasterBuffer,
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    samples: usize,
    method: ResampleMethod,
) -> RasterBuffer {
    with_buffer!(buffer, values => {
        let out = match method {
            ResampleMethod::Nearest => {
                nearest(values, in_width, in_height, out_width, out_height, samples)
            }
            ResampleMethod::Bilinear => {
                bilinear(values, in_width, in_height, out_width, out_height, samples)
            }
        };
        Sample::into_buffer(out)
    })
}

pub fn nearest<T: Sample>(
    values: &[T],
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    samples: usize,
) -> Vec<T> {
    let rel_x = in_width as f64 / out_width as f64;
    let rel_y = in_height as f64 / out_height as f64;
    let mut out = Vec::with_capacity(out_width * out_height * samples);

    for y in 0..out_height {
        let cy = ((rel_y * y as f64).round() as usize).min(in_height - 1);
        for x in 0..out_width {
            let cx = ((rel_x * x as f64).round() as usize).min(in_width - 1);
            let src = (cy * in_width + cx) * samples;
            out.extend_from_slice(&values[src..src + samples]);
        }
    }
    out
}

fn lerp(v0: f64, v1: f64, t: f64) -> f64 {
    (1.0 - t) * v0 + t * v1
}

pub fn bilinear<T: Sample>(
    values: &[T],
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    samples: usize,
) -> Vec<T> {
    let rel_x = in_width as f64 / out_width as f64;
    let rel_y = in_height as f64 / out_height as f64;
    let mut out = Vec::with_capacity(out_width * out_height * samples);
    let at = |x: usize, y: usize, s: usize| values[(y * in_width + x) * samples + s].to_f64();

    for y in 0..out_height {
        let raw_y = rel_y * y as f64;
        let yl = (raw_y.floor() as usize).min(in_height - 1);
        let yh = (raw_y.ceil() as usize).min(in_height - 1);
        let ty = raw_y.fract();

        for x in 0..out_width {
            let raw_x = rel_x * x as f64;
            let xl = (raw_x.floor() as usize).min(in_width - 1);
            let xh = (raw_x.ceil() as usize).min(in_width - 1);
            let tx = raw_x.fract();

            for s in 0..samples {
                let top = lerp(at(xl, yl, s), at(xh, yl, s), tx);
                let bottom = lerp(at(xl, yh, s), at(xh, yh, s), tx);
                out.push(T::from_f64(lerp(top, bottom, ty)));
            }
        }
    }
    out
}
