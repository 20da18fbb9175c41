//! Conversion of planar depth images into radial range images.

use crate::raster::Raster;
use rayon::prelude::*;
use uom::si::{angle::radian, f64::Angle};

/// Largest depth a 16-bit depth image can hold.
pub const MAX_DEPTH: f32 = u16::MAX as f32;

/// Rewrites planar depth into distance from the camera center.
///
/// Depth sensors report the distance along the principal axis. A pixel at
/// angular offsets `a0` (vertical) and `a1` (horizontal) from the image center
/// with planar depth `d` lies at distance `sqrt(d^2 + (d tan a0)^2 + (d tan
/// a1)^2)`. Offsets scale linearly from zero at the center to half of `hfov`
/// at the edges, on both axes.
///
/// Only the first channel is corrected. Pixels without a return (depth zero)
/// stay zero. Results are truncated to whole depth units, as when stored in a
/// 16-bit depth image, and saturate at [`MAX_DEPTH`].
pub fn correct_depth_distortion(depth: &Raster, hfov: Angle) -> Raster {
    let half_fov = hfov.get::<radian>() / 2.0;
    let c0 = depth.rows() as f64 / 2.0;
    let c1 = depth.cols() as f64 / 2.0;
    let channels = depth.channels();

    let mut corrected = depth.clone();
    let row_len = depth.cols() * channels;
    if row_len == 0 {
        return corrected;
    }

    corrected
        .as_mut_slice()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, samples)| {
            let tan0 = ((row as f64 - c0).abs() / c0 * half_fov).tan();
            for (col, pixel) in samples.chunks_mut(channels).enumerate() {
                let planar = f64::from(pixel[0]);
                if planar <= 0.0 {
                    continue;
                }

                let tan1 = ((col as f64 - c1).abs() / c1 * half_fov).tan();
                let d0 = tan0 * planar;
                let d1 = tan1 * planar;
                let radial = (planar * planar + d0 * d0 + d1 * d1).sqrt();
                pixel[0] = (radial as f32).min(MAX_DEPTH).floor();
            }
        });

    corrected
}
