//! Resampling of a source raster at dense fractional coordinates.

use crate::raster::{Raster, RasterError};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Value read for coordinates that fall outside the source image.
pub const OUT_OF_BOUNDS: f32 = -1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Interpolation {
    #[default]
    Nearest,
    Bilinear,
}

/// Source coordinates for every pixel of an output raster.
///
/// Coordinates are in source pixel units with the center of the top left
/// pixel at `(0.0, 0.0)`. Non-finite coordinates mark output pixels that have
/// no source sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleGrid {
    rows: usize,
    cols: usize,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl SampleGrid {
    pub fn from_coords(
        rows: usize,
        cols: usize,
        xs: Vec<f64>,
        ys: Vec<f64>,
    ) -> Result<Self, RasterError> {
        for found in [xs.len(), ys.len()] {
            if found != rows * cols {
                return Err(RasterError::SizeMismatch {
                    rows,
                    cols,
                    channels: 1,
                    expected: rows * cols,
                    found,
                });
            }
        }

        Ok(Self { rows, cols, xs, ys })
    }

    /// A grid that samples every source pixel at its own location.
    pub fn identity(rows: usize, cols: usize) -> Self {
        let (xs, ys) = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (col as f64, row as f64)))
            .unzip();
        Self { rows, cols, xs, ys }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the `(x, y)` source coordinate for the output pixel at `index`.
    pub fn coord(&self, index: usize) -> (f64, f64) {
        (self.xs[index], self.ys[index])
    }

    /// Smallest and largest finite `x` and `y`, or `None` if no coordinate is
    /// finite.
    fn bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        let finite = self
            .xs
            .iter()
            .zip(self.ys.iter())
            .filter(|(x, y)| x.is_finite() && y.is_finite());

        finite.fold(None, |acc, (&x, &y)| match acc {
            None => Some(((x, x), (y, y))),
            Some(((x0, x1), (y0, y1))) => Some(((x0.min(x), x1.max(x)), (y0.min(y), y1.max(y)))),
        })
    }
}

/// Resamples `src` at every coordinate of `grid`.
///
/// The source is first cropped to the bounding box of the requested
/// coordinates, widened by one pixel on every side, so that the cost per
/// output pixel does not depend on the size of `src`. Coordinates outside the
/// pixel footprint of `src` read [`OUT_OF_BOUNDS`].
pub fn warp_image(src: &Raster, grid: &SampleGrid, interpolation: Interpolation) -> Raster {
    let channels = src.channels();
    let mut out = Raster::filled(grid.rows(), grid.cols(), channels, OUT_OF_BOUNDS);

    let row_len = grid.cols() * channels;
    let Some((rows, cols)) = working_region(src, grid).filter(|_| row_len > 0) else {
        return out;
    };
    let origin = (cols.start, rows.start);
    let Ok(image) = src.crop(rows, cols) else {
        return out;
    };
    let sampler = Sampler {
        image,
        origin,
        full: (src.cols(), src.rows()),
    };

    out.as_mut_slice()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, dst)| {
            for col in 0..grid.cols() {
                let (x, y) = grid.coord(row * grid.cols() + col);
                for ch in 0..channels {
                    dst[col * channels + ch] = sampler.sample(x, y, ch, interpolation);
                }
            }
        });

    out
}

/// Rows and columns of `src` that can be touched while sampling `grid`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn working_region(src: &Raster, grid: &SampleGrid) -> Option<(Range<usize>, Range<usize>)> {
    let ((min_x, max_x), (min_y, max_y)) = grid.bounds()?;
    let clamp = |value: f64, len: usize| value.clamp(0.0, len as f64) as usize;

    let cols = clamp(min_x.floor() - 1.0, src.cols())..clamp(max_x.ceil() + 2.0, src.cols());
    let rows = clamp(min_y.floor() - 1.0, src.rows())..clamp(max_y.ceil() + 2.0, src.rows());
    match cols.is_empty() || rows.is_empty() {
        true => None,
        false => Some((rows, cols)),
    }
}

struct Sampler {
    /// Cropped working region.
    image: Raster,

    /// Column and row of the crop's top left pixel in the full source.
    origin: (usize, usize),

    /// Columns and rows of the full source.
    full: (usize, usize),
}

impl Sampler {
    fn sample(&self, x: f64, y: f64, channel: usize, interpolation: Interpolation) -> f32 {
        if !self.in_footprint(x, y) {
            return OUT_OF_BOUNDS;
        }

        // Move into crop local coordinates.
        let x = x - self.origin.0 as f64;
        let y = y - self.origin.1 as f64;

        match interpolation {
            Interpolation::Nearest => self.read((x + 0.5).floor(), (y + 0.5).floor(), channel),
            Interpolation::Bilinear => {
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);

                let v00 = self.read(x0, y0, channel);
                let v10 = self.read(x0 + 1.0, y0, channel);
                let v01 = self.read(x0, y0 + 1.0, channel);
                let v11 = self.read(x0 + 1.0, y0 + 1.0, channel);

                let v0 = v00 * (1.0 - fx) + v10 * fx;
                let v1 = v01 * (1.0 - fx) + v11 * fx;
                v0 * (1.0 - fy) + v1 * fy
            }
        }
    }

    /// A coordinate is inside the source if it lies within the area covered by
    /// its pixels.
    fn in_footprint(&self, x: f64, y: f64) -> bool {
        let (cols, rows) = (self.full.0 as f64, self.full.1 as f64);
        (-0.5..cols - 0.5).contains(&x) && (-0.5..rows - 0.5).contains(&y)
    }

    /// Reads a crop local pixel, replicating the edge for neighbours that fall
    /// just outside the source.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read(&self, x: f64, y: f64, channel: usize) -> f32 {
        let col = x.clamp(0.0, (self.image.cols() - 1) as f64) as usize;
        let row = y.clamp(0.0, (self.image.rows() - 1) as f64) as usize;
        self.image.get(row, col, channel)
    }
}
