//! Projection of perspective source views onto the equirectangular sphere.

use crate::{
    angle::ViewAngle,
    config::EquirectSize,
    raster::{Raster, RasterError},
    warp::{Interpolation, SampleGrid, warp_image},
};
use nalgebra::Vector3;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use tracing::debug;
use uom::si::{angle::radian, f64::Angle};

/// Validity at or below this value counts as no contribution.
pub const MIN_VALIDITY: f32 = 1e-8;

/// How the validity of a warped sample is decided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValidityMode {
    /// A sample is fully valid if it was read from inside the source.
    #[default]
    Sample,

    /// A sample is weighted by how close its source pixel lies to the source
    /// image center. Samples below 1.0, which includes depth pixels without
    /// a return, are invalid.
    CenterDistance,
}

/// Per output pixel confidence in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct ValidityMap {
    rows: usize,
    cols: usize,
    weights: Vec<f32>,
}

impl ValidityMap {
    /// Builds a map from row major weights, clamping them into [0, 1].
    ///
    /// NaN weights become zero.
    pub fn new(rows: usize, cols: usize, weights: Vec<f32>) -> Result<Self, RasterError> {
        if weights.len() != rows * cols {
            return Err(RasterError::SizeMismatch {
                rows,
                cols,
                channels: 1,
                expected: rows * cols,
                found: weights.len(),
            });
        }

        Ok(Self::clamped(rows, cols, weights))
    }

    pub fn filled(rows: usize, cols: usize, weight: f32) -> Self {
        Self::clamped(rows, cols, vec![weight; rows * cols])
    }

    fn clamped(rows: usize, cols: usize, weights: Vec<f32>) -> Self {
        Self {
            rows,
            cols,
            weights: weights.into_iter().map(clamp_weight).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.weights[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn is_empty(&self) -> bool {
        self.weights.iter().all(|&w| w <= MIN_VALIDITY)
    }
}

fn clamp_weight(weight: f32) -> f32 {
    match weight.is_nan() {
        true => 0.0,
        false => weight.clamp(0.0, 1.0),
    }
}

/// A source view resampled onto the panorama grid.
#[derive(Clone, Debug, PartialEq)]
pub struct WarpedView {
    image: Raster,
    validity: ValidityMap,
}

impl WarpedView {
    pub fn new(image: Raster, validity: ValidityMap) -> Self {
        Self { image, validity }
    }

    pub fn image(&self) -> &Raster {
        &self.image
    }

    pub fn validity(&self) -> &ValidityMap {
        &self.validity
    }
}

/// Maps source views with a known horizontal field of view onto an
/// equirectangular grid.
///
/// Each source image is modelled as a plane tangent to a sphere of radius
/// `R = (width / 2) / tan(hfov / 2)`, touching it in the viewing direction
/// of the view. Every panorama pixel casts a ray from the sphere center that
/// is intersected with that plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphericalProjector {
    size: EquirectSize,
    hfov: Angle,
}

impl SphericalProjector {
    pub fn new(size: EquirectSize, hfov: Angle) -> Self {
        Self { size, hfov }
    }

    pub fn size(&self) -> EquirectSize {
        self.size
    }

    /// Azimuth and elevation of the center of the panorama pixel `(col, row)`.
    ///
    /// Azimuth grows to the right on [-PI, PI), elevation grows upwards on
    /// [-PI/2, PI/2].
    pub fn direction(&self, col: usize, row: usize) -> (f64, f64) {
        let width = self.size.width() as f64;
        let height = self.size.height() as f64;
        let azimuth = ((col as f64 + 0.5) / width - 0.5) * TAU;
        let elevation = -((row as f64 + 0.5) / height - 0.5) * PI;
        (azimuth, elevation)
    }

    /// Computes the source coordinate of every panorama pixel for a source
    /// image of `src_rows` x `src_cols` viewed at `view`.
    ///
    /// Pixels whose ray does not hit the plane in front of the sphere center
    /// get non-finite coordinates.
    pub fn sample_grid(&self, view: &ViewAngle, src_rows: usize, src_cols: usize) -> SampleGrid {
        let plane = TangentPlane::new(view, self.radius(src_cols), src_rows, src_cols);
        let (xs, ys): (Vec<f64>, Vec<f64>) = (0..self.size.pixel_count())
            .into_par_iter()
            .map(|i| {
                let (azimuth, elevation) =
                    self.direction(i % self.size.width(), i / self.size.width());
                plane.intersect(azimuth, elevation)
            })
            .unzip();

        SampleGrid::from_coords(self.size.height(), self.size.width(), xs, ys)
            .expect("one coordinate per panorama pixel")
    }

    fn radius(&self, src_cols: usize) -> f64 {
        (src_cols as f64 / 2.0) / (self.hfov.get::<radian>() / 2.0).tan()
    }

    /// Warps `src` onto the panorama grid and computes its validity.
    pub fn project(
        &self,
        src: &Raster,
        view: &ViewAngle,
        interpolation: Interpolation,
        mode: ValidityMode,
    ) -> WarpedView {
        let grid = self.sample_grid(view, src.rows(), src.cols());
        let image = warp_image(src, &grid, interpolation);

        let in_front: Vec<bool> = (0..grid.rows() * grid.cols())
            .map(|i| {
                let (x, y) = grid.coord(i);
                x.is_finite() && y.is_finite()
            })
            .collect();

        let channels = image.channels();
        let first = |i: usize| image.as_slice()[i * channels];
        let weights: Vec<f32> = match mode {
            ValidityMode::Sample => in_front
                .iter()
                .enumerate()
                .map(|(i, &front)| {
                    let sample = first(i);
                    match front && sample.is_finite() && sample >= 0.0 {
                        true => 1.0,
                        false => 0.0,
                    }
                })
                .collect(),
            ValidityMode::CenterDistance => {
                let center_weights = warp_image(
                    &center_weight_image(src.rows(), src.cols()),
                    &grid,
                    Interpolation::Nearest,
                );
                in_front
                    .iter()
                    .zip(center_weights.as_slice())
                    .enumerate()
                    .map(|(i, (&front, &weight))| {
                        match front && weight > MIN_VALIDITY && first(i) >= 1.0 {
                            true => weight,
                            false => 0.0,
                        }
                    })
                    .collect()
            }
        };

        let validity = ValidityMap::clamped(grid.rows(), grid.cols(), weights);
        if validity.is_empty() {
            debug!(
                yaw = view.yaw().get::<radian>(),
                pitch = view.pitch().get::<radian>(),
                "view does not cover any panorama pixel"
            );
        }

        WarpedView::new(image, validity)
    }
}

/// Weight of each source pixel, falling off linearly from 1 at the image
/// center to 0 at the edges along both axes.
pub fn center_weight_image(rows: usize, cols: usize) -> Raster {
    let c0 = rows as f32 / 2.0;
    let c1 = cols as f32 / 2.0;
    Raster::from_fn(rows, cols, 1, |row, col, _| {
        (1.0 - (c0 - row as f32).abs() / c0) * (1.0 - (c1 - col as f32).abs() / c1)
    })
}

/// The source image plane of one view.
struct TangentPlane {
    radius: f64,

    /// Point where the plane touches the sphere.
    contact: Vector3<f64>,

    /// Unit vector along the image columns.
    x_axis: Vector3<f64>,

    /// Unit vector along the image rows.
    y_axis: Vector3<f64>,

    /// Image coordinate of the contact point.
    center: (f64, f64),
}

impl TangentPlane {
    fn new(view: &ViewAngle, radius: f64, rows: usize, cols: usize) -> Self {
        let yaw = view.yaw().get::<radian>();
        let pitch = view.pitch().get::<radian>();

        let contact = Vector3::new(
            pitch.cos() * yaw.sin(),
            pitch.cos() * yaw.cos(),
            pitch.sin(),
        ) * radius;
        let x_axis = Vector3::new(yaw.cos(), -yaw.sin(), 0.0);
        let y_axis = contact.cross(&x_axis).normalize();

        Self {
            radius,
            contact,
            x_axis,
            y_axis,
            center: ((cols as f64 - 1.0) / 2.0, (rows as f64 - 1.0) / 2.0),
        }
    }

    /// Image coordinate hit by the ray at `azimuth` and `elevation`, or NaN if
    /// the ray runs parallel to or away from the plane.
    fn intersect(&self, azimuth: f64, elevation: f64) -> (f64, f64) {
        let ray = Vector3::new(
            elevation.cos() * azimuth.sin(),
            elevation.cos() * azimuth.cos(),
            elevation.sin(),
        );

        let division = self.contact.dot(&ray);
        if division <= 0.0 {
            return (f64::NAN, f64::NAN);
        }

        let offset = ray * (self.radius * self.radius / division) - self.contact;
        (
            self.x_axis.dot(&offset) + self.center.0,
            self.y_axis.dot(&offset) + self.center.1,
        )
    }
}
