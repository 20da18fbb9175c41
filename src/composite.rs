//! Compositing of warped views into a single panorama.

use crate::{
    projection::{MIN_VALIDITY, WarpedView},
    raster::{Raster, RasterError},
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How overlapping views are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompositePolicy {
    /// Validity weighted average of every view.
    Blend,

    /// Positive samples replace whatever an earlier view wrote. Used for label
    /// maps, where averaged values are not valid labels.
    Overwrite,

    /// Validity weighted average of range samples. Accumulates like
    /// [`CompositePolicy::Blend`], but is paired with center distance
    /// validity so views dominate near their own centers.
    DepthWeighted,
}

impl CompositePolicy {
    pub fn from_flags(blending: bool, depth: bool) -> Self {
        match (blending, depth) {
            (true, _) => CompositePolicy::Blend,
            (false, true) => CompositePolicy::DepthWeighted,
            (false, false) => CompositePolicy::Overwrite,
        }
    }

    fn divides(&self) -> bool {
        !matches!(self, CompositePolicy::Overwrite)
    }
}

/// Running sum and weight of a panorama under construction.
#[derive(Clone, Debug)]
pub struct PanoramaAccumulator {
    policy: CompositePolicy,
    sum: Raster,
    weight: Vec<f32>,
}

impl PanoramaAccumulator {
    pub fn new(rows: usize, cols: usize, channels: usize, policy: CompositePolicy) -> Self {
        Self {
            policy,
            sum: Raster::new(rows, cols, channels),
            weight: vec![0.0; rows * cols],
        }
    }

    /// Adds one view. Views must be added in a fixed order because
    /// [`CompositePolicy::Overwrite`] keeps the last positive sample.
    pub fn add(&mut self, view: &WarpedView) -> Result<(), RasterError> {
        let image = view.image();
        let validity = view.validity();
        if (image.rows(), image.cols()) != (self.sum.rows(), self.sum.cols())
            || (validity.rows(), validity.cols()) != (self.sum.rows(), self.sum.cols())
        {
            return Err(RasterError::ShapeMismatch {
                expected_rows: self.sum.rows(),
                expected_cols: self.sum.cols(),
                rows: image.rows(),
                cols: image.cols(),
            });
        }
        if image.channels() != self.sum.channels() {
            return Err(RasterError::ChannelMismatch {
                expected: self.sum.channels(),
                found: image.channels(),
            });
        }

        let channels = self.sum.channels();
        let samples = image.as_slice().chunks(channels);
        let pixels = self.sum.as_mut_slice().chunks_mut(channels);
        for (((pano, warped), &valid), weight) in pixels
            .zip(samples)
            .zip(validity.as_slice())
            .zip(self.weight.iter_mut())
        {
            *weight += valid;
            if valid < MIN_VALIDITY {
                continue;
            }

            match self.policy {
                CompositePolicy::Blend | CompositePolicy::DepthWeighted => {
                    for (p, &w) in pano.iter_mut().zip(warped) {
                        *p += w * valid;
                    }
                }
                CompositePolicy::Overwrite => {
                    for (p, &w) in pano.iter_mut().zip(warped) {
                        if w > 0.0 {
                            *p = w;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies the zero weight rule and normalizes.
    ///
    /// Pixels no view contributed to become zero with a weight of one, so the
    /// returned weights are never zero.
    pub fn finish(mut self) -> Panorama {
        let channels = self.sum.channels();
        let divides = self.policy.divides();
        for (pixel, weight) in self
            .sum
            .as_mut_slice()
            .chunks_mut(channels)
            .zip(self.weight.iter_mut())
        {
            if *weight == 0.0 {
                pixel.fill(0.0);
                *weight = 1.0;
            }
            if divides {
                pixel.iter_mut().for_each(|p| *p /= *weight);
            }
        }

        Panorama {
            image: self.sum,
            weight: self.weight,
        }
    }
}

/// A finished panorama with the accumulated weight of each pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Panorama {
    image: Raster,
    weight: Vec<f32>,
}

impl Panorama {
    pub fn image(&self) -> &Raster {
        &self.image
    }

    pub fn weights(&self) -> &[f32] {
        &self.weight
    }

    pub fn into_raster(self) -> Raster {
        self.image
    }
}

/// Composites `views` in slice order.
pub fn combine_views(views: &[WarpedView], policy: CompositePolicy) -> Result<Panorama, RasterError> {
    let first = views.first().ok_or(RasterError::NoViews)?.image();
    let mut acc = PanoramaAccumulator::new(first.rows(), first.cols(), first.channels(), policy);
    for view in views {
        acc.add(view)?;
    }

    Ok(acc.finish())
}
