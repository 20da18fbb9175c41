//! Parameters threaded through panorama synthesis.

use crate::{composite::CompositePolicy, projection::ValidityMode, warp::Interpolation};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uom::si::{angle::radian, f64::Angle};

/// Horizontal field of view of the Matterport undistorted views in radians.
pub const DEFAULT_HFOV_RAD: f64 = 1.06;

/// Size of an equirectangular panorama. The height is always half the width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EquirectSize {
    width: usize,
    height: usize,
}

impl EquirectSize {
    pub fn from_width(width: usize) -> Self {
        Self {
            width,
            height: width / 2,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl Default for EquirectSize {
    fn default() -> Self {
        Self::from_width(1024)
    }
}

/// Region of every source view that takes part in projection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CropWindow {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl CropWindow {
    /// Drops the dark border at the bottom and right of Matterport's
    /// 1024x1280 undistorted views.
    pub fn matterport() -> Self {
        Self {
            rows: 0..1013,
            cols: 0..1254,
        }
    }
}

/// Settings shared by every modality of a scan.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PanoConfig {
    pub size: EquirectSize,

    /// Horizontal field of view of the source views.
    pub source_hfov: Angle,

    /// Crop applied to each source view before projection.
    pub crop: Option<CropWindow>,
}

impl PanoConfig {
    pub fn new(size: EquirectSize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

impl Default for PanoConfig {
    fn default() -> Self {
        Self {
            size: EquirectSize::default(),
            source_hfov: Angle::new::<radian>(DEFAULT_HFOV_RAD),
            crop: Some(CropWindow::matterport()),
        }
    }
}

/// How one modality is resampled and composited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModalityParams {
    pub policy: CompositePolicy,
    pub interpolation: Interpolation,
    pub validity: ValidityMode,

    /// Convert planar depth into radial range before projection.
    pub correct_depth: bool,
}

impl ModalityParams {
    /// Derives parameters from the blending and depth flags.
    ///
    /// Blended modalities are sampled bilinearly. Depth uses the
    /// center-distance validity so that central source pixels dominate.
    pub fn from_flags(blending: bool, depth: bool) -> Self {
        Self {
            policy: CompositePolicy::from_flags(blending, depth),
            interpolation: match blending {
                true => Interpolation::Bilinear,
                false => Interpolation::Nearest,
            },
            validity: match depth {
                true => ValidityMode::CenterDistance,
                false => ValidityMode::Sample,
            },
            correct_depth: depth,
        }
    }

    pub fn with_depth_correction(mut self, correct_depth: bool) -> Self {
        self.correct_depth = correct_depth;
        self
    }
}

/// The image kinds of a Matterport scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Modality {
    Skybox,
    Color,
    Depth,
    Classes,
    Instances,
}

impl Modality {
    /// Directory holding this modality inside a scan.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Modality::Skybox => "matterport_skybox_images",
            Modality::Color => "undistorted_color_images",
            Modality::Depth => "undistorted_depth_images",
            Modality::Classes => "segmentation_maps_classes",
            Modality::Instances => "segmentation_maps_instances",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Modality::Skybox | Modality::Color => "jpg",
            Modality::Depth | Modality::Classes | Modality::Instances => "png",
        }
    }

    pub fn params(&self) -> ModalityParams {
        match self {
            Modality::Skybox | Modality::Color => ModalityParams::from_flags(true, false),
            Modality::Depth => ModalityParams::from_flags(false, true),
            Modality::Classes | Modality::Instances => ModalityParams::from_flags(false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn height_is_half_width() {
        let size = EquirectSize::from_width(1025);
        assert_eq!((size.width(), size.height()), (1025, 512));
    }

    #[rstest]
    #[case(Modality::Color, CompositePolicy::Blend, Interpolation::Bilinear, false)]
    #[case(Modality::Depth, CompositePolicy::DepthWeighted, Interpolation::Nearest, true)]
    #[case(Modality::Classes, CompositePolicy::Overwrite, Interpolation::Nearest, false)]
    #[case(Modality::Instances, CompositePolicy::Overwrite, Interpolation::Nearest, false)]
    fn modality_presets(
        #[case] modality: Modality,
        #[case] policy: CompositePolicy,
        #[case] interpolation: Interpolation,
        #[case] correct_depth: bool,
    ) {
        let params = modality.params();
        assert_eq!(params.policy, policy);
        assert_eq!(params.interpolation, interpolation);
        assert_eq!(params.correct_depth, correct_depth);
    }

    #[test]
    fn only_depth_weights_by_center_distance() {
        assert_eq!(Modality::Depth.params().validity, ValidityMode::CenterDistance);
        assert_eq!(Modality::Color.params().validity, ValidityMode::Sample);
    }
}
