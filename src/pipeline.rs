//! Synthesis of one panorama per capture location.

use crate::{
    angle::resolve_view_angles,
    composite::combine_views,
    config::{ModalityParams, PanoConfig},
    depth::correct_depth_distortion,
    pose::{GRID_ORIENTATIONS, PoseError, PoseTable, VIEWS_PER_LOCATION, ViewKey},
    projection::{SphericalProjector, WarpedView},
    raster::{Raster, RasterError},
};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PanoError {
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("location `{location}` has no source views")]
    NoViews { location: String },
}

/// The source views captured at one location, indexed by grid position.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationViews {
    location: String,
    views: Vec<Option<Raster>>,
}

impl LocationViews {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            views: vec![None; VIEWS_PER_LOCATION],
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Stores the view at `row` and `orientation`, returning the view it
    /// replaced.
    pub fn insert(
        &mut self,
        row: usize,
        orientation: usize,
        raster: Raster,
    ) -> Result<Option<Raster>, PoseError> {
        let key = ViewKey::new(self.location.as_str(), row, orientation);
        let index = key
            .view_index()
            .ok_or_else(|| PoseError::InvalidIdentifier(key.to_string()))?;
        Ok(self.views[index].replace(raster))
    }

    pub fn get(&self, row: usize, orientation: usize) -> Option<&Raster> {
        let index = ViewKey::new(self.location.as_str(), row, orientation).view_index()?;
        self.views[index].as_ref()
    }

    /// Grid positions without a view.
    pub fn missing(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.views
            .iter()
            .enumerate()
            .filter(|(_, view)| view.is_none())
            .map(|(i, _)| (i / GRID_ORIENTATIONS, i % GRID_ORIENTATIONS))
    }

    pub fn len(&self) -> usize {
        self.views.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the panorama of one location.
///
/// Views are projected in parallel and composited in row major view order.
/// Missing views are skipped with a warning. A missing pose fails the whole
/// location.
pub fn synthesize_location(
    config: &PanoConfig,
    params: &ModalityParams,
    poses: &PoseTable,
    views: &LocationViews,
) -> Result<Raster, PanoError> {
    let location = views.location();
    let angles = resolve_view_angles(&poses.location(location)?)?;

    for (row, orientation) in views.missing() {
        warn!(location, row, orientation, "missing source view");
    }
    if views.is_empty() {
        return Err(PanoError::NoViews {
            location: location.to_string(),
        });
    }

    let projector = SphericalProjector::new(config.size, config.source_hfov);
    let warped = views
        .views
        .par_iter()
        .zip(angles.par_iter())
        .filter_map(|(view, angle)| view.as_ref().map(|view| (view, angle)))
        .map(|(view, angle)| -> Result<WarpedView, RasterError> {
            let source = prepare_source(config, params, view)?;
            Ok(projector.project(&source, angle, params.interpolation, params.validity))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let panorama = combine_views(&warped, params.policy)?;
    info!(
        location,
        views = warped.len(),
        width = config.size.width(),
        "synthesized panorama"
    );

    Ok(panorama.into_raster())
}

/// Applies depth correction and the crop window to a source view.
fn prepare_source(
    config: &PanoConfig,
    params: &ModalityParams,
    view: &Raster,
) -> Result<Raster, RasterError> {
    let corrected;
    let view = match params.correct_depth {
        true => {
            corrected = correct_depth_distortion(view, config.source_hfov);
            &corrected
        }
        false => view,
    };

    match &config.crop {
        Some(crop) => view.crop(crop.rows.clone(), crop.cols.clone()),
        None => Ok(view.clone()),
    }
}

/// Builds the panorama of every location in `locations` in parallel.
///
/// `load` supplies the views of a location. Each location succeeds or fails
/// on its own, and results keep the order of `locations`.
pub fn synthesize_scan<F, E>(
    config: &PanoConfig,
    params: &ModalityParams,
    poses: &PoseTable,
    locations: &[String],
    load: F,
) -> Vec<(String, Result<Raster, E>)>
where
    F: Fn(&str) -> Result<LocationViews, E> + Sync,
    E: From<PanoError> + Send,
{
    locations
        .par_iter()
        .map(|location| {
            let result = load(location).and_then(|views| {
                synthesize_location(config, params, poses, &views).map_err(E::from)
            });
            (location.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{CropWindow, EquirectSize},
        pose::{CameraPose, GRID_ROWS},
    };
    use nalgebra::Rotation3;

    fn poses(location: &str) -> PoseTable {
        let mut table = PoseTable::new();
        for row in 0..GRID_ROWS {
            for ori in 0..GRID_ORIENTATIONS {
                let rotation = Rotation3::from_euler_angles(
                    0.5 * (row as f64 - 1.0),
                    0.0,
                    -(ori as f64) * std::f64::consts::FRAC_PI_3,
                );
                table.insert(
                    ViewKey::new(location, row, ori),
                    CameraPose::new(rotation.to_homogeneous()),
                );
            }
        }
        table
    }

    fn config() -> PanoConfig {
        PanoConfig {
            crop: None,
            ..PanoConfig::new(EquirectSize::from_width(64))
        }
    }

    #[test]
    fn views_fill_grid_slots() {
        let mut views = LocationViews::new("loc");
        assert_eq!(views.missing().count(), VIEWS_PER_LOCATION);

        views.insert(1, 3, Raster::new(2, 2, 1)).unwrap();
        assert_eq!(views.len(), 1);
        assert!(views.get(1, 3).is_some());
        assert!(!views.missing().any(|slot| slot == (1, 3)));
        assert!(views.insert(3, 0, Raster::new(2, 2, 1)).is_err());
    }

    #[test]
    fn missing_pose_fails_location() {
        let mut views = LocationViews::new("other");
        views.insert(0, 0, Raster::filled(8, 8, 1, 1.0)).unwrap();
        let result = synthesize_location(
            &config(),
            &ModalityParams::from_flags(false, false),
            &poses("loc"),
            &views,
        );
        assert!(matches!(
            result,
            Err(PanoError::Pose(PoseError::MissingPose { .. }))
        ));
    }

    #[test]
    fn empty_location_is_an_error() {
        let result = synthesize_location(
            &config(),
            &ModalityParams::from_flags(true, false),
            &poses("loc"),
            &LocationViews::new("loc"),
        );
        assert!(matches!(result, Err(PanoError::NoViews { .. })));
    }

    #[test]
    fn uniform_views_give_uniform_panorama() {
        let mut views = LocationViews::new("loc");
        for row in 0..GRID_ROWS {
            for ori in 0..GRID_ORIENTATIONS {
                views.insert(row, ori, Raster::filled(24, 32, 1, 40.0)).unwrap();
            }
        }

        let pano = synthesize_location(
            &config(),
            &ModalityParams::from_flags(true, false),
            &poses("loc"),
            &views,
        )
        .unwrap();

        assert_eq!((pano.rows(), pano.cols()), (32, 64));
        // Rows close to the horizon are covered by the middle ring.
        for col in 0..64 {
            approx::assert_relative_eq!(pano.get(16, col, 0), 40.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn crop_window_drops_pixels_outside_it() {
        let config = PanoConfig {
            crop: Some(CropWindow {
                rows: 0..12,
                cols: 0..16,
            }),
            ..PanoConfig::new(EquirectSize::from_width(64))
        };
        let mut views = LocationViews::new("loc");
        let view = Raster::from_fn(24, 32, 1, |r, c, _| match r < 12 && c < 16 {
            true => 5.0,
            false => 9.0,
        });
        views.insert(1, 3, view).unwrap();

        let pano = synthesize_location(
            &config,
            &ModalityParams::from_flags(false, false),
            &poses("loc"),
            &views,
        )
        .unwrap();

        assert!(pano.as_slice().iter().all(|&v| v == 0.0 || v == 5.0));
        assert!(pano.as_slice().contains(&5.0));
    }

    #[test]
    fn depth_is_corrected_before_cropping() {
        let config = PanoConfig {
            crop: Some(CropWindow {
                rows: 0..6,
                cols: 0..10,
            }),
            ..PanoConfig::default()
        };
        let params = ModalityParams::from_flags(false, true);
        let source = prepare_source(&config, &params, &Raster::filled(10, 16, 1, 1000.0)).unwrap();

        assert_eq!((source.rows(), source.cols()), (6, 10));
        // The center of the full frame keeps its depth, the center of the
        // window does not.
        assert_eq!(source.get(5, 8, 0), 1000.0);
        assert!(source.get(3, 5, 0) > 1000.0);
    }

    #[test]
    fn scan_failures_stay_with_their_location() {
        let locations = vec!["loc".to_string(), "broken".to_string()];
        let results = synthesize_scan(
            &config(),
            &ModalityParams::from_flags(false, false),
            &poses("loc"),
            &locations,
            |location| {
                let mut views = LocationViews::new(location);
                views.insert(1, 3, Raster::filled(24, 32, 1, 5.0))?;
                Ok::<_, PanoError>(views)
            },
        );

        assert_eq!(results[0].0, "loc");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "broken");
        assert!(results[1].1.is_err());
    }
}
