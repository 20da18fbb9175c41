//! Conversion of cube map skyboxes into equirectangular panoramas.

use crate::{
    angle::ViewAngle,
    composite::{Panorama, PanoramaAccumulator},
    config::{EquirectSize, ModalityParams},
    projection::SphericalProjector,
    raster::{Raster, RasterError},
};
use rayon::prelude::*;
use std::f64::consts::{FRAC_PI_2, PI};
use uom::si::{angle::radian, f64::Angle};

/// A face of a skybox cube.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    Up,
    Back,
    Right,
    Front,
    Left,
    Down,
}

/// Order in which faces are stored, matching the sorted file names of a
/// Matterport skybox.
pub const FACE_ORDER: [Face; 6] = [
    Face::Up,
    Face::Back,
    Face::Right,
    Face::Front,
    Face::Left,
    Face::Down,
];

impl Face {
    /// Direction the face is seen from the cube center.
    ///
    /// Faces are placed the way Matterport's own panoramas lay them out,
    /// with the right face left of the front face and the left face to its
    /// right.
    pub fn view_angle(&self) -> ViewAngle {
        let (yaw, pitch) = match self {
            Face::Front => (0.0, 0.0),
            Face::Right => (-FRAC_PI_2, 0.0),
            Face::Back => (PI, 0.0),
            Face::Left => (FRAC_PI_2, 0.0),
            Face::Up => (0.0, FRAC_PI_2),
            Face::Down => (0.0, -FRAC_PI_2),
        };
        ViewAngle::from_radians(yaw, pitch)
    }

    /// Whether the face image is mirrored (left to right, top to bottom)
    /// before projection.
    ///
    /// The right, back and top faces are mirrored left to right and the bottom
    /// face is turned by a half turn. The bottom edges of both the top and the
    /// bottom face then adjoin the front face.
    pub fn mirroring(&self) -> (bool, bool) {
        match self {
            Face::Front | Face::Left => (false, false),
            Face::Right | Face::Back | Face::Up => (true, false),
            Face::Down => (true, true),
        }
    }

    /// Applies [`Face::mirroring`] to a face image.
    pub fn orient(&self, raster: &Raster) -> Raster {
        match self.mirroring() {
            (false, false) => raster.clone(),
            (true, false) => raster.flip_horizontal(),
            (false, true) => raster.flip_vertical(),
            (true, true) => raster.flip_horizontal().flip_vertical(),
        }
    }
}

/// The six faces of one skybox in [`FACE_ORDER`].
#[derive(Clone, Debug, PartialEq)]
pub struct SkyboxFaces {
    faces: [Raster; 6],
}

impl SkyboxFaces {
    pub fn new(faces: [Raster; 6]) -> Self {
        Self { faces }
    }

    pub fn face(&self, face: Face) -> &Raster {
        let index = FACE_ORDER
            .iter()
            .position(|&f| f == face)
            .expect("every face is listed in FACE_ORDER");
        &self.faces[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Face, &Raster)> {
        FACE_ORDER.into_iter().zip(self.faces.iter())
    }
}

impl TryFrom<Vec<Raster>> for SkyboxFaces {
    type Error = Vec<Raster>;

    fn try_from(faces: Vec<Raster>) -> Result<Self, Self::Error> {
        faces.try_into().map(Self::new)
    }
}

/// Field of view of one cube face.
pub fn face_fov() -> Angle {
    Angle::new::<radian>(FRAC_PI_2)
}

/// Projects every face onto an equirectangular grid of `size` and composites
/// them in [`FACE_ORDER`].
pub fn skybox_to_equirect(
    faces: &SkyboxFaces,
    size: EquirectSize,
    params: &ModalityParams,
) -> Result<Panorama, RasterError> {
    let projector = SphericalProjector::new(size, face_fov());
    let warped: Vec<_> = faces
        .faces
        .par_iter()
        .zip(FACE_ORDER.par_iter())
        .map(|(raster, face)| {
            projector.project(
                &face.orient(raster),
                &face.view_angle(),
                params.interpolation,
                params.validity,
            )
        })
        .collect();

    let channels = faces.faces[0].channels();
    let mut acc = PanoramaAccumulator::new(size.height(), size.width(), channels, params.policy);
    for view in &warped {
        acc.add(view)?;
    }

    Ok(acc.finish())
}
