//! Angular offsets of each view relative to the reference view of a location.

use crate::pose::{GRID_ORIENTATIONS, LocationPoses, PoseError};
use nalgebra::{Matrix3, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_3, PI, TAU};
use uom::si::{angle::radian, f64::Angle};

/// Row and orientation of the view that all offsets are measured against.
pub const REFERENCE_VIEW: (usize, usize) = (1, 3);

/// Azimuthal shift aligning the reference view with the skybox convention.
pub const AZIMUTH_OFFSET_RAD: f64 = FRAC_PI_3;

/// Viewing direction of a source view on the panorama sphere.
///
/// Yaw turns right from the panorama center and pitch tilts up from the
/// horizon.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewAngle {
    yaw: Angle,
    pitch: Angle,
}

impl ViewAngle {
    pub fn new(yaw: Angle, pitch: Angle) -> Self {
        Self { yaw, pitch }
    }

    pub fn from_radians(yaw: f64, pitch: f64) -> Self {
        Self::new(Angle::new::<radian>(yaw), Angle::new::<radian>(pitch))
    }

    pub fn yaw(&self) -> Angle {
        self.yaw
    }

    pub fn pitch(&self) -> Angle {
        self.pitch
    }
}

/// Decomposes a rotation matrix into extrinsic x, y, z Euler angles.
///
/// The result `(a, b, c)` satisfies `R = Rz(c) * Ry(b) * Rx(a)`, with
/// `b` in [-PI/2, PI/2]. At gimbal lock `a` is set to zero.
pub fn euler_xyz(rotation: &Matrix3<f64>) -> Vector3<f64> {
    let sin_b = (-rotation[(2, 0)]).clamp(-1.0, 1.0);
    let b = sin_b.asin();

    if sin_b.abs() < 1.0 - 1e-12 {
        Vector3::new(
            rotation[(2, 1)].atan2(rotation[(2, 2)]),
            b,
            rotation[(1, 0)].atan2(rotation[(0, 0)]),
        )
    } else {
        Vector3::new(0.0, b, (-rotation[(0, 1)]).atan2(rotation[(1, 1)]))
    }
}

/// Wraps `angle` into (-PI, PI].
fn wrap(angle: f64) -> f64 {
    match angle > PI || angle <= -PI {
        true => PI - (PI - angle).rem_euclid(TAU),
        false => angle,
    }
}

/// Computes the yaw and pitch of every view of a location.
///
/// Offsets are taken between the Euler angles of the reference view and those
/// of each view, so the reference view itself resolves to
/// `(AZIMUTH_OFFSET_RAD, 0)`. Results are in row major view order.
pub fn resolve_view_angles(poses: &LocationPoses) -> Result<Vec<ViewAngle>, PoseError> {
    let euler = poses
        .iter()
        .map(|(key, pose)| {
            pose.rotation()
                .map(|rotation| euler_xyz(&rotation))
                .ok_or(PoseError::Singular(key))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (ref_row, ref_ori) = REFERENCE_VIEW;
    let reference = euler[ref_row * GRID_ORIENTATIONS + ref_ori];

    Ok(euler
        .iter()
        .map(|view| {
            let yaw = wrap(reference.z - view.z + AZIMUTH_OFFSET_RAD);
            let pitch = -wrap(reference.x - view.x);
            ViewAngle::from_radians(yaw, pitch)
        })
        .collect())
}
