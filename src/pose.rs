//! Camera-to-world poses of a scan.

use nalgebra::{Matrix3, Matrix4};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, BufRead},
    path::Path,
    str::FromStr,
};
use thiserror::Error;
use tracing::warn;

/// Number of tilt rows captured at each location.
pub const GRID_ROWS: usize = 3;

/// Number of views in the ring of each row.
pub const GRID_ORIENTATIONS: usize = 6;

/// Number of views captured at each location.
pub const VIEWS_PER_LOCATION: usize = GRID_ROWS * GRID_ORIENTATIONS;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("no pose for location `{location}` row {row} orientation {orientation}")]
    MissingPose {
        location: String,
        row: usize,
        orientation: usize,
    },
    #[error("`{0}` is not a `<location>_<kind><row>_<orientation>` view identifier")]
    InvalidIdentifier(String),
    #[error("malformed pose record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("pose of view {0} is not invertible")]
    Singular(ViewKey),
    #[error("failed to read pose file: {0}")]
    Io(#[from] io::Error),
}

/// Identifies one view of a scan.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewKey {
    location: String,
    row: usize,
    orientation: usize,
}

impl ViewKey {
    pub fn new(location: impl Into<String>, row: usize, orientation: usize) -> Self {
        Self {
            location: location.into(),
            row,
            orientation,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn orientation(&self) -> usize {
        self.orientation
    }

    /// Position of this view in row major view order, or `None` if the view
    /// lies outside the capture grid.
    pub fn view_index(&self) -> Option<usize> {
        (self.row < GRID_ROWS && self.orientation < GRID_ORIENTATIONS)
            .then_some(self.row * GRID_ORIENTATIONS + self.orientation)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.row, self.orientation)
    }
}

/// Parses identifiers such as `17e5d1bd0b5b4e3c9ef0d2b1f0a6c5f2_d1_3.png`.
///
/// The second field carries a one letter image kind before the row index and
/// the third field is the orientation, optionally followed by an extension.
impl FromStr for ViewKey {
    type Err = PoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PoseError::InvalidIdentifier(s.to_string());

        let mut fields = s.splitn(3, '_');
        let (Some(location), Some(row), Some(orientation)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid());
        };

        let row = row
            .get(1..)
            .and_then(|row| row.parse().ok())
            .ok_or_else(invalid)?;
        let orientation = orientation
            .split('.')
            .next()
            .and_then(|ori| ori.parse().ok())
            .ok_or_else(invalid)?;

        if location.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(location, row, orientation))
    }
}

/// A rigid camera-to-world transform.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraPose {
    matrix: Matrix4<f64>,
}

impl CameraPose {
    pub fn new(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::new(Matrix4::identity())
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// Rotation block of the inverted transposed transform.
    ///
    /// Returns `None` if the transform is singular.
    pub fn rotation(&self) -> Option<Matrix3<f64>> {
        let inverse = self.matrix.transpose().try_inverse()?;
        Some(inverse.fixed_view::<3, 3>(0, 0).into_owned())
    }
}

/// Every pose of a scan, indexed by view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseTable {
    poses: BTreeMap<ViewKey, CameraPose>,
}

impl PoseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a pose file from `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PoseError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// Reads `scan` records from `reader`.
    ///
    /// Records of any other type are ignored. Malformed `scan` records are
    /// logged and skipped so that only the location they belong to fails
    /// later on with a missing pose.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, PoseError> {
        let mut table = Self::new();
        for (i, line) in reader.lines().enumerate() {
            match parse_record(i + 1, &line?) {
                Ok(Some((key, pose))) => table.insert(key, pose),
                Ok(None) => {}
                Err(err) => warn!("skipping pose record: {err}"),
            }
        }

        Ok(table)
    }

    pub fn insert(&mut self, key: ViewKey, pose: CameraPose) {
        self.poses.insert(key, pose);
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn get(
        &self,
        location: &str,
        row: usize,
        orientation: usize,
    ) -> Result<&CameraPose, PoseError> {
        self.poses
            .get(&ViewKey::new(location, row, orientation))
            .ok_or_else(|| PoseError::MissingPose {
                location: location.to_string(),
                row,
                orientation,
            })
    }

    /// Location identifiers in ascending order.
    pub fn locations(&self) -> impl Iterator<Item = &str> {
        let mut last: Option<&str> = None;
        self.poses.keys().filter_map(move |key| {
            let location = key.location();
            match last == Some(location) {
                true => None,
                false => {
                    last = Some(location);
                    Some(location)
                }
            }
        })
    }

    /// Collects the full capture grid of `location`.
    pub fn location(&self, location: &str) -> Result<LocationPoses, PoseError> {
        let poses = (0..GRID_ROWS)
            .flat_map(|row| (0..GRID_ORIENTATIONS).map(move |ori| (row, ori)))
            .map(|(row, ori)| self.get(location, row, ori).copied())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LocationPoses {
            location: location.to_string(),
            poses,
        })
    }
}

impl FromStr for PoseTable {
    type Err = PoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_reader(s.as_bytes())
    }
}

/// The poses of all views of one location in row major view order.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationPoses {
    location: String,
    poses: Vec<CameraPose>,
}

impl LocationPoses {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn pose(&self, row: usize, orientation: usize) -> &CameraPose {
        &self.poses[row * GRID_ORIENTATIONS + orientation]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ViewKey, &CameraPose)> {
        self.poses.iter().enumerate().map(|(i, pose)| {
            (
                ViewKey::new(
                    self.location.as_str(),
                    i / GRID_ORIENTATIONS,
                    i % GRID_ORIENTATIONS,
                ),
                pose,
            )
        })
    }
}

/// Parses one line of a pose file.
///
/// Returns `Ok(None)` for records that are not `scan` records.
fn parse_record(line: usize, record: &str) -> Result<Option<(ViewKey, CameraPose)>, PoseError> {
    let tokens: Vec<&str> = record.split_whitespace().collect();
    if tokens.first() != Some(&"scan") {
        return Ok(None);
    }

    let malformed = |reason: String| PoseError::Malformed { line, reason };
    if tokens.len() < 19 {
        return Err(malformed(format!(
            "expected 19 fields but found {}",
            tokens.len()
        )));
    }

    let key: ViewKey = tokens[1]
        .parse()
        .map_err(|err: PoseError| malformed(err.to_string()))?;
    let values = tokens[3..19]
        .iter()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|err| malformed(format!("`{token}`: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some((key, CameraPose::new(Matrix4::from_row_slice(&values)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RECORD: &str = "scan abc_d1_3.png abc_i1_3.jpg 1 2 3 4 5 6 7 8 9 10 11 12 0 0 0 1";

    #[rstest]
    #[case("abc_d1_3.png", "abc", 1, 3)]
    #[case("abc_i2_5.jpg", "abc", 2, 5)]
    #[case("abc_i0_0", "abc", 0, 0)]
    fn parse_identifier(
        #[case] identifier: &str,
        #[case] location: &str,
        #[case] row: usize,
        #[case] orientation: usize,
    ) {
        assert_eq!(
            identifier.parse::<ViewKey>().unwrap(),
            ViewKey::new(location, row, orientation)
        );
    }

    #[rstest]
    #[case("abc")]
    #[case("abc_d1")]
    #[case("abc_dx_3.png")]
    #[case("abc_d1_x.png")]
    #[case("_d1_3.png")]
    fn reject_identifier(#[case] identifier: &str) {
        assert!(identifier.parse::<ViewKey>().is_err());
    }

    #[test]
    fn record_is_row_major() {
        let (key, pose) = parse_record(1, RECORD).unwrap().unwrap();
        assert_eq!(key, ViewKey::new("abc", 1, 3));
        assert_eq!(pose.matrix()[(0, 1)], 2.0);
        assert_eq!(pose.matrix()[(1, 0)], 5.0);
        assert_eq!(pose.matrix()[(3, 3)], 1.0);
    }

    #[test]
    fn other_records_are_ignored() {
        let table: PoseTable = "dataset matterport\nintrinsics_matrix 1 0 0 0 1 0 0 0 1\n"
            .parse()
            .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn short_record_is_malformed() {
        assert!(matches!(
            parse_record(7, "scan abc_d1_3.png abc_i1_3.jpg 1 2 3"),
            Err(PoseError::Malformed { line: 7, .. })
        ));
    }

    #[test]
    fn malformed_record_only_affects_its_location() {
        let mut file = String::new();
        for location in ["aaa", "bbb"] {
            for row in 0..GRID_ROWS {
                for ori in 0..GRID_ORIENTATIONS {
                    let value = match (location, row, ori) {
                        ("aaa", 0, 0) => "oops",
                        _ => "1",
                    };
                    file.push_str(&format!(
                        "scan {location}_d{row}_{ori}.png {location}_i{row}_{ori}.jpg \
                         {value} 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1\n"
                    ));
                }
            }
        }

        let table: PoseTable = file.parse().unwrap();
        assert_eq!(table.len(), 2 * VIEWS_PER_LOCATION - 1);
        assert_eq!(table.locations().collect::<Vec<_>>(), vec!["aaa", "bbb"]);
        assert!(matches!(
            table.location("aaa"),
            Err(PoseError::MissingPose { row: 0, orientation: 0, .. })
        ));
        assert!(table.location("bbb").is_ok());
    }

    #[test]
    fn missing_pose_message() {
        let err = PoseTable::new().get("abc", 1, 4).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"no pose for location `abc` row 1 orientation 4");
    }

    #[test]
    fn rotation_of_rigid_transform() {
        let rotation = nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let mut matrix = rotation.to_homogeneous();
        matrix[(0, 3)] = 4.0;
        matrix[(1, 3)] = -2.0;
        matrix[(2, 3)] = 1.5;

        let result = CameraPose::new(matrix).rotation().unwrap();
        approx::assert_relative_eq!(result, *rotation.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn singular_transform_has_no_rotation() {
        assert_eq!(CameraPose::new(Matrix4::zeros()).rotation(), None);
    }
}
