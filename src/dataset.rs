//! Reading Matterport scans from disk and writing their panoramas.

use crate::{
    config::{Modality, ModalityParams, PanoConfig},
    pipeline::{LocationViews, PanoError, synthesize_scan},
    pose::{PoseError, PoseTable, ViewKey},
    raster::{Raster, RasterError},
    skybox::{SkyboxFaces, skybox_to_equirect},
};
use image::DynamicImage;
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to access `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read or write image `{path}`")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error(transparent)]
    Pano(#[from] PanoError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("skybox of location `{location}` has {found} faces instead of 6")]
    IncompleteSkybox { location: String, found: usize },
}

impl ScanError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn image(path: &Path) -> impl FnOnce(image::ImageError) -> Self + '_ {
        move |source| ScanError::Image {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Scans of the Matterport3D test split.
pub const TEST_SCANS: [&str; 18] = [
    "2t7WUuJeko7",
    "5ZKStnWn8Zo",
    "ARNzJeq3xxb",
    "fzynW3qQPVF",
    "jtcxE69GiFV",
    "pa4otMbVnkk",
    "q9vSo1VnCiC",
    "rqfALeAoiTq",
    "UwV83HsGsw3",
    "wc2JMjhGNzB",
    "WYY7iVyf5p8",
    "YFuZgdQ5vWj",
    "yqstnuAEVhm",
    "YVUC4YcDtcY",
    "gxdoqLR6rwA",
    "gYvKGZ5eRqb",
    "RPmz2sHmrrY",
    "Vt2qJdWjCF2",
];

/// Directory layout of one unpacked scan.
///
/// Inputs live in `<root>/<scan>/<scan>/<modality dir>/`, panoramas are
/// written to `<out>/<scan>/<modality dir>/<location>.png`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanLayout {
    root: PathBuf,
    scan_id: String,
}

impl ScanLayout {
    pub fn new(root: impl Into<PathBuf>, scan_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            scan_id: scan_id.into(),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn scan_dir(&self) -> PathBuf {
        self.root.join(&self.scan_id).join(&self.scan_id)
    }

    pub fn source_dir(&self, modality: Modality) -> PathBuf {
        self.scan_dir().join(modality.dir_name())
    }

    pub fn pose_file(&self) -> PathBuf {
        self.scan_dir()
            .join("undistorted_camera_parameters")
            .join(format!("{}.conf", self.scan_id))
    }

    pub fn output_dir(&self, out: &Path, modality: Modality) -> PathBuf {
        out.join(&self.scan_id).join(modality.dir_name())
    }

    pub fn output_path(&self, out: &Path, modality: Modality, location: &str) -> PathBuf {
        self.output_dir(out, modality).join(format!("{location}.png"))
    }
}

/// Names of every scan directory below `root`, sorted.
pub fn list_scans(root: &Path) -> Result<Vec<String>, ScanError> {
    let mut scans = Vec::new();
    for entry in fs::read_dir(root).map_err(ScanError::io(root))? {
        let entry = entry.map_err(ScanError::io(root))?;
        if entry.path().is_dir() {
            scans.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    scans.sort();

    Ok(scans)
}

/// Files in `dir` with the given extension, sorted by name.
fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(ScanError::io(dir))? {
        let path = entry.map_err(ScanError::io(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// Groups the view images in `dir` by location.
///
/// File names that are not view identifiers, or that name a view outside the
/// capture grid, are skipped.
pub fn discover_views(
    dir: &Path,
    extension: &str,
) -> Result<BTreeMap<String, Vec<(ViewKey, PathBuf)>>, ScanError> {
    let mut locations: BTreeMap<String, Vec<(ViewKey, PathBuf)>> = BTreeMap::new();
    for path in files_with_extension(dir, extension)? {
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let key: ViewKey = match name.parse() {
            Ok(key) => key,
            Err(err) => {
                debug!("ignoring `{}`: {err}", path.display());
                continue;
            }
        };
        if key.view_index().is_none() {
            warn!(view = %key, "view lies outside the capture grid");
            continue;
        }

        locations
            .entry(key.location().to_string())
            .or_default()
            .push((key, path));
    }

    Ok(locations)
}

/// Groups skybox face images in `dir` by location, faces in name order.
pub fn discover_skyboxes(
    dir: &Path,
    extension: &str,
) -> Result<BTreeMap<String, Vec<PathBuf>>, ScanError> {
    let mut locations: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in files_with_extension(dir, extension)? {
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let Some((location, _)) = name.split_once('_') else {
            debug!("ignoring `{}`", path.display());
            continue;
        };

        locations.entry(location.to_string()).or_default().push(path);
    }

    Ok(locations)
}

pub fn load_raster(path: &Path) -> Result<Raster, ScanError> {
    let image = image::open(path).map_err(ScanError::image(path))?;
    Ok(Raster::from_image(&image))
}

/// Reads the views of one location into their grid slots.
pub fn load_location(location: &str, views: &[(ViewKey, PathBuf)]) -> Result<LocationViews, ScanError> {
    let mut slots = LocationViews::new(location);
    for (key, path) in views {
        slots.insert(key.row(), key.orientation(), load_raster(path)?)?;
    }

    Ok(slots)
}

/// Converts a panorama into the image format of `modality`.
///
/// Depth is written as 16-bit gray. Other single channel rasters become 8-bit
/// gray and three channel rasters 8-bit RGB.
pub fn encode(modality: Modality, raster: &Raster) -> Result<DynamicImage, RasterError> {
    match (modality, raster.channels()) {
        (Modality::Depth, _) => raster.to_luma16().map(DynamicImage::ImageLuma16),
        (_, 1) => raster.to_luma8().map(DynamicImage::ImageLuma8),
        _ => raster.to_rgb8().map(DynamicImage::ImageRgb8),
    }
}

fn write_panorama(path: &Path, modality: Modality, raster: &Raster) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ScanError::io(parent))?;
    }
    encode(modality, raster)?
        .save(path)
        .map_err(ScanError::image(path))
}

/// Outcome of one location: the written panorama or why it failed.
pub type LocationResult = (String, Result<PathBuf, ScanError>);

/// Synthesizes and writes the panoramas of one modality of a scan.
///
/// Returns an error only if the scan itself cannot be read. Failures of
/// single locations are reported in the returned list.
pub fn process_modality(
    layout: &ScanLayout,
    out: &Path,
    config: &PanoConfig,
    modality: Modality,
    params: &ModalityParams,
) -> Result<Vec<LocationResult>, ScanError> {
    let source = layout.source_dir(modality);
    info!(
        scan = layout.scan_id(),
        ?modality,
        "processing `{}`",
        source.display()
    );

    if modality == Modality::Skybox {
        return process_skyboxes(layout, out, config, params);
    }

    let poses = PoseTable::open(layout.pose_file())?;
    let discovered = discover_views(&source, modality.extension())?;
    let locations: Vec<String> = discovered.keys().cloned().collect();

    let panoramas = synthesize_scan(config, params, &poses, &locations, |location| {
        load_location(location, &discovered[location])
    });

    Ok(panoramas
        .into_par_iter()
        .map(|(location, result)| {
            let written = result.and_then(|raster| {
                let path = layout.output_path(out, modality, &location);
                write_panorama(&path, modality, &raster)?;
                Ok(path)
            });
            (location, written)
        })
        .collect())
}

fn process_skyboxes(
    layout: &ScanLayout,
    out: &Path,
    config: &PanoConfig,
    params: &ModalityParams,
) -> Result<Vec<LocationResult>, ScanError> {
    let modality = Modality::Skybox;
    let discovered = discover_skyboxes(&layout.source_dir(modality), modality.extension())?;

    Ok(discovered
        .into_par_iter()
        .map(|(location, paths)| {
            let written = (|| -> Result<PathBuf, ScanError> {
                let rasters = paths
                    .iter()
                    .map(|path| load_raster(path))
                    .collect::<Result<Vec<_>, _>>()?;
                let faces = SkyboxFaces::try_from(rasters).map_err(|rasters| {
                    ScanError::IncompleteSkybox {
                        location: location.clone(),
                        found: rasters.len(),
                    }
                })?;

                let panorama = skybox_to_equirect(&faces, config.size, params)?;
                let path = layout.output_path(out, modality, &location);
                write_panorama(&path, modality, panorama.image())?;
                Ok(path)
            })();
            (location, written)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    #[test]
    fn layout_paths() {
        let layout = ScanLayout::new("/data/m3d", "17DRP5sb8fy");
        assert_eq!(
            layout.pose_file(),
            PathBuf::from(
                "/data/m3d/17DRP5sb8fy/17DRP5sb8fy/undistorted_camera_parameters/17DRP5sb8fy.conf"
            )
        );
        assert_eq!(
            layout.source_dir(Modality::Depth),
            PathBuf::from("/data/m3d/17DRP5sb8fy/17DRP5sb8fy/undistorted_depth_images")
        );
        assert_eq!(
            layout.output_path(Path::new("/out"), Modality::Classes, "abc"),
            PathBuf::from("/out/17DRP5sb8fy/segmentation_maps_classes/abc.png")
        );
    }

    #[test]
    fn views_are_grouped_by_location() {
        let dir = tempdir().unwrap();
        for name in [
            "aaa_d0_0.png",
            "aaa_d2_5.png",
            "bbb_d1_3.png",
            "bbb_d3_0.png",
            "notes.txt",
            "stray.png",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let found = discover_views(dir.path(), "png").unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), ["aaa", "bbb"]);
        assert_eq!(found["aaa"].len(), 2);
        assert_eq!(found["bbb"][0].0, ViewKey::new("bbb", 1, 3));
        assert_eq!(found["bbb"].len(), 1);
    }

    #[test]
    fn skybox_faces_keep_name_order() {
        let dir = tempdir().unwrap();
        for i in (0..6).rev() {
            fs::write(dir.path().join(format!("loc_skybox{i}_sami.jpg")), b"").unwrap();
        }

        let found = discover_skyboxes(dir.path(), "jpg").unwrap();
        let names: Vec<_> = found["loc"]
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names[0], "loc_skybox0_sami.jpg");
        assert_eq!(names[5], "loc_skybox5_sami.jpg");
    }

    #[test]
    fn depth_roundtrips_through_sixteen_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depth.png");
        let raster = Raster::from_fn(4, 6, 1, |r, c, _| (r * 1000 + c) as f32 + 0.7);
        write_panorama(&path, Modality::Depth, &raster).unwrap();

        let loaded = load_raster(&path).unwrap();
        assert_eq!(loaded.channels(), 1);
        assert_eq!(loaded.get(3, 5, 0), 3005.0);
    }

    #[test]
    fn labels_are_written_as_gray() {
        let raster = Raster::filled(2, 3, 1, 17.0);
        let encoded = encode(Modality::Classes, &raster).unwrap();
        assert_eq!(encoded, DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([17]))));
    }

    #[test]
    fn color_needs_three_channels() {
        let raster = Raster::filled(2, 3, 2, 17.0);
        assert!(matches!(
            encode(Modality::Color, &raster),
            Err(RasterError::UnsupportedEncoding { channels: 2, .. })
        ));
    }

    #[test]
    fn unreadable_image_names_its_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();

        let err = load_raster(&path).unwrap_err();
        assert!(err.to_string().contains("broken.png"));
    }
}
