use matterpano::{
    config::{EquirectSize, ModalityParams},
    raster::Raster,
    skybox::{Face, FACE_ORDER, SkyboxFaces, skybox_to_equirect},
};

const FACE_SIZE: usize = 64;

fn color(face: Face) -> [f32; 3] {
    match face {
        Face::Up => [255.0, 0.0, 0.0],
        Face::Back => [0.0, 255.0, 0.0],
        Face::Right => [0.0, 0.0, 255.0],
        Face::Front => [255.0, 255.0, 0.0],
        Face::Left => [0.0, 255.0, 255.0],
        Face::Down => [255.0, 0.0, 255.0],
    }
}

fn solid_faces() -> SkyboxFaces {
    let faces = FACE_ORDER.map(|face| {
        let rgb = color(face);
        Raster::from_fn(FACE_SIZE, FACE_SIZE, 3, |_, _, ch| rgb[ch])
    });
    SkyboxFaces::new(faces)
}

fn face_at(pano: &Raster, row: usize, col: usize) -> Option<Face> {
    FACE_ORDER
        .into_iter()
        .find(|&face| pano.pixel(row, col) == color(face).as_slice())
}

fn labels() -> ModalityParams {
    ModalityParams::from_flags(false, false)
}

#[test]
fn solid_faces_cover_their_regions() {
    let pano = skybox_to_equirect(&solid_faces(), EquirectSize::from_width(1024), &labels())
        .unwrap()
        .into_raster();
    assert_eq!((pano.rows(), pano.cols()), (512, 1024));

    let equator = 256;
    assert_eq!(face_at(&pano, equator, 512), Some(Face::Front));
    assert_eq!(face_at(&pano, equator, 256), Some(Face::Right));
    assert_eq!(face_at(&pano, equator, 0), Some(Face::Back));
    assert_eq!(face_at(&pano, equator, 1023), Some(Face::Back));
    assert_eq!(face_at(&pano, equator, 768), Some(Face::Left));
    for col in [0, 300, 700, 1023] {
        assert_eq!(face_at(&pano, 0, col), Some(Face::Up));
        assert_eq!(face_at(&pano, 511, col), Some(Face::Down));
    }
}

#[test]
fn every_pixel_belongs_to_one_face() {
    let pano = skybox_to_equirect(&solid_faces(), EquirectSize::from_width(1024), &labels())
        .unwrap()
        .into_raster();

    for row in 0..pano.rows() {
        for col in 0..pano.cols() {
            assert!(
                face_at(&pano, row, col).is_some(),
                "pixel ({row}, {col}) is {:?}",
                pano.pixel(row, col)
            );
        }
    }
}

#[test]
fn equator_seams_sit_at_diagonals() {
    let pano = skybox_to_equirect(&solid_faces(), EquirectSize::from_width(1024), &labels())
        .unwrap()
        .into_raster();

    // Azimuth k * PI / 4 falls between columns 128 * (k + 4) - 1 and 128 * (k + 4).
    let seams: Vec<usize> = (1..1024)
        .filter(|&col| face_at(&pano, 256, col) != face_at(&pano, 256, col - 1))
        .collect();
    let expected = [128, 384, 640, 896];
    assert_eq!(seams.len(), expected.len(), "seams at {seams:?}");
    for (seam, expected) in seams.iter().zip(expected) {
        assert!(seam.abs_diff(expected) <= 1, "seam at {seam}, expected {expected}");
    }
}

/// Solid faces, except that `face` is split into two halves of value 255
/// (top or left half) and 128.
fn split_face(split: Face, vertical: bool) -> SkyboxFaces {
    SkyboxFaces::new(FACE_ORDER.map(|face| {
        let rgb = color(face);
        Raster::from_fn(FACE_SIZE, FACE_SIZE, 3, |row, col, ch| {
            let first = match vertical {
                true => row < FACE_SIZE / 2,
                false => col < FACE_SIZE / 2,
            };
            match (face == split, ch, first) {
                (false, _, _) => rgb[ch],
                (true, 0, true) => 255.0,
                (true, 0, false) => 128.0,
                (true, _, _) => 0.0,
            }
        })
    }))
}

fn render(faces: &SkyboxFaces) -> Raster {
    skybox_to_equirect(faces, EquirectSize::from_width(1024), &labels())
        .unwrap()
        .into_raster()
}

#[test]
fn top_face_bottom_edge_adjoins_front() {
    let pano = render(&split_face(Face::Up, true));

    // Above the front face the lower half is visible, above the back face
    // the upper half.
    assert_eq!(pano.pixel(120, 512), &[128.0, 0.0, 0.0]);
    assert_eq!(pano.pixel(60, 0), &[255.0, 0.0, 0.0]);
}

#[test]
fn bottom_face_bottom_edge_adjoins_front() {
    let pano = render(&split_face(Face::Down, true));
    assert_eq!(pano.pixel(391, 512), &[128.0, 0.0, 0.0]);
    assert_eq!(pano.pixel(391, 0), &[255.0, 0.0, 0.0]);
}

#[test]
fn front_face_is_not_mirrored() {
    let pano = render(&split_face(Face::Front, false));
    assert_eq!(pano.pixel(256, 484), &[255.0, 0.0, 0.0]);
    assert_eq!(pano.pixel(256, 540), &[128.0, 0.0, 0.0]);
}

#[test]
fn right_face_is_mirrored() {
    let pano = render(&split_face(Face::Right, false));
    // Left of the face center the right half of the image shows.
    assert_eq!(pano.pixel(256, 240), &[128.0, 0.0, 0.0]);
    assert_eq!(pano.pixel(256, 272), &[255.0, 0.0, 0.0]);
}
