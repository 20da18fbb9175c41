//! Equirectangular Panorama Synthesis
//!
//! Builds 360 x 180 degree panoramas from the tilted ring of perspective views
//! captured at each location of a Matterport scan, and from cube map skyboxes.

pub mod angle;
pub mod composite;
pub mod config;
pub mod dataset;
pub mod depth;
pub mod pipeline;
pub mod pose;
pub mod projection;
pub mod raster;
pub mod skybox;
pub mod warp;

pub use angle::{ViewAngle, resolve_view_angles};
pub use composite::{CompositePolicy, Panorama, combine_views};
pub use config::{EquirectSize, Modality, ModalityParams, PanoConfig};
pub use pipeline::{LocationViews, PanoError, synthesize_location, synthesize_scan};
pub use pose::{PoseError, PoseTable, ViewKey};
pub use raster::{Raster, RasterError};
