use clap::Parser;
use matterpano::{
    config::{DEFAULT_HFOV_RAD, EquirectSize, Modality, PanoConfig},
    dataset::{ScanLayout, TEST_SCANS, list_scans, process_modality},
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use uom::si::{angle::radian, f64::Angle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Root of the unpacked Matterport3D dataset.
    #[arg(long)]
    m3d_path: PathBuf,

    /// Directory panoramas are written to.
    #[arg(long)]
    out_path: PathBuf,

    /// Width of the panoramas. Height is half of it.
    #[arg(long, default_value_t = 1024)]
    out_width: usize,

    /// Image kinds to convert.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [Modality::Color])]
    types: Vec<Modality>,

    /// Only process this scan instead of every scan below `m3d_path`.
    #[arg(long)]
    scan_id: Option<String>,

    /// Process the scans of the test split instead of every scan below
    /// `m3d_path`.
    #[arg(long, conflicts_with = "scan_id")]
    all_test_scans: bool,

    /// Keep planar depth instead of converting it to range.
    #[arg(long)]
    no_warp_depth: bool,

    /// Horizontal field of view of the source views in radians.
    #[arg(long, default_value_t = DEFAULT_HFOV_RAD)]
    hfov: f64,

    /// Project the full source views instead of the default crop window.
    #[arg(long)]
    no_crop: bool,
}

fn main() -> ExitCode {
    // Register an event subscriber that prints events to STDOUT.
    let subscriber = tracing_subscriber::FmtSubscriber::new();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let args = Args::parse();

    let mut config = PanoConfig::new(EquirectSize::from_width(args.out_width));
    config.source_hfov = Angle::new::<radian>(args.hfov);
    if args.no_crop {
        config.crop = None;
    }

    let scans = match &args.scan_id {
        Some(scan_id) => vec![scan_id.clone()],
        None if args.all_test_scans => TEST_SCANS.iter().map(|s| s.to_string()).collect(),
        None => match list_scans(&args.m3d_path) {
            Ok(scans) => scans,
            Err(err) => {
                error!("{err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let mut failures = 0;
    for scan_id in &scans {
        let layout = ScanLayout::new(&args.m3d_path, scan_id);
        for &modality in &args.types {
            let params = modality.params().with_depth_correction(
                modality == Modality::Depth && !args.no_warp_depth,
            );

            let results = match process_modality(&layout, &args.out_path, &config, modality, &params) {
                Ok(results) => results,
                Err(err) => {
                    error!(scan = scan_id.as_str(), ?modality, "{err}");
                    failures += 1;
                    continue;
                }
            };

            for (location, result) in results {
                match result {
                    Ok(path) => info!("wrote {}", path.display()),
                    Err(err) => {
                        error!(scan = scan_id.as_str(), location, ?modality, "{err}");
                        failures += 1;
                    }
                }
            }
        }
    }

    match failures {
        0 => ExitCode::SUCCESS,
        _ => {
            error!("{failures} panoramas or scans failed");
            ExitCode::FAILURE
        }
    }
}
