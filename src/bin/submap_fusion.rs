use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;
use nalgebra::Vector3;
use submapfusion::{
    camera::CameraIntrinsics,
    image::IntoImageRgb8,
    metrics::TransformMetrics,
    synthetic::SyntheticScene,
    trajectory::Trajectory,
    transform::Transform,
    volume::{VolumeKind, VolumeParams},
    Params, ReconstructionEngine,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Motion {
    /// The camera does not move.
    Static,
    /// The camera slides sideways along the room.
    Sweep,
}

/// Reconstructs a synthetic room and writes a shaded render of the final surface.
#[derive(Parser)]
struct Args {
    /// Camera motion
    #[clap(value_enum, default_value = "sweep")]
    motion: Motion,
    /// Number of frames to process
    #[clap(long, short, default_value_t = 60)]
    frames: usize,
    /// Camera displacement per frame in meters
    #[clap(long, default_value_t = 0.04)]
    step: f32,
    /// Maximum depth noise in meters
    #[clap(long, default_value_t = 0.0)]
    noise: f32,
    /// JSON file with the engine parameters
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Writes the parameters used to this JSON file
    #[clap(long)]
    save_config: Option<PathBuf>,
    /// Output PNG
    #[clap(long, short, default_value = "render.png")]
    output: PathBuf,
}

fn synthetic_params() -> Params {
    let (width, height) = (320, 240);
    let voxel_size = 0.02;
    Params {
        frame_size: [width, height],
        intrinsics: CameraIntrinsics::from_simple_intrinsic(
            260.0,
            260.0,
            width as f64 / 2.0 - 0.5,
            height as f64 / 2.0 - 0.5,
        ),
        volume: VolumeParams {
            resolution: [256; 3],
            volume_size: voxel_size * 256.0,
            voxel_size,
            truncation_distance: 5.0 * voxel_size,
            raycast_step_factor: 0.5,
            ..VolumeParams::default_params(VolumeKind::HashTsdf)
        },
        ..Params::default_params()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let params = match &args.config {
        Some(path) => Params::from_json_file(path)?,
        None => synthetic_params(),
    };
    if let Some(path) = &args.save_config {
        params.to_json_file(path)?;
    }

    let scene = SyntheticScene::room().with_noise(args.noise, 17);
    let (width, height) = (params.width(), params.height());
    let intrinsics = params.intrinsics.clone();
    let mut engine = ReconstructionEngine::new(params)?;

    let mut gt_trajectory = Trajectory::default();
    let mut dropped = 0;
    for i in 0..args.frames {
        let pose = match args.motion {
            Motion::Static => Transform::eye(),
            Motion::Sweep => {
                Transform::from_translation(&Vector3::new(args.step * i as f32, 0.0, 0.0))
            }
        };
        let frame = scene.render_depth(&intrinsics, width, height, &pose, i);
        match engine.try_update(&frame) {
            Ok(status) => {
                gt_trajectory.push(pose, i as f64);
                if let Some(id) = status.spawned {
                    info!("frame {}: {} started", i, id);
                }
            }
            Err(err) => {
                info!("frame {} dropped: {}", i, err);
                dropped += 1;
            }
        }
    }

    let metrics = TransformMetrics::mean_trajectory_error(engine.trajectory(), &gt_trajectory)?;
    let cloud = engine.get_cloud();
    println!("Frames: {} processed, {} dropped", engine.frame_count(), dropped);
    println!(
        "Submaps: {}, pose graph edges: {}",
        engine.submaps().len(),
        engine.pose_graph().len_edges()
    );
    println!("Surface points: {}", cloud.len());
    println!("Mean trajectory error: {metrics}");

    engine
        .render(None)
        .into_image_rgb8()
        .save(&args.output)?;
    println!("Render written to {}", args.output.display());

    Ok(())
}
