use nalgebra::Vector3;
use rstest::*;
use submapfusion::{
    camera::CameraIntrinsics,
    metrics::TransformMetrics,
    submap::{SubmapId, SubmapParams},
    synthetic::{Primitive, SyntheticScene},
    transform::Transform,
    volume::{VolumeKind, VolumeParams},
    Params, ReconstructionEngine,
};

const STEP: f32 = 0.04;

#[fixture]
fn params() -> Params {
    let (width, height) = (160, 120);
    Params {
        frame_size: [width, height],
        intrinsics: CameraIntrinsics::from_simple_intrinsic(130.0, 130.0, 79.5, 59.5),
        icp_iterations: vec![10, 5, 4],
        volume: VolumeParams {
            kind: VolumeKind::HashTsdf,
            resolution: [256; 3],
            unit_resolution: 8,
            volume_size: 5.12,
            origin: [0.0; 3],
            voxel_size: 0.02,
            truncation_distance: 0.1,
            max_weight: 64,
            depth_trunc_threshold: 4.0,
            raycast_step_factor: 0.5,
            max_active_units: 20000,
        },
        submap: SubmapParams {
            spawn_visibility_threshold: 0.6,
            ..Default::default()
        },
        ..Params::default_params()
    }
}

fn distance_to_scene(scene: &SyntheticScene, point: &Vector3<f32>) -> f32 {
    scene
        .primitives
        .iter()
        .map(|primitive| match primitive {
            Primitive::Plane { normal, offset } => (normal.dot(point) - offset).abs(),
            Primitive::Sphere { center, radius } => ((point - center).norm() - radius).abs(),
        })
        .fold(f32::INFINITY, f32::min)
}

fn pan_pose(frame: usize) -> Transform {
    Transform::from_translation(&Vector3::new(STEP * frame as f32, 0.0, 0.0))
}

/// Frames at which a submap was spawned, after the first one.
fn pan_spawns(params: Params, frames: usize) -> Vec<usize> {
    let scene = SyntheticScene::room();
    let intrinsics = params.intrinsics.clone();
    let (width, height) = (params.width(), params.height());
    let mut engine = ReconstructionEngine::new(params).unwrap();

    let mut spawns = Vec::new();
    for i in 0..frames {
        let frame = scene.render_depth(&intrinsics, width, height, &pan_pose(i), i);
        let status = engine.try_update(&frame).unwrap();
        if i > 0 && status.spawned.is_some() {
            spawns.push(i);
        }
    }
    spawns
}

#[rstest]
fn static_camera_builds_one_submap(params: Params) {
    let scene = SyntheticScene::room();
    let truncation = params.volume.truncation_distance;
    let intrinsics = params.intrinsics.clone();
    let (width, height) = (params.width(), params.height());
    let mut engine = ReconstructionEngine::new(params).unwrap();

    for i in 0..50 {
        let frame = scene.render_depth(&intrinsics, width, height, &Transform::eye(), i);
        assert!(engine.update(&frame), "frame {i}");
    }

    assert_eq!(engine.frame_count(), 50);
    assert_eq!(engine.submaps().len(), 1);
    assert_eq!(engine.pose_graph().len_edges(), 0);

    let drift = TransformMetrics::new(&engine.pose(), &Transform::eye());
    assert!(drift.translation < 0.01, "{drift}");

    let cloud = engine.get_cloud();
    assert!(cloud.len() > 1000, "{}", cloud.len());
    let close = cloud
        .iter()
        .filter(|(point, _)| distance_to_scene(&scene, point) < truncation)
        .count();
    assert!(
        close as f32 >= 0.95 * cloud.len() as f32,
        "{close} of {}",
        cloud.len()
    );
}

#[rstest]
fn panning_spawns_a_linked_submap(params: Params) {
    let scene = SyntheticScene::room();
    let intrinsics = params.intrinsics.clone();
    let (width, height) = (params.width(), params.height());
    let mut engine = ReconstructionEngine::new(params).unwrap();

    let mut spawn_frame = None;
    for i in 0..80 {
        let frame = scene.render_depth(&intrinsics, width, height, &pan_pose(i), i);
        let status = engine.try_update(&frame).unwrap();
        if i > 0 && status.spawned == Some(SubmapId(1)) {
            spawn_frame = Some(i);
            break;
        }
    }

    let spawn_frame = spawn_frame.expect("no submap spawned while panning");
    assert_eq!(engine.submaps().len(), 2);
    assert_eq!(engine.submaps().current_id(), Some(SubmapId(1)));

    let edge = engine
        .pose_graph()
        .edge(SubmapId(0), SubmapId(1))
        .expect("spawn edge");
    let metrics = TransformMetrics::new(&edge.relative_pose, &pan_pose(spawn_frame));
    assert!(metrics.translation < 0.05, "{metrics}");
    assert!(metrics.angle < 0.05, "{metrics}");

    let spawned = engine.submaps().get(SubmapId(1)).unwrap();
    let metrics = TransformMetrics::new(&spawned.pose, &pan_pose(spawn_frame));
    assert!(metrics.translation < 0.05, "{metrics}");

    // Both submaps stay active and receive the frames right after the spawn.
    let mut handed_over = false;
    for i in spawn_frame + 1..spawn_frame + 6 {
        let frame = scene.render_depth(&intrinsics, width, height, &pan_pose(i), i);
        let status = engine.try_update(&frame).unwrap();
        assert_eq!(status.current_submap, SubmapId(1));
        handed_over |= status.integrated == vec![SubmapId(0), SubmapId(1)];
    }
    assert!(handed_over);
    assert_eq!(engine.submaps().len(), 2);
}

#[rstest]
fn reset_starts_over(params: Params) {
    let scene = SyntheticScene::room();
    let intrinsics = params.intrinsics.clone();
    let (width, height) = (params.width(), params.height());
    let mut engine = ReconstructionEngine::new(params).unwrap();

    for i in 0..5 {
        let frame = scene.render_depth(&intrinsics, width, height, &pan_pose(i), i);
        engine.try_update(&frame).unwrap();
    }
    assert!(engine.get_points().nrows() > 0);

    engine.reset();
    assert_eq!(engine.get_points().nrows(), 0);
    assert_eq!(engine.frame_count(), 0);
    assert!(engine.submaps().is_empty());
    assert!(engine.trajectory().is_empty());

    let frame = scene.render_depth(&intrinsics, width, height, &pan_pose(10), 0);
    let status = engine.try_update(&frame).unwrap();
    assert_eq!(status.frame_index, 0);
    assert_eq!(status.spawned, Some(SubmapId(0)));
    assert_eq!(status.camera_pose, Transform::eye());
    assert!(engine.get_points().nrows() > 0);
}

#[rstest]
fn spawns_are_repeatable(params: Params) {
    let first = pan_spawns(params.clone(), 40);
    let second = pan_spawns(params, 40);
    assert_eq!(first, second);
}
