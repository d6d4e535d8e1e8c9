use nalgebra::Vector3;
use rstest::*;
use submapfusion::{
    camera::CameraIntrinsics,
    image::DepthFrame,
    synthetic::SyntheticScene,
    transform::Transform,
    volume::{DenseTsdf, TsdfVolume, VolumeKind, VolumeParams, VoxelVolume},
};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_simple_intrinsic(50.0, 50.0, 31.5, 23.5)
}

fn params(kind: VolumeKind) -> VolumeParams {
    VolumeParams {
        kind,
        resolution: [64; 3],
        unit_resolution: 8,
        volume_size: 3.2,
        origin: [-1.6, -1.6, 0.2],
        voxel_size: 0.05,
        truncation_distance: 0.2,
        max_weight: 16,
        depth_trunc_threshold: 0.0,
        raycast_step_factor: 0.5,
        max_active_units: 20000,
    }
}

#[fixture]
fn wall_frame() -> DepthFrame {
    SyntheticScene::wall(1.5).render_depth(&intrinsics(), WIDTH, HEIGHT, &Transform::eye(), 0)
}

#[rstest]
#[case(VolumeKind::Tsdf)]
#[case(VolumeKind::HashTsdf)]
fn raycast_reproduces_plane(wall_frame: DepthFrame, #[case] kind: VolumeKind) {
    let mut volume = VoxelVolume::new(params(kind)).unwrap();
    volume.integrate(&wall_frame, &Transform::eye()).unwrap();

    let surface = volume.raycast(&Transform::eye(), &intrinsics(), WIDTH, HEIGHT);
    assert!(surface.coverage() > 0.8, "{}", surface.coverage());
    for row in 0..HEIGHT {
        for col in 0..WIDTH {
            if let Some(point) = surface.get_point(row, col) {
                assert!((point[2] - 1.5).abs() < 0.05, "{row} {col}: {point}");
                if let Some(normal) = surface.get_normal(row, col).filter(|n| n.norm() > 0.5) {
                    assert!(normal[2] < -0.9);
                }
            }
        }
    }
}

#[rstest]
#[case(VolumeKind::Tsdf)]
#[case(VolumeKind::HashTsdf)]
fn raycast_is_idempotent(wall_frame: DepthFrame, #[case] kind: VolumeKind) {
    let mut volume = VoxelVolume::new(params(kind)).unwrap();
    volume.integrate(&wall_frame, &Transform::eye()).unwrap();

    let pose = Transform::from_translation(&Vector3::new(0.1, -0.05, 0.2));
    let first = volume.raycast(&pose, &intrinsics(), WIDTH, HEIGHT);
    let second = volume.raycast(&pose, &intrinsics(), WIDTH, HEIGHT);
    assert_eq!(first.points, second.points);
    assert_eq!(first.normals, second.normals);
    assert_eq!(first.mask, second.mask);
}

#[rstest]
#[case(VolumeKind::Tsdf)]
#[case(VolumeKind::HashTsdf)]
fn raycast_keeps_field_of_view_at_other_sizes(wall_frame: DepthFrame, #[case] kind: VolumeKind) {
    let mut volume = VoxelVolume::new(params(kind)).unwrap();
    volume.integrate(&wall_frame, &Transform::eye()).unwrap();

    let sized = intrinsics().with_size(WIDTH, HEIGHT);
    let half = volume.raycast(&Transform::eye(), &sized, WIDTH / 2, HEIGHT / 2);
    assert_eq!((half.width(), half.height()), (WIDTH / 2, HEIGHT / 2));

    // Column 28 of the half image sees what column 56 of the full one sees.
    let point = half.get_point(12, 28).unwrap();
    let expected_x = (28.0 - 15.75) / 25.0 * 1.5;
    assert!((point[0] - expected_x).abs() < 0.05, "{point}");
    assert!((point[2] - 1.5).abs() < 0.05, "{point}");
}

#[rstest]
fn weights_never_decrease(wall_frame: DepthFrame) {
    let params = params(VolumeKind::Tsdf);
    let max_weight = params.max_weight;
    let mut volume = DenseTsdf::new(params);
    let weights = |volume: &DenseTsdf| -> Vec<u32> {
        let mut weights = Vec::new();
        for x in 0..64 {
            for y in 0..64 {
                for z in 0..64 {
                    weights.push(volume.get(x, y, z).map(|voxel| voxel.weight).unwrap_or(0));
                }
            }
        }
        weights
    };

    let mut previous = weights(&volume);
    for i in 0..20 {
        let pose = Transform::from_translation(&Vector3::new(0.002 * i as f32, 0.0, 0.0));
        volume.integrate(&wall_frame, &pose).unwrap();
        let current = weights(&volume);
        assert!(previous
            .iter()
            .zip(current.iter())
            .all(|(before, after)| after >= before && *after <= max_weight));
        previous = current;
    }
    assert!(previous.iter().any(|weight| *weight == max_weight));
}

#[rstest]
#[case(VolumeKind::Tsdf)]
#[case(VolumeKind::HashTsdf)]
fn reset_matches_fresh_volume(wall_frame: DepthFrame, #[case] kind: VolumeKind) {
    let mut volume = VoxelVolume::new(params(kind)).unwrap();
    volume.integrate(&wall_frame, &Transform::eye()).unwrap();
    assert!(volume.fetch_points_normals().next().is_some());

    volume.reset();
    assert_eq!(volume.observed_voxels(), 0);
    assert!(volume.fetch_points_normals().next().is_none());
    assert!(volume.sdf_at(&Vector3::new(0.0, 0.0, 1.45)).is_none());

    let fresh = VoxelVolume::new(params(kind)).unwrap();
    assert_eq!(volume.active_units(), fresh.active_units());
}

#[rstest]
fn layouts_agree(wall_frame: DepthFrame) {
    let mut dense = VoxelVolume::new(params(VolumeKind::Tsdf)).unwrap();
    let mut hashed = VoxelVolume::new(params(VolumeKind::HashTsdf)).unwrap();
    dense.integrate(&wall_frame, &Transform::eye()).unwrap();
    hashed.integrate(&wall_frame, &Transform::eye()).unwrap();

    for z in [1.38, 1.45, 1.5, 1.57] {
        let point = Vector3::new(0.1, -0.1, z);
        let (a, b) = (dense.sdf_at(&point).unwrap(), hashed.sdf_at(&point).unwrap());
        assert!((a - b).abs() < 0.01, "{z}: {a} {b}");
        assert!((a - (1.5 - z)).abs() < 0.02, "{z}: {a}");
    }

    let exported = |volume: &VoxelVolume| {
        volume
            .fetch_points_normals()
            .filter(|(point, _)| point[0].abs() < 0.5 && point[1].abs() < 0.5)
            .count()
    };
    assert!(exported(&dense) > 0);
    assert!(exported(&hashed) > 0);
}
