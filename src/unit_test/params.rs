use rstest::fixture;

use crate::{
    camera::CameraIntrinsics,
    params::Params,
    volume::{VolumeKind, VolumeParams},
};

/// 3.2 m dense grid of 5 cm voxels, starting 0.2 m in front of the camera.
#[fixture]
pub fn small_dense_params() -> VolumeParams {
    VolumeParams {
        kind: VolumeKind::Tsdf,
        resolution: [64; 3],
        unit_resolution: 8,
        volume_size: 3.2,
        origin: [-1.6, -1.6, 0.2],
        voxel_size: 0.05,
        truncation_distance: 0.2,
        max_weight: 64,
        depth_trunc_threshold: 0.0,
        raycast_step_factor: 0.5,
        max_active_units: 0,
    }
}

#[fixture]
pub fn small_hashed_params() -> VolumeParams {
    VolumeParams {
        kind: VolumeKind::HashTsdf,
        origin: [0.0; 3],
        depth_trunc_threshold: 4.0,
        max_active_units: 20000,
        ..small_dense_params()
    }
}

/// Engine for 160x120 frames of [`crate::synthetic::SyntheticScene::room`] with a 2 cm hashed volume.
#[fixture]
pub fn small_engine_params() -> Params {
    Params {
        frame_size: [160, 120],
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
        ..Params::default_params()
    }
}
