//! Truncated signed distance volumes.
//!
//! Two layouts share the same contract, [`TsdfVolume`]: [`DenseTsdf`], a fixed grid, and [`HashTsdf`],
//! blocks allocated on demand. [`VoxelVolume`] picks one at construction.
mod params;
pub use params::{VolumeKind, VolumeParams};

mod voxel;
pub use voxel::Voxel;

mod storage;

mod integration;
pub use integration::IntegrationSummary;

mod raycast;

mod dense;
pub use dense::DenseTsdf;

mod hashed;
pub use hashed::{HashTsdf, VoxelBlock};

use nalgebra::Vector3;

use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    error::Result,
    image::DepthFrame,
    range_image::RangeImage,
    transform::Transform,
};

/// Units of a volume that hold observations and how many of them fall inside a camera frustum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitVisibility {
    pub visible: usize,
    pub observed: usize,
}

impl UnitVisibility {
    /// Fraction of the observed units that are visible. A volume without observations is fully visible.
    pub fn ratio(&self) -> f32 {
        if self.observed == 0 {
            1.0
        } else {
            self.visible as f32 / self.observed as f32
        }
    }
}

/// Fusion, query and export of a signed distance field.
/// Poses are camera to volume transforms.
pub trait TsdfVolume {
    fn params(&self) -> &VolumeParams;

    /// Fuses a depth frame seen from `camera_pose`. Only voxels within the truncation band of the
    /// observed surface change. A failed call leaves the volume untouched.
    fn integrate(&mut self, frame: &DepthFrame, camera_pose: &Transform)
        -> Result<IntegrationSummary>;

    /// Marches the rays of a `width` x `height` camera and returns the first surface crossing of each.
    /// Pixels without a crossing have a zero mask.
    fn raycast(
        &self,
        camera_pose: &Transform,
        intrinsics: &CameraIntrinsics,
        width: usize,
        height: usize,
    ) -> RangeImage;

    /// Points and normals of the observed voxels within one voxel of the surface, in the volume frame.
    /// Every call starts a new sequence.
    fn fetch_points_normals(&self)
        -> Box<dyn Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_>;

    /// Returns the volume to its freshly constructed state.
    fn reset(&mut self);

    /// Interpolated signed distance at a point, `None` where unobserved.
    fn sdf_at(&self, point: &Vector3<f32>) -> Option<f32>;

    /// Field normal at a point, `None` where unobserved.
    fn normal_at(&self, point: &Vector3<f32>) -> Option<Vector3<f32>>;

    /// `max_depth`: units farther than it are not visible. Zero disables the limit.
    fn unit_visibility(&self, camera: &PinholeCamera, max_depth: f32) -> UnitVisibility;

    fn observed_voxels(&self) -> usize;

    /// Allocated blocks of a hashed volume, observed bricks of a dense one.
    fn active_units(&self) -> usize;
}

/// A volume of either layout. The layout is resolved once per call,
/// the per-voxel code runs monomorphized over it.
pub enum VoxelVolume {
    Dense(DenseTsdf),
    Hashed(HashTsdf),
}

macro_rules! dispatch {
    ($self:ident, $volume:ident => $call:expr) => {
        match $self {
            VoxelVolume::Dense($volume) => $call,
            VoxelVolume::Hashed($volume) => $call,
        }
    };
}

impl VoxelVolume {
    /// Validates the parameters and builds the layout they name.
    pub fn new(params: VolumeParams) -> Result<Self> {
        params.validate()?;
        Ok(match params.kind {
            VolumeKind::Tsdf => VoxelVolume::Dense(DenseTsdf::new(params)),
            VolumeKind::HashTsdf => VoxelVolume::Hashed(HashTsdf::new(params)),
        })
    }

    pub fn kind(&self) -> VolumeKind {
        self.params().kind
    }
}

impl TsdfVolume for VoxelVolume {
    fn params(&self) -> &VolumeParams {
        dispatch!(self, volume => volume.params())
    }

    fn integrate(
        &mut self,
        frame: &DepthFrame,
        camera_pose: &Transform,
    ) -> Result<IntegrationSummary> {
        dispatch!(self, volume => volume.integrate(frame, camera_pose))
    }

    fn raycast(
        &self,
        camera_pose: &Transform,
        intrinsics: &CameraIntrinsics,
        width: usize,
        height: usize,
    ) -> RangeImage {
        dispatch!(self, volume => volume.raycast(camera_pose, intrinsics, width, height))
    }

    fn fetch_points_normals(
        &self,
    ) -> Box<dyn Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_> {
        dispatch!(self, volume => volume.fetch_points_normals())
    }

    fn reset(&mut self) {
        dispatch!(self, volume => volume.reset())
    }

    fn sdf_at(&self, point: &Vector3<f32>) -> Option<f32> {
        dispatch!(self, volume => volume.sdf_at(point))
    }

    fn normal_at(&self, point: &Vector3<f32>) -> Option<Vector3<f32>> {
        dispatch!(self, volume => volume.normal_at(point))
    }

    fn unit_visibility(&self, camera: &PinholeCamera, max_depth: f32) -> UnitVisibility {
        dispatch!(self, volume => volume.unit_visibility(camera, max_depth))
    }

    fn observed_voxels(&self) -> usize {
        dispatch!(self, volume => volume.observed_voxels())
    }

    fn active_units(&self) -> usize {
        dispatch!(self, volume => volume.active_units())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::{plane_frame, small_dense_params, small_hashed_params};
    use rstest::*;

    #[rstest]
    fn should_reject_invalid_params(mut small_hashed_params: VolumeParams) {
        small_hashed_params.truncation_distance = 0.0;
        assert!(VoxelVolume::new(small_hashed_params).is_err());
    }

    #[rstest]
    fn should_build_requested_layout(
        small_dense_params: VolumeParams,
        small_hashed_params: VolumeParams,
    ) {
        assert!(matches!(
            VoxelVolume::new(small_dense_params).unwrap(),
            VoxelVolume::Dense(_)
        ));
        assert_eq!(
            VoxelVolume::new(small_hashed_params).unwrap().kind(),
            VolumeKind::HashTsdf
        );
    }

    #[rstest]
    fn should_see_units_in_front_of_camera(
        plane_frame: DepthFrame,
        small_hashed_params: VolumeParams,
    ) {
        let mut volume = VoxelVolume::new(small_hashed_params).unwrap();
        assert_eq!(
            volume
                .unit_visibility(
                    &PinholeCamera::new(plane_frame.camera.clone(), Transform::eye(), 64, 48),
                    0.0
                )
                .ratio(),
            1.0
        );

        volume.integrate(&plane_frame, &Transform::eye()).unwrap();
        let camera = PinholeCamera::new(plane_frame.camera.clone(), Transform::eye(), 64, 48);
        let visibility = volume.unit_visibility(&camera, 0.0);
        assert!(visibility.observed > 0);
        assert_eq!(visibility.visible, visibility.observed);

        // Looking backwards.
        let behind = PinholeCamera::new(
            plane_frame.camera.clone(),
            Transform::from_se3_exp(&nalgebra::Vector6::new(
                0.0,
                0.0,
                0.0,
                0.0,
                std::f32::consts::PI,
                0.0,
            )),
            64,
            48,
        );
        assert_eq!(volume.unit_visibility(&behind, 0.0).visible, 0);
    }
}
