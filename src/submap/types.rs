use nalgebra::Vector3;

use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    error::Result,
    image::DepthFrame,
    range_image::RangeImage,
    transform::Transform,
    volume::{IntegrationSummary, TsdfVolume, VolumeParams, VoxelVolume},
};

/// Unique identifier for a submap. Ids grow with creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmapId(pub u32);

impl SubmapId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SubmapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Submap({})", self.0)
    }
}

/// State of a submap in its life cycle: `Created -> Active -> Inactive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmapState {
    /// Built but not yet handed to the manager.
    Created,
    /// Tracked and integrated.
    Active,
    /// Out of view: no more tracking or integration, but its pose is still optimized and its surface exported.
    Inactive,
}

/// A volumetric fragment of the map with its own pose.
pub struct Submap {
    pub id: SubmapId,
    /// Submap to world.
    pub pose: Transform,
    /// Camera to submap, as of the last processed frame.
    pub camera_pose: Transform,
    pub volume: VoxelVolume,
    pub created_at_frame: usize,
    pub integrated_frames: usize,
    /// Fraction of the observed units inside the camera frustum.
    pub visibility_ratio: f32,
    /// Fraction of the pixels of the last model raycast that hit the surface.
    pub coverage: f32,
    state: SubmapState,
    /// Surface raycast at `camera_pose`, finest level first. Tracking target.
    model: Vec<RangeImage>,
    last_integrated_pose: Option<Transform>,
}

impl Submap {
    pub fn new(
        id: SubmapId,
        pose: Transform,
        volume_params: VolumeParams,
        created_at_frame: usize,
    ) -> Result<Self> {
        Ok(Self {
            id,
            pose,
            camera_pose: Transform::eye(),
            volume: VoxelVolume::new(volume_params)?,
            created_at_frame,
            integrated_frames: 0,
            visibility_ratio: 1.0,
            coverage: 0.0,
            state: SubmapState::Created,
            model: Vec::new(),
            last_integrated_pose: None,
        })
    }

    pub fn state(&self) -> SubmapState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SubmapState::Active
    }

    pub(crate) fn activate(&mut self) {
        self.state = SubmapState::Active;
    }

    pub(crate) fn retire(&mut self) {
        self.state = SubmapState::Inactive;
    }

    /// Camera to world.
    pub fn camera_in_world(&self) -> Transform {
        &self.pose * &self.camera_pose
    }

    pub fn model(&self) -> &[RangeImage] {
        &self.model
    }

    pub(crate) fn set_model(&mut self, model: Vec<RangeImage>) {
        self.coverage = model.first().map(|image| image.coverage()).unwrap_or(0.0);
        self.model = model;
    }

    /// Raycasts the volume at `camera_pose` into a new tracking model.
    pub fn refresh_model(
        &mut self,
        intrinsics: &CameraIntrinsics,
        width: usize,
        height: usize,
        levels: usize,
    ) {
        let surface = self
            .volume
            .raycast(&self.camera_pose, intrinsics, width, height);
        self.set_model(surface.pyramid(levels));
    }

    /// Updates the visibility ratio for a camera at `camera_pose`.
    pub fn update_visibility(&mut self, intrinsics: &CameraIntrinsics, width: usize, height: usize) {
        let camera = PinholeCamera::new(intrinsics.clone(), self.camera_pose, width, height);
        let max_depth = self.volume.params().depth_trunc_threshold;
        self.visibility_ratio = self.volume.unit_visibility(&camera, max_depth).ratio();
    }

    /// Whether the camera moved enough since the last integration:
    /// `(rotation angle + translation norm) / 2 >= min_movement`. Always true before the first one.
    pub fn has_moved(&self, min_movement: f32) -> bool {
        match self.last_integrated_pose {
            Some(last) => {
                let motion = &last.inverse() * &self.camera_pose;
                (motion.angle() + motion.translation().norm()) * 0.5 >= min_movement
            }
            None => true,
        }
    }

    /// Fuses a frame seen from `camera_pose`.
    pub fn integrate(&mut self, frame: &DepthFrame) -> Result<IntegrationSummary> {
        let summary = self.volume.integrate(frame, &self.camera_pose)?;
        self.integrated_frames += 1;
        self.last_integrated_pose = Some(self.camera_pose);
        Ok(summary)
    }

    /// Near surface points and normals in the world frame.
    pub fn world_points_normals(
        &self,
    ) -> impl Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_ {
        self.volume
            .fetch_points_normals()
            .map(move |(point, normal)| {
                (
                    self.pose.transform_vector(&point),
                    self.pose.transform_normal(&normal),
                )
            })
    }

    /// Field normal at a world point, `None` outside of the observed surface.
    pub fn normal_at_world(&self, point: &Vector3<f32>) -> Option<Vector3<f32>> {
        let local = self.pose.inverse().transform_vector(point);
        self.volume
            .normal_at(&local)
            .map(|normal| self.pose.transform_normal(&normal))
    }
}
