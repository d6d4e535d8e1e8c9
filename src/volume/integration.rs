use nalgebra::Vector3;

use crate::{camera::CameraIntrinsics, image::DepthFrame, transform::Transform};

use super::VolumeParams;

/// Counters returned by an integration pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrationSummary {
    pub updated_voxels: usize,
    /// Units allocated by this pass. Always zero for dense volumes.
    pub allocated_units: usize,
}

/// Projective signed distance of volume points against one depth frame.
pub(crate) struct ProjectiveSdf<'a> {
    frame: &'a DepthFrame,
    intrinsics: &'a CameraIntrinsics,
    camera_to_world: Transform,
    world_to_camera: Transform,
    truncation_distance: f32,
    depth_trunc_threshold: f32,
}

impl<'a> ProjectiveSdf<'a> {
    /// # Arguments
    ///
    /// * `frame` - Depth frame to fuse.
    /// * `camera_pose` - Camera to volume transform.
    /// * `params` - Volume parameters.
    pub fn new(frame: &'a DepthFrame, camera_pose: &Transform, params: &VolumeParams) -> Self {
        Self {
            frame,
            intrinsics: &frame.camera,
            camera_to_world: *camera_pose,
            world_to_camera: camera_pose.inverse(),
            truncation_distance: params.truncation_distance,
            depth_trunc_threshold: params.depth_trunc_threshold,
        }
    }

    fn valid_depth(&self, depth: f32) -> bool {
        self.depth_trunc_threshold <= 0.0 || depth <= self.depth_trunc_threshold
    }

    /// Signed distance along the viewing ray from `point` to the observed surface.
    /// `None` when the point is not seen by the frame or lies outside of the truncation band.
    pub fn observe(&self, point: &Vector3<f32>) -> Option<f32> {
        let camera_point = self.world_to_camera.transform_vector(point);
        if camera_point[2] <= 0.0 {
            return None;
        }

        let (x, y) = self.intrinsics.project(&camera_point);
        let (col, row) = (x.round(), y.round());
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let depth = self.frame.depth_at(row as usize, col as usize)?;
        if !self.valid_depth(depth) {
            return None;
        }

        let ray_scale = self.intrinsics.ray(col, row).norm();
        let sdf = (depth - camera_point[2]) * ray_scale;
        if sdf.abs() <= self.truncation_distance {
            Some(sdf)
        } else {
            None
        }
    }

    /// Calls `visit` with the volume-frame samples of every valid pixel ray that lie inside the
    /// truncation band, spaced by `step`. Used to find which hashed units the frame touches.
    pub fn for_each_band_sample<F>(&self, row: usize, step: f32, mut visit: F)
    where
        F: FnMut(Vector3<f32>),
    {
        for col in 0..self.frame.width() {
            let depth = match self.frame.depth_at(row, col) {
                Some(depth) if self.valid_depth(depth) => depth,
                _ => continue,
            };
            let surface = self.intrinsics.backproject(col as f32, row as f32, depth);
            let direction = surface.normalize();

            let mut offset = -self.truncation_distance;
            while offset <= self.truncation_distance {
                visit(self.camera_to_world.transform_vector(&(surface + direction * offset)));
                offset += step;
            }
            visit(self.camera_to_world.transform_vector(&(surface + direction * self.truncation_distance)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::plane_frame;
    use crate::volume::{VolumeKind, VolumeParams};
    use rstest::*;

    #[rstest]
    fn should_measure_distance_along_ray(plane_frame: DepthFrame) {
        let params = VolumeParams::coarse_params(VolumeKind::Tsdf);
        let sdf = ProjectiveSdf::new(&plane_frame, &Transform::eye(), &params);

        let in_front = sdf.observe(&Vector3::new(0.0, 0.0, 1.48)).unwrap();
        assert!((in_front - 0.02).abs() < 1e-3);

        let behind = sdf.observe(&Vector3::new(0.0, 0.0, 1.52)).unwrap();
        assert!((behind + 0.02).abs() < 1e-3);

        assert!(sdf.observe(&Vector3::new(0.0, 0.0, 0.5)).is_none());
        assert!(sdf.observe(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[rstest]
    fn should_ignore_depth_beyond_threshold(plane_frame: DepthFrame) {
        let mut params = VolumeParams::coarse_params(VolumeKind::Tsdf);
        params.depth_trunc_threshold = 1.0;
        let sdf = ProjectiveSdf::new(&plane_frame, &Transform::eye(), &params);
        assert!(sdf.observe(&Vector3::new(0.0, 0.0, 1.48)).is_none());
    }
}
