use crate::{
    error::{Error, Result},
    icp::{MsIcpParams, MultiscaleAlign},
    range_image::RangeImage,
    submap::Submap,
    transform::Transform,
};

/// Camera pose of a frame relative to a submap.
#[derive(Clone, Debug)]
pub struct TrackResult {
    /// Camera to submap.
    pub camera_pose: Transform,
    /// Motion from the previous camera pose of the submap to the new one.
    pub motion: Transform,
    pub converged: bool,
    pub iterations: usize,
    pub correspondences: usize,
    pub residual: f32,
}

/// Frame to model tracking: aligns the frame pyramid to the surface raycast from the
/// submap at its last camera pose, coarse to fine.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    pub params: MsIcpParams,
}

impl Tracker {
    pub fn new(params: MsIcpParams) -> Self {
        Self { params }
    }

    /// Estimates the camera pose of the frame in `submap`. The submap is not modified.
    ///
    /// Fails with [`Error::TrackingLost`] when the submap has no model or the alignment fails.
    pub fn track(&self, frame_pyramid: &[RangeImage], submap: &Submap) -> Result<TrackResult> {
        let model = submap.model();
        if model.is_empty() || model[0].is_empty() {
            return Err(Error::tracking_lost(format!("{} has no surface", submap.id)));
        }
        if model.len() != frame_pyramid.len() {
            return Err(Error::invalid_parameter(format!(
                "frame pyramid has {} levels, the model of {} has {}",
                frame_pyramid.len(),
                submap.id,
                model.len()
            )));
        }

        let result = MultiscaleAlign::new(model, self.params.clone())
            .align(frame_pyramid, &Transform::eye())?;

        Ok(TrackResult {
            camera_pose: &submap.camera_pose * &result.transform,
            motion: result.transform,
            converged: result.converged,
            iterations: result.iterations,
            correspondences: result.correspondences,
            residual: result.residual,
        })
    }
}
