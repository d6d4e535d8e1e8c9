use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::{
    camera::CameraIntrinsics,
    error::{Error, Result},
    icp::{IcpParams, MsIcpParams},
    pose_graph::PoseGraphParams,
    submap::SubmapParams,
    volume::{VolumeKind, VolumeParams},
};

/// Configuration of the reconstruction engine.
/// Validated when the engine is built and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Width and height of the input frames.
    pub frame_size: [usize; 2],
    pub intrinsics: CameraIntrinsics,
    /// Raw depth units per meter.
    pub depth_factor: f32,
    /// Depth beyond this value (meters) is dropped before tracking. Zero disables it.
    pub truncate_threshold: f32,
    pub pyramid_levels: usize,
    /// A submap integrates a frame only if `(angle + translation) / 2` since its last
    /// integration reaches this value.
    pub min_camera_movement: f32,
    /// Light position in the world frame.
    pub light_pose: [f32; 3],
    /// Correspondences farther than this (meters) are rejected.
    pub icp_dist_thresh: f32,
    /// Correspondences with normals apart by more than this (radians) are rejected.
    pub icp_angle_thresh: f32,
    /// Iterations per pyramid level, finest first.
    pub icp_iterations: Vec<usize>,
    pub icp_tolerance: f32,
    pub icp_min_correspondences: usize,
    pub icp_huber_delta: f32,
    pub volume: VolumeParams,
    pub submap: SubmapParams,
    pub pose_graph: PoseGraphParams,
}

impl Default for Params {
    fn default() -> Self {
        Self::default_params()
    }
}

impl Params {
    /// Parameters for 640x480 Kinect-like sensors with a hashed volume.
    pub fn default_params() -> Self {
        let (width, height) = (640, 480);
        Self {
            frame_size: [width, height],
            intrinsics: CameraIntrinsics::from_simple_intrinsic(
                525.0,
                525.0,
                width as f64 / 2.0 - 0.5,
                height as f64 / 2.0 - 0.5,
            ),
            depth_factor: 5000.0,
            truncate_threshold: 0.0,
            pyramid_levels: 3,
            min_camera_movement: 0.0,
            light_pose: [0.0, 0.0, 0.0],
            icp_dist_thresh: 0.1,
            icp_angle_thresh: 30.0_f32.to_radians(),
            icp_iterations: vec![10, 5, 4],
            icp_tolerance: 1e-5,
            icp_min_correspondences: 64,
            icp_huber_delta: 0.02,
            volume: VolumeParams::default_params(VolumeKind::HashTsdf),
            submap: SubmapParams::default(),
            pose_graph: PoseGraphParams::default(),
        }
    }

    /// Faster and less detailed version of [`Params::default_params`].
    pub fn coarse_params() -> Self {
        Self {
            icp_iterations: vec![5, 3, 2],
            volume: VolumeParams::coarse_params(VolumeKind::HashTsdf),
            ..Self::default_params()
        }
    }

    pub fn hash_tsdf_params(coarse: bool) -> Self {
        if coarse {
            Self::coarse_params()
        } else {
            Self::default_params()
        }
    }

    pub fn dense_tsdf_params(coarse: bool) -> Self {
        let mut params = Self::hash_tsdf_params(coarse);
        params.volume = if coarse {
            VolumeParams::coarse_params(VolumeKind::Tsdf)
        } else {
            VolumeParams::default_params(VolumeKind::Tsdf)
        };
        params
    }

    pub fn width(&self) -> usize {
        self.frame_size[0]
    }

    pub fn height(&self) -> usize {
        self.frame_size[1]
    }

    /// Parameters of the coarse to fine tracker.
    pub fn icp_params(&self) -> MsIcpParams {
        MsIcpParams {
            level_iterations: self.icp_iterations.clone(),
            icp: IcpParams {
                max_iterations: self.icp_iterations.first().copied().unwrap_or(0),
                max_distance: self.icp_dist_thresh,
                max_normal_angle: self.icp_angle_thresh,
                min_correspondences: self.icp_min_correspondences,
                tolerance: self.icp_tolerance,
                huber_delta: self.icp_huber_delta,
            },
        }
    }

    /// Checks every field. Fails with [`Error::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::invalid_configuration(msg));

        if self.width() == 0 || self.height() == 0 {
            return invalid("frame size must be positive");
        }
        let intrinsics = &self.intrinsics;
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return invalid("focal lengths must be positive");
        }
        if !(self.depth_factor > 0.0) {
            return invalid("depth factor must be positive");
        }
        if self.truncate_threshold < 0.0 || self.min_camera_movement < 0.0 {
            return invalid("truncate threshold and minimum camera movement must not be negative");
        }
        if self.pyramid_levels == 0 {
            return invalid("at least one pyramid level is required");
        }
        if self.icp_iterations.len() != self.pyramid_levels {
            return Err(Error::invalid_configuration(format!(
                "{} ICP iteration counts for {} pyramid levels",
                self.icp_iterations.len(),
                self.pyramid_levels
            )));
        }
        if self.icp_iterations.iter().all(|iterations| *iterations == 0) {
            return invalid("ICP needs iterations in at least one level");
        }
        if !(self.icp_dist_thresh > 0.0) {
            return invalid("ICP distance threshold must be positive");
        }
        if !(self.icp_angle_thresh > 0.0 && self.icp_angle_thresh <= std::f32::consts::PI) {
            return invalid("ICP angle threshold must be in (0, pi]");
        }
        if !(self.icp_tolerance > 0.0 && self.icp_huber_delta > 0.0) {
            return invalid("ICP tolerance and Huber delta must be positive");
        }
        if self.icp_min_correspondences < 6 {
            return invalid("ICP needs at least 6 correspondences");
        }
        if !(self.pose_graph.tolerance > 0.0) || self.pose_graph.max_iterations == 0 {
            return invalid("pose graph tolerance and iteration cap must be positive");
        }

        self.volume.validate()?;
        self.submap.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buffer = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(buffer)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Params::default_params())]
    #[case(Params::coarse_params())]
    #[case(Params::hash_tsdf_params(true))]
    #[case(Params::dense_tsdf_params(false))]
    #[case(Params::dense_tsdf_params(true))]
    fn presets_are_valid(#[case] params: Params) {
        assert!(params.validate().is_ok());
    }

    #[test]
    fn should_pick_volume_layout() {
        assert_eq!(Params::dense_tsdf_params(true).volume.kind, VolumeKind::Tsdf);
        assert_eq!(Params::default().volume.kind, VolumeKind::HashTsdf);
    }

    #[test]
    fn should_reject_mismatched_iterations() {
        let params = Params {
            icp_iterations: vec![10, 5],
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn should_convert_icp_params() {
        let params = Params::default();
        let icp = params.icp_params();
        assert_eq!(icp.level(2).max_iterations, 4);
        assert_eq!(icp.icp.max_distance, params.icp_dist_thresh);
    }

    #[test]
    fn should_roundtrip_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let params = Params::coarse_params();
        params.to_json_file(&path).unwrap();

        assert_eq!(Params::from_json_file(&path).unwrap(), params);
        assert!(matches!(
            Params::from_json_str("{\"frame_size\": 3}"),
            Err(Error::Parser(_))
        ));
    }
}
