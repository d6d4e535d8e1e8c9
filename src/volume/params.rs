use log::warn;
use nalgebra::Vector3;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage layout of a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeKind {
    /// Dense fixed-size grid, allocated once.
    Tsdf,
    /// Hash table of fixed-size voxel units, allocated on demand.
    HashTsdf,
}

/// Volume configuration. Immutable once a volume is built from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeParams {
    pub kind: VolumeKind,
    /// Number of voxels in each dimension. Hashed volumes require the same value on all axes.
    pub resolution: [usize; 3],
    /// Voxels per axis of a unit: a hashed block, or a brick of the dense grid used for visibility statistics.
    pub unit_resolution: usize,
    /// Size of the volume in meters.
    pub volume_size: f32,
    /// Position of the grid corner in the submap frame. Only used by dense volumes.
    pub origin: [f32; 3],
    /// Length of voxels in meters.
    pub voxel_size: f32,
    /// Band around the surface, in meters, where observations are fused.
    pub truncation_distance: f32,
    /// Max number of frames averaged per voxel.
    pub max_weight: u32,
    /// Depth beyond this value is ignored. Zero disables it.
    pub depth_trunc_threshold: f32,
    /// Fraction of the voxel length advanced per raycast step.
    pub raycast_step_factor: f32,
    /// Maximum number of allocated units of a hashed volume.
    pub max_active_units: usize,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self::default_params(VolumeKind::HashTsdf)
    }
}

impl VolumeParams {
    /// Parameters that favor reconstruction quality over speed.
    pub fn default_params(kind: VolumeKind) -> Self {
        let volume_size = 3.0;
        let voxel_size = volume_size / 512.0;
        match kind {
            VolumeKind::Tsdf => Self {
                kind,
                resolution: [512; 3],
                unit_resolution: 16,
                volume_size,
                origin: [-volume_size / 2.0, -volume_size / 2.0, 0.5],
                voxel_size,
                truncation_distance: 7.0 * voxel_size,
                max_weight: 64,
                depth_trunc_threshold: 0.0,
                raycast_step_factor: 0.25,
                max_active_units: 0,
            },
            VolumeKind::HashTsdf => Self {
                kind,
                resolution: [512; 3],
                unit_resolution: 8,
                volume_size,
                origin: [0.0; 3],
                voxel_size,
                truncation_distance: 7.0 * voxel_size,
                max_weight: 64,
                depth_trunc_threshold: 4.0,
                raycast_step_factor: 0.25,
                max_active_units: 1 << 16,
            },
        }
    }

    /// Parameters that favor speed over reconstruction quality.
    pub fn coarse_params(kind: VolumeKind) -> Self {
        let mut params = Self::default_params(kind);
        params.resolution = [128; 3];
        params.voxel_size = params.volume_size / 128.0;
        params.truncation_distance = 2.0 * params.voxel_size;
        params.raycast_step_factor = 0.75;
        if kind == VolumeKind::Tsdf {
            params.unit_resolution = 8;
        }
        params
    }

    /// Edge length of a unit in meters.
    pub fn unit_size(&self) -> f32 {
        self.voxel_size * self.unit_resolution as f32
    }

    pub fn origin(&self) -> Vector3<f32> {
        Vector3::from(self.origin)
    }

    /// Checks the parameters. Fails with [`Error::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        if self.resolution.iter().any(|r| *r == 0) {
            return Err(Error::invalid_configuration(
                "volume resolution must be positive on all axes",
            ));
        }
        if self.kind == VolumeKind::HashTsdf
            && (self.resolution[0] != self.resolution[1] || self.resolution[1] != self.resolution[2])
        {
            return Err(Error::invalid_configuration(
                "hashed volumes require equal resolution on all axes",
            ));
        }
        if self.unit_resolution == 0 {
            return Err(Error::invalid_configuration(
                "unit resolution must be positive",
            ));
        }
        if !(self.voxel_size > 0.0) || !(self.volume_size > 0.0) {
            return Err(Error::invalid_configuration(
                "voxel size and volume size must be positive",
            ));
        }
        if self.truncation_distance <= self.voxel_size {
            return Err(Error::invalid_configuration(format!(
                "truncation distance ({}) must be greater than the voxel size ({})",
                self.truncation_distance, self.voxel_size
            )));
        }
        if self.max_weight == 0 {
            return Err(Error::invalid_configuration("max weight must be at least 1"));
        }
        if !(self.raycast_step_factor > 0.0 && self.raycast_step_factor <= 1.0) {
            return Err(Error::invalid_configuration(
                "raycast step factor must be in (0, 1]",
            ));
        }
        if self.depth_trunc_threshold < 0.0 {
            return Err(Error::invalid_configuration(
                "depth truncation threshold must not be negative",
            ));
        }
        if self.kind == VolumeKind::HashTsdf && self.max_active_units == 0 {
            return Err(Error::invalid_configuration(
                "hashed volumes need a positive unit budget",
            ));
        }

        for resolution in self.resolution.iter() {
            let extent = self.voxel_size * *resolution as f32;
            if (extent - self.volume_size).abs() > 1e-3 * self.volume_size {
                warn!(
                    "voxel size times resolution ({extent}) differs from the volume size ({})",
                    self.volume_size
                );
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(VolumeKind::Tsdf)]
    #[case(VolumeKind::HashTsdf)]
    fn presets_are_valid(#[case] kind: VolumeKind) {
        assert!(VolumeParams::default_params(kind).validate().is_ok());
        assert!(VolumeParams::coarse_params(kind).validate().is_ok());
    }

    #[test]
    fn should_reject_uneven_hashed_resolution() {
        let mut params = VolumeParams::default_params(VolumeKind::HashTsdf);
        params.resolution = [128, 128, 64];
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        params.kind = VolumeKind::Tsdf;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn should_reject_thin_truncation() {
        let mut params = VolumeParams::default_params(VolumeKind::Tsdf);
        params.truncation_distance = params.voxel_size * 0.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn should_serialize_to_json() {
        let params = VolumeParams::coarse_params(VolumeKind::HashTsdf);
        let json = serde_json::to_string(&params).unwrap();
        let loaded: VolumeParams = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, params);
    }
}
