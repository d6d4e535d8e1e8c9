use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration of the submap life cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmapParams {
    /// A new submap is spawned when the visibility ratio of the current one drops below this value.
    pub spawn_visibility_threshold: f32,
    /// Non current submaps below this visibility ratio become inactive.
    pub retire_visibility_threshold: f32,
    /// Active submaps below this visibility ratio are tracked but do not integrate.
    pub integrate_visibility_floor: f32,
    /// Minimum number of frames between two spawns.
    pub min_frames_between_spawns: usize,
    /// Track every active submap, not only the current one.
    pub track_all_active: bool,
    /// Information weight of the edge added when a submap is spawned.
    pub spawn_edge_weight: f32,
    /// Relative pose observations closer than this translation (meters) agree.
    pub constraint_inlier_translation: f32,
    /// Relative pose observations closer than this angle (radians) agree.
    pub constraint_inlier_angle: f32,
    /// Agreeing observations needed before a constraint refines the pose graph.
    pub min_constraint_inliers: usize,
    /// Observations kept per pair of submaps. Older ones are dropped.
    pub max_constraint_observations: usize,
}

impl Default for SubmapParams {
    fn default() -> Self {
        Self {
            spawn_visibility_threshold: 0.3,
            retire_visibility_threshold: 0.1,
            integrate_visibility_floor: 0.2,
            min_frames_between_spawns: 10,
            track_all_active: true,
            spawn_edge_weight: 1.0,
            constraint_inlier_translation: 0.05,
            constraint_inlier_angle: 5.0_f32.to_radians(),
            min_constraint_inliers: 5,
            max_constraint_observations: 100,
        }
    }
}

impl SubmapParams {
    pub fn validate(&self) -> Result<()> {
        let ratios = [
            ("spawn visibility threshold", self.spawn_visibility_threshold),
            ("retire visibility threshold", self.retire_visibility_threshold),
            ("integrate visibility floor", self.integrate_visibility_floor),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::invalid_configuration(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.retire_visibility_threshold > self.spawn_visibility_threshold {
            return Err(Error::invalid_configuration(
                "retire visibility threshold must not exceed the spawn threshold",
            ));
        }
        if !(self.spawn_edge_weight > 0.0) {
            return Err(Error::invalid_configuration(
                "spawn edge weight must be positive",
            ));
        }
        if !(self.constraint_inlier_translation > 0.0 && self.constraint_inlier_angle > 0.0) {
            return Err(Error::invalid_configuration(
                "constraint inlier thresholds must be positive",
            ));
        }
        if self.min_constraint_inliers == 0
            || self.max_constraint_observations < self.min_constraint_inliers
        {
            return Err(Error::invalid_configuration(
                "constraint observations must hold at least min_constraint_inliers > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SubmapParams::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let params = SubmapParams {
            spawn_visibility_threshold: 0.1,
            retire_visibility_threshold: 0.4,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        let params = SubmapParams {
            integrate_visibility_floor: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
