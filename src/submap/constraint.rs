use std::collections::VecDeque;

use nalgebra::{Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::{metrics::TransformMetrics, transform::Transform};

/// Relative pose observations between two submaps that are tracked at the same time.
///
/// Every frame in which both submaps are tracked gives one observation of `from -> to`
/// (points of `to` into `from`). The estimate is the average of the largest group of
/// observations that agree with each other.
#[derive(Clone, Debug)]
pub struct PoseConstraint {
    observations: VecDeque<Transform>,
    max_observations: usize,
    last_emitted_inliers: usize,
}

impl PoseConstraint {
    pub fn new(max_observations: usize) -> Self {
        Self {
            observations: VecDeque::with_capacity(max_observations),
            max_observations,
            last_emitted_inliers: 0,
        }
    }

    /// Adds an observation, dropping the oldest when the window is full.
    pub fn push(&mut self, relative_pose: Transform) {
        if self.observations.len() == self.max_observations {
            self.observations.pop_front();
        }
        self.observations.push_back(relative_pose);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    fn inliers_of(
        &self,
        candidate: &Transform,
        translation_threshold: f32,
        angle_threshold: f32,
    ) -> Vec<&Transform> {
        self.observations
            .iter()
            .filter(|other| {
                let metrics = TransformMetrics::new(candidate, other);
                metrics.translation < translation_threshold && metrics.angle < angle_threshold
            })
            .collect()
    }

    /// Consensus estimate and its inlier count, `None` without observations.
    ///
    /// Each observation is a candidate. The one with most agreeing observations wins (the oldest on ties)
    /// and the returned pose is the mean of its inliers.
    pub fn estimate(
        &self,
        translation_threshold: f32,
        angle_threshold: f32,
    ) -> Option<(Transform, usize)> {
        let mut best: Option<Vec<&Transform>> = None;
        for candidate in self.observations.iter() {
            let inliers = self.inliers_of(candidate, translation_threshold, angle_threshold);
            if best
                .as_ref()
                .map_or(true, |current| inliers.len() > current.len())
            {
                best = Some(inliers);
            }
        }
        let inliers = best?;
        Some((mean_transform(&inliers), inliers.len()))
    }

    /// Consensus estimate if it has at least `min_inliers` and more inliers than the last emitted one.
    pub fn refined(
        &mut self,
        translation_threshold: f32,
        angle_threshold: f32,
        min_inliers: usize,
    ) -> Option<(Transform, usize)> {
        let (pose, inliers) = self.estimate(translation_threshold, angle_threshold)?;
        if inliers < min_inliers || inliers <= self.last_emitted_inliers {
            return None;
        }
        self.last_emitted_inliers = inliers;
        Some((pose, inliers))
    }
}

/// Mean translation and normalized mean quaternion, with quaternions flipped to the
/// hemisphere of the first one.
fn mean_transform(transforms: &[&Transform]) -> Transform {
    let reference = match transforms.first() {
        Some(first) => first.rotation(),
        None => return Transform::eye(),
    };

    let mut translation = Vector3::zeros();
    let mut rotation = Vector4::zeros();
    for transform in transforms {
        translation += transform.translation();
        let coords = transform.rotation().into_inner().coords;
        if coords.dot(&reference.coords) < 0.0 {
            rotation -= coords;
        } else {
            rotation += coords;
        }
    }
    let count = transforms.len() as f32;
    let rotation = UnitQuaternion::from_quaternion(Quaternion::from(rotation / count));
    Transform::new(&(translation / count), &rotation.into_inner())
}
