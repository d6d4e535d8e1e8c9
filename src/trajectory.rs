use std::ops::Index;

use crate::transform::Transform;

/// Global camera poses of the processed frames.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    /// Camera poses, transforms points from camera to world.
    pub camera_to_world: Vec<Transform>,
    /// Timestamp, or sequence index, of each pose.
    pub times: Vec<f64>,
}

impl Trajectory {
    pub fn push(&mut self, camera_to_world: Transform, time: f64) {
        self.camera_to_world.push(camera_to_world);
        self.times.push(time);
    }

    pub fn len(&self) -> usize {
        self.camera_to_world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.camera_to_world.is_empty()
    }

    pub fn clear(&mut self) {
        self.camera_to_world.clear();
        self.times.clear();
    }

    /// Transform from the camera of `from_index` to the camera of `dest_index`.
    pub fn get_relative_transform(&self, from_index: usize, dest_index: usize) -> Option<Transform> {
        let from = self.camera_to_world.get(from_index)?;
        let dest = self.camera_to_world.get(dest_index)?;
        Some(&dest.inverse() * from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Transform, f64)> + '_ {
        self.camera_to_world
            .iter()
            .copied()
            .zip(self.times.iter().copied())
    }

    pub fn last(&self) -> Option<(Transform, f64)> {
        Some((*self.camera_to_world.last()?, *self.times.last()?))
    }

    /// Distance traveled by the camera center.
    pub fn path_length(&self) -> f32 {
        self.camera_to_world
            .windows(2)
            .map(|pair| (pair[1].translation() - pair[0].translation()).norm())
            .sum()
    }
}

impl FromIterator<(Transform, f64)> for Trajectory {
    fn from_iter<T: IntoIterator<Item = (Transform, f64)>>(iter: T) -> Self {
        let mut trajectory = Trajectory::default();
        for (transform, time) in iter {
            trajectory.push(transform, time);
        }
        trajectory
    }
}

impl Index<usize> for Trajectory {
    type Output = Transform;

    fn index(&self, index: usize) -> &Self::Output {
        &self.camera_to_world[index]
    }
}
