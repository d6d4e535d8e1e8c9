/// Signed distance sample and its integration weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Voxel {
    /// Signed distance to the surface in meters, positive in front of it.
    pub tsdf: f32,
    pub weight: u32,
}

impl Voxel {
    /// Unobserved voxel.
    pub fn empty(truncation_distance: f32) -> Self {
        Self {
            tsdf: truncation_distance,
            weight: 0,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.weight > 0
    }

    /// Fuses one observation with unit weight into the running average.
    /// The average keeps moving after `max_weight` is reached, but the weight stays capped.
    pub fn integrate(&mut self, sdf: f32, max_weight: u32) {
        let weight = self.weight as f32;
        self.tsdf = (self.tsdf * weight + sdf) / (weight + 1.0);
        self.weight = (self.weight + 1).min(max_weight);
    }
}
