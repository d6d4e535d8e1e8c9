use std::collections::HashSet;

use nalgebra::Vector3;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    error::Result,
    image::DepthFrame,
    range_image::RangeImage,
    transform::Transform,
};

use super::{
    integration::{IntegrationSummary, ProjectiveSdf},
    raycast::raycast,
    storage::{is_cube_visible, sample_sdf, surface_normal, surface_point, VoxelStorage},
    TsdfVolume, UnitVisibility, VolumeParams, Voxel,
};

/// Fixed-size grid of voxels, allocated once at construction.
/// Bricks of `unit_resolution`^3 voxels that received observations are tracked for the visibility statistics.
pub struct DenseTsdf {
    params: VolumeParams,
    voxels: Array3<Voxel>,
    observed_bricks: HashSet<Vector3<i32>>,
}

impl DenseTsdf {
    pub fn new(params: VolumeParams) -> Self {
        let [x, y, z] = params.resolution;
        Self {
            voxels: Array3::from_elem((x, y, z), Voxel::empty(params.truncation_distance)),
            observed_bricks: HashSet::new(),
            params,
        }
    }

    /// Voxel at grid coordinates.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<&Voxel> {
        self.voxels.get((x, y, z))
    }

    fn sorted_bricks(&self) -> Vec<Vector3<i32>> {
        let mut bricks: Vec<_> = self.observed_bricks.iter().copied().collect();
        bricks.sort_by_key(|brick| (brick[0], brick[1], brick[2]));
        bricks
    }

    fn brick_voxels(&self, brick: Vector3<i32>) -> impl Iterator<Item = Vector3<i32>> {
        let unit = self.params.unit_resolution as i32;
        let resolution = self.params.resolution.map(|r| r as i32);
        let start = brick * unit;
        let end = Vector3::new(
            (start[0] + unit).min(resolution[0]),
            (start[1] + unit).min(resolution[1]),
            (start[2] + unit).min(resolution[2]),
        );
        (start[0]..end[0]).flat_map(move |x| {
            (start[1]..end[1])
                .flat_map(move |y| (start[2]..end[2]).map(move |z| Vector3::new(x, y, z)))
        })
    }
}

impl VoxelStorage for DenseTsdf {
    fn voxel_size(&self) -> f32 {
        self.params.voxel_size
    }

    fn origin(&self) -> Vector3<f32> {
        self.params.origin()
    }

    fn voxel(&self, index: &Vector3<i32>) -> Option<Voxel> {
        if index.iter().any(|v| *v < 0) {
            return None;
        }
        self.voxels
            .get((index[0] as usize, index[1] as usize, index[2] as usize))
            .copied()
    }

    fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        if self.observed_bricks.is_empty() {
            return None;
        }
        let origin = self.params.origin();
        let extent = Vector3::from(self.params.resolution.map(|r| r as f32)) * self.params.voxel_size;
        Some((origin, origin + extent))
    }
}

impl TsdfVolume for DenseTsdf {
    fn params(&self) -> &VolumeParams {
        &self.params
    }

    fn integrate(
        &mut self,
        frame: &DepthFrame,
        camera_pose: &Transform,
    ) -> Result<IntegrationSummary> {
        let sdf = ProjectiveSdf::new(frame, camera_pose, &self.params);
        let origin = self.params.origin();
        let voxel_size = self.params.voxel_size;
        let max_weight = self.params.max_weight;
        let unit = self.params.unit_resolution;

        let (updated_voxels, bricks) = self
            .voxels
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(x, mut slab)| {
                let mut updated = 0usize;
                let mut bricks = HashSet::new();
                for ((y, z), voxel) in slab.indexed_iter_mut() {
                    let center = origin
                        + Vector3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5) * voxel_size;
                    if let Some(distance) = sdf.observe(&center) {
                        voxel.integrate(distance, max_weight);
                        updated += 1;
                        bricks.insert(Vector3::new(
                            (x / unit) as i32,
                            (y / unit) as i32,
                            (z / unit) as i32,
                        ));
                    }
                }
                (updated, bricks)
            })
            .reduce(
                || (0usize, HashSet::new()),
                |(count_a, mut bricks_a), (count_b, bricks_b)| {
                    bricks_a.extend(bricks_b);
                    (count_a + count_b, bricks_a)
                },
            );

        self.observed_bricks.extend(bricks);

        Ok(IntegrationSummary {
            updated_voxels,
            allocated_units: 0,
        })
    }

    fn raycast(
        &self,
        camera_pose: &Transform,
        intrinsics: &CameraIntrinsics,
        width: usize,
        height: usize,
    ) -> RangeImage {
        raycast(self, &self.params, camera_pose, intrinsics, width, height)
    }

    fn fetch_points_normals(
        &self,
    ) -> Box<dyn Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_> {
        Box::new(
            self.sorted_bricks()
                .into_iter()
                .flat_map(move |brick| self.brick_voxels(brick))
                .filter_map(move |index| {
                    let voxel = self.voxel(&index)?;
                    surface_point(self, &index, &voxel)
                }),
        )
    }

    fn reset(&mut self) {
        self.voxels
            .fill(Voxel::empty(self.params.truncation_distance));
        self.observed_bricks.clear();
    }

    fn sdf_at(&self, point: &Vector3<f32>) -> Option<f32> {
        sample_sdf(self, point)
    }

    fn normal_at(&self, point: &Vector3<f32>) -> Option<Vector3<f32>> {
        surface_normal(self, point)
    }

    fn unit_visibility(&self, camera: &PinholeCamera, max_depth: f32) -> UnitVisibility {
        let origin = self.params.origin();
        let unit_size = self.params.unit_size();
        let visible = self
            .observed_bricks
            .par_iter()
            .filter(|brick| {
                let min_corner = origin + brick.cast::<f32>() * unit_size;
                is_cube_visible(camera, &min_corner, unit_size, max_depth)
            })
            .count();
        UnitVisibility {
            visible,
            observed: self.observed_bricks.len(),
        }
    }

    fn observed_voxels(&self) -> usize {
        self.voxels.par_iter().filter(|v| v.is_observed()).count()
    }

    fn active_units(&self) -> usize {
        self.observed_bricks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::{plane_frame, small_dense_params};
    use rstest::*;

    #[rstest]
    fn should_integrate_plane(plane_frame: DepthFrame, small_dense_params: VolumeParams) {
        let mut volume = DenseTsdf::new(small_dense_params);
        let summary = volume.integrate(&plane_frame, &Transform::eye()).unwrap();
        assert!(summary.updated_voxels > 0);
        assert!(volume.active_units() > 0);

        let sdf = volume.sdf_at(&Vector3::new(0.0, 0.0, 1.45)).unwrap();
        assert!((sdf - 0.05).abs() < 0.01);
        assert!(volume.sdf_at(&Vector3::new(0.0, 0.0, 0.5)).is_none());
    }

    #[rstest]
    fn should_export_points_on_plane(plane_frame: DepthFrame, small_dense_params: VolumeParams) {
        let voxel_size = small_dense_params.voxel_size;
        let mut volume = DenseTsdf::new(small_dense_params);
        volume.integrate(&plane_frame, &Transform::eye()).unwrap();

        let points: Vec<_> = volume.fetch_points_normals().collect();
        assert!(!points.is_empty());
        for (point, normal) in points.iter() {
            assert!((point[2] - 1.5).abs() < voxel_size);
            assert!(normal[2] < -0.9);
        }

        // Restartable.
        assert_eq!(volume.fetch_points_normals().count(), points.len());
    }

    #[rstest]
    fn should_reset_to_empty(plane_frame: DepthFrame, small_dense_params: VolumeParams) {
        let mut volume = DenseTsdf::new(small_dense_params.clone());
        volume.integrate(&plane_frame, &Transform::eye()).unwrap();
        volume.reset();

        assert_eq!(volume.observed_voxels(), 0);
        assert_eq!(volume.fetch_points_normals().count(), 0);
        assert_eq!(
            volume.get(3, 3, 3),
            Some(&Voxel::empty(small_dense_params.truncation_distance))
        );
    }
}
