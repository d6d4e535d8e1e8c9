use std::collections::{HashMap, HashSet};

use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;

use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    error::{Error, Result},
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

/// Fixed-size cube of `unit_resolution`^3 voxels, stored x-major.
#[derive(Clone, Debug)]
pub struct VoxelBlock {
    voxels: Vec<Voxel>,
    observed: bool,
}

impl VoxelBlock {
    fn new(unit_resolution: usize, truncation_distance: f32) -> Self {
        Self {
            voxels: vec![Voxel::empty(truncation_distance); unit_resolution.pow(3)],
            observed: false,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }
}

/// Block-local voxel coordinates of a flat offset.
fn local_index(offset: usize, unit: usize) -> Vector3<i32> {
    Vector3::new(
        (offset / (unit * unit)) as i32,
        ((offset / unit) % unit) as i32,
        (offset % unit) as i32,
    )
}

/// Sparse volume: blocks of voxels indexed by their integer block coordinates,
/// allocated on demand around observed surfaces.
pub struct HashTsdf {
    params: VolumeParams,
    blocks: HashMap<Vector3<i32>, VoxelBlock>,
    block_bounds: Option<(Vector3<i32>, Vector3<i32>)>,
}

impl HashTsdf {
    pub fn new(params: VolumeParams) -> Self {
        Self {
            params,
            blocks: HashMap::new(),
            block_bounds: None,
        }
    }

    pub fn allocated_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn block_of_point(&self, point: &Vector3<f32>) -> Vector3<i32> {
        let unit = self.params.unit_resolution as i32;
        (point / self.params.voxel_size)
            .map(|v| (v.floor() as i32).div_euclid(unit))
    }

    fn local_offset(&self, local: &Vector3<i32>) -> usize {
        let unit = self.params.unit_resolution;
        (local[0] as usize * unit + local[1] as usize) * unit + local[2] as usize
    }

    fn sorted_keys(&self) -> Vec<Vector3<i32>> {
        let mut keys: Vec<_> = self.blocks.keys().copied().collect();
        keys.sort_by_key(|key| (key[0], key[1], key[2]));
        keys
    }

    /// Blocks touched by the truncation band of the frame, that is, the samples of each pixel ray within
    /// `truncation_distance` of its measured depth.
    fn touched_blocks(&self, sdf: &ProjectiveSdf, height: usize) -> HashSet<Vector3<i32>> {
        let step = self
            .params
            .unit_size()
            .min(self.params.truncation_distance)
            * 0.5;

        (0..height)
            .into_par_iter()
            .map(|row| {
                let mut keys = HashSet::new();
                sdf.for_each_band_sample(row, step, |point| {
                    keys.insert(self.block_of_point(&point));
                });
                keys
            })
            .reduce(HashSet::new, |mut keys_a, keys_b| {
                keys_a.extend(keys_b);
                keys_a
            })
    }

    fn grow_bounds(&mut self, key: &Vector3<i32>) {
        self.block_bounds = Some(match self.block_bounds {
            Some((lower, upper)) => (lower.inf(key), upper.sup(key)),
            None => (*key, *key),
        });
    }
}

impl VoxelStorage for HashTsdf {
    fn voxel_size(&self) -> f32 {
        self.params.voxel_size
    }

    fn origin(&self) -> Vector3<f32> {
        Vector3::zeros()
    }

    fn voxel(&self, index: &Vector3<i32>) -> Option<Voxel> {
        let unit = self.params.unit_resolution as i32;
        let block = self.blocks.get(&index.map(|v| v.div_euclid(unit)))?;
        let local = index.map(|v| v.rem_euclid(unit));
        Some(block.voxels[self.local_offset(&local)])
    }

    fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        let (lower, upper) = self.block_bounds?;
        let unit_size = self.params.unit_size();
        Some((
            lower.cast::<f32>() * unit_size,
            (upper + Vector3::repeat(1)).cast::<f32>() * unit_size,
        ))
    }
}

impl TsdfVolume for HashTsdf {
    fn params(&self) -> &VolumeParams {
        &self.params
    }

    /// Allocates the blocks the frame reaches and fuses the frame into them. Blocks touched by the
    /// truncation band whose voxels get no observation are not kept.
    /// Fails with [`Error::ResourceExhausted`], before any change, when the new blocks do not fit the budget.
    fn integrate(
        &mut self,
        frame: &DepthFrame,
        camera_pose: &Transform,
    ) -> Result<IntegrationSummary> {
        let sdf = ProjectiveSdf::new(frame, camera_pose, &self.params);
        let touched = self.touched_blocks(&sdf, frame.height());

        let unit = self.params.unit_resolution;
        let voxel_size = self.params.voxel_size;
        let max_weight = self.params.max_weight;
        let truncation = self.params.truncation_distance;
        let fuse = |key: &Vector3<i32>, block: &mut VoxelBlock| -> usize {
            let base = key * unit as i32;
            let mut updated = 0usize;
            for (offset, voxel) in block.voxels.iter_mut().enumerate() {
                let center = ((base + local_index(offset, unit)).cast::<f32>()
                    + Vector3::repeat(0.5))
                    * voxel_size;
                if let Some(distance) = sdf.observe(&center) {
                    voxel.integrate(distance, max_weight);
                    updated += 1;
                }
            }
            if updated > 0 {
                block.observed = true;
            }
            updated
        };

        let fresh: Vec<(Vector3<i32>, VoxelBlock, usize)> = touched
            .par_iter()
            .filter(|key| !self.blocks.contains_key(*key))
            .filter_map(|key| {
                let mut block = VoxelBlock::new(unit, truncation);
                let updated = fuse(key, &mut block);
                (updated > 0).then_some((*key, block, updated))
            })
            .collect();

        let required = self.blocks.len() + fresh.len();
        if required > self.params.max_active_units {
            return Err(Error::ResourceExhausted {
                required,
                budget: self.params.max_active_units,
            });
        }

        let mut updated_voxels: usize = self
            .blocks
            .par_iter_mut()
            .filter(|(key, _)| touched.contains(*key))
            .map(|(key, block)| fuse(key, block))
            .sum();

        let allocated_units = fresh.len();
        for (key, block, updated) in fresh {
            self.grow_bounds(&key);
            self.blocks.insert(key, block);
            updated_voxels += updated;
        }

        debug!(
            "integrated {} voxels, {} new blocks, {} allocated",
            updated_voxels,
            allocated_units,
            self.blocks.len()
        );

        Ok(IntegrationSummary {
            updated_voxels,
            allocated_units,
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
        let unit = self.params.unit_resolution;
        Box::new(
            self.sorted_keys()
                .into_iter()
                .filter_map(move |key| {
                    self.blocks
                        .get(&key)
                        .filter(|block| block.observed)
                        .map(|block| (key, block))
                })
                .flat_map(move |(key, block)| {
                    block
                        .voxels
                        .iter()
                        .enumerate()
                        .filter_map(move |(offset, voxel)| {
                            surface_point(self, &(key * unit as i32 + local_index(offset, unit)), voxel)
                        })
                }),
        )
    }

    fn reset(&mut self) {
        self.blocks.clear();
        self.block_bounds = None;
    }

    fn sdf_at(&self, point: &Vector3<f32>) -> Option<f32> {
        sample_sdf(self, point)
    }

    fn normal_at(&self, point: &Vector3<f32>) -> Option<Vector3<f32>> {
        surface_normal(self, point)
    }

    fn unit_visibility(&self, camera: &PinholeCamera, max_depth: f32) -> UnitVisibility {
        let unit_size = self.params.unit_size();
        let (visible, observed) = self
            .blocks
            .par_iter()
            .filter(|(_, block)| block.observed)
            .map(|(key, _)| {
                let min_corner = key.cast::<f32>() * unit_size;
                (is_cube_visible(camera, &min_corner, unit_size, max_depth) as usize, 1usize)
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
        UnitVisibility { visible, observed }
    }

    fn observed_voxels(&self) -> usize {
        self.blocks
            .par_iter()
            .map(|(_, block)| block.voxels.iter().filter(|v| v.is_observed()).count())
            .sum()
    }

    fn active_units(&self) -> usize {
        self.blocks.len()
    }
}
