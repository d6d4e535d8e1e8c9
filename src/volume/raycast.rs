use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use rayon::prelude::*;

use crate::{camera::CameraIntrinsics, range_image::RangeImage, transform::Transform};

use super::{
    storage::{intersect_box, sample_sdf, surface_normal, VoxelStorage},
    VolumeParams,
};

struct RayMarcher<'a, S: VoxelStorage> {
    storage: &'a S,
    bounds: (Vector3<f32>, Vector3<f32>),
    step: f32,
    unobserved_step: f32,
}

impl<'a, S: VoxelStorage> RayMarcher<'a, S> {
    /// First front-to-back zero crossing along the ray, with its field normal.
    fn cast(
        &self,
        origin: &Vector3<f32>,
        direction: &Vector3<f32>,
    ) -> Option<(Vector3<f32>, Option<Vector3<f32>>)> {
        let (t_enter, t_exit) = intersect_box(origin, direction, &self.bounds)?;

        let mut t = t_enter;
        let mut previous: Option<f32> = None;
        while t <= t_exit {
            let point = origin + direction * t;
            match sample_sdf(self.storage, &point) {
                Some(sdf) => {
                    if let Some(previous_sdf) = previous {
                        if previous_sdf > 0.0 && sdf <= 0.0 {
                            let t_previous = t - self.step;
                            let t_hit = t_previous + self.step * previous_sdf / (previous_sdf - sdf);
                            let hit = origin + direction * t_hit;
                            return Some((hit, surface_normal(self.storage, &hit)));
                        }
                    }
                    previous = Some(sdf);
                    t += self.step;
                }
                None => {
                    previous = None;
                    t += self.unobserved_step;
                }
            }
        }

        None
    }
}

/// Renders the zero level set seen from `camera_pose`, a camera to volume transform.
/// Points and normals of the result are in the camera frame. Sized intrinsics are rescaled to
/// `width` x `height`.
pub(crate) fn raycast<S: VoxelStorage>(
    storage: &S,
    params: &VolumeParams,
    camera_pose: &Transform,
    intrinsics: &CameraIntrinsics,
    width: usize,
    height: usize,
) -> RangeImage {
    let mut points = Array3::<f32>::zeros((height, width, 3));
    let mut normals = Array3::<f32>::zeros((height, width, 3));
    let mut mask = Array2::<u8>::zeros((height, width));
    let camera = intrinsics.resized(width, height);

    let bounds = match storage.bounds() {
        Some(bounds) => bounds,
        None => return RangeImage::from_parts(points, mask, Some(normals), camera),
    };

    let step = params.raycast_step_factor * params.voxel_size;
    let marcher = RayMarcher {
        storage,
        bounds,
        step,
        unobserved_step: (params.truncation_distance * 0.5).max(step),
    };

    let world_to_camera = camera_pose.inverse();
    let origin = camera_pose.translation();

    let hits: Vec<Vec<_>> = (0..height)
        .into_par_iter()
        .map(|row| {
            (0..width)
                .map(|col| {
                    let direction = camera_pose
                        .transform_normal(&camera.ray(col as f32, row as f32).normalize());
                    marcher.cast(&origin, &direction)
                })
                .collect()
        })
        .collect();

    for (row, row_hits) in hits.into_iter().enumerate() {
        for (col, hit) in row_hits.into_iter().enumerate() {
            let (point, normal) = match hit {
                Some(hit) => hit,
                None => continue,
            };
            let point = world_to_camera.transform_vector(&point);
            points[(row, col, 0)] = point[0];
            points[(row, col, 1)] = point[1];
            points[(row, col, 2)] = point[2];
            mask[(row, col)] = 1;

            if let Some(normal) = normal {
                let normal = world_to_camera.transform_normal(&normal);
                normals[(row, col, 0)] = normal[0];
                normals[(row, col, 1)] = normal[1];
                normals[(row, col, 2)] = normal[2];
            }
        }
    }

    RangeImage::from_parts(points, mask, Some(normals), camera)
}
