use nalgebra::Vector3;

use crate::camera::PinholeCamera;

use super::Voxel;

/// Read access shared by the dense and hashed layouts.
/// Per-voxel algorithms are generic over it so that the layout is resolved at compile time.
pub(crate) trait VoxelStorage: Sync {
    fn voxel_size(&self) -> f32;

    /// Position of the corner of voxel (0, 0, 0) in the volume frame.
    fn origin(&self) -> Vector3<f32>;

    /// Voxel at integer grid coordinates, `None` when outside of the grid or not allocated.
    fn voxel(&self, index: &Vector3<i32>) -> Option<Voxel>;

    /// Axis aligned box, in the volume frame, containing every addressable voxel.
    fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)>;

    fn voxel_center(&self, index: &Vector3<i32>) -> Vector3<f32> {
        self.origin() + (index.cast::<f32>() + Vector3::repeat(0.5)) * self.voxel_size()
    }
}

/// Trilinear interpolation of the distance field at a point of the volume frame.
/// Fails when a contributing voxel is unobserved.
pub(crate) fn sample_sdf<S: VoxelStorage>(storage: &S, point: &Vector3<f32>) -> Option<f32> {
    const MIN_CONTRIBUTION: f32 = 1e-5;

    let grid = (point - storage.origin()) / storage.voxel_size() - Vector3::repeat(0.5);
    let base = grid.map(|v| v.floor());
    let frac = grid - base;
    let base = base.map(|v| v as i32);

    let mut value = 0.0;
    for corner in 0..8 {
        let offset = Vector3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
        let contribution = (0..3)
            .map(|axis| {
                if offset[axis] == 1 {
                    frac[axis]
                } else {
                    1.0 - frac[axis]
                }
            })
            .product::<f32>();
        if contribution < MIN_CONTRIBUTION {
            continue;
        }

        let voxel = storage.voxel(&(base + offset))?;
        if !voxel.is_observed() {
            return None;
        }
        value += voxel.tsdf * contribution;
    }

    Some(value)
}

/// Central difference gradient of the distance field, pointing towards free space.
pub(crate) fn sdf_gradient<S: VoxelStorage>(
    storage: &S,
    point: &Vector3<f32>,
) -> Option<Vector3<f32>> {
    let step = storage.voxel_size();
    let mut gradient = Vector3::zeros();
    for axis in 0..3 {
        let mut delta = Vector3::zeros();
        delta[axis] = step;
        let forward = sample_sdf(storage, &(point + delta))?;
        let backward = sample_sdf(storage, &(point - delta))?;
        gradient[axis] = (forward - backward) / (2.0 * step);
    }
    Some(gradient)
}

/// Unit normal of the distance field.
pub(crate) fn surface_normal<S: VoxelStorage>(
    storage: &S,
    point: &Vector3<f32>,
) -> Option<Vector3<f32>> {
    let gradient = sdf_gradient(storage, point)?;
    let norm = gradient.norm();
    if norm > 1e-6 {
        Some(gradient / norm)
    } else {
        None
    }
}

/// Near-surface extraction: voxels within one voxel of the zero level are projected
/// onto it along the field normal.
pub(crate) fn surface_point<S: VoxelStorage>(
    storage: &S,
    index: &Vector3<i32>,
    voxel: &Voxel,
) -> Option<(Vector3<f32>, Vector3<f32>)> {
    if !voxel.is_observed() || voxel.tsdf.abs() >= storage.voxel_size() {
        return None;
    }
    let center = storage.voxel_center(index);
    let normal = surface_normal(storage, &center)?;
    Some((center - normal * voxel.tsdf, normal))
}

/// Whether any corner or the center of an axis aligned cube projects inside the camera image.
pub(crate) fn is_cube_visible(
    camera: &PinholeCamera,
    min_corner: &Vector3<f32>,
    size: f32,
    max_depth: f32,
) -> bool {
    let center = min_corner + Vector3::repeat(size * 0.5);
    if camera.project_if_visible(&center, max_depth).is_some() {
        return true;
    }
    (0..8).any(|corner| {
        let offset = Vector3::new(
            (corner & 1) as f32,
            ((corner >> 1) & 1) as f32,
            ((corner >> 2) & 1) as f32,
        ) * size;
        camera
            .project_if_visible(&(min_corner + offset), max_depth)
            .is_some()
    })
}

/// Ray/box intersection, returns the entry and exit distances along a unit direction.
pub(crate) fn intersect_box(
    origin: &Vector3<f32>,
    direction: &Vector3<f32>,
    bounds: &(Vector3<f32>, Vector3<f32>),
) -> Option<(f32, f32)> {
    let (lower, upper) = bounds;
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;

    for axis in 0..3 {
        if direction[axis].abs() < 1e-9 {
            if origin[axis] < lower[axis] || origin[axis] > upper[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / direction[axis];
        let t0 = (lower[axis] - origin[axis]) * inv;
        let t1 = (upper[axis] - origin[axis]) * inv;
        let (t0, t1) = if t0 < t1 { (t0, t1) } else { (t1, t0) };
        t_enter = t_enter.max(t0);
        t_exit = t_exit.min(t1);
    }

    let t_enter = t_enter.max(0.0);
    if t_exit > t_enter {
        Some((t_enter, t_exit))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Planar field z = 1 on a 16^3 grid, fully observed.
    struct PlaneStorage;

    impl VoxelStorage for PlaneStorage {
        fn voxel_size(&self) -> f32 {
            0.125
        }

        fn origin(&self) -> Vector3<f32> {
            Vector3::zeros()
        }

        fn voxel(&self, index: &Vector3<i32>) -> Option<Voxel> {
            if index.iter().all(|v| (0..16).contains(v)) {
                let center = self.voxel_center(index);
                Some(Voxel {
                    tsdf: 1.0 - center[2],
                    weight: 1,
                })
            } else {
                None
            }
        }

        fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
            Some((Vector3::zeros(), Vector3::repeat(2.0)))
        }
    }

    #[test]
    fn should_interpolate_linear_field() {
        let value = sample_sdf(&PlaneStorage, &Vector3::new(0.9, 1.1, 0.77)).unwrap();
        assert!((value - 0.23).abs() < 1e-5);
        assert!(sample_sdf(&PlaneStorage, &Vector3::new(-1.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn should_point_normal_to_free_space() {
        let normal = surface_normal(&PlaneStorage, &Vector3::new(1.0, 1.0, 1.0)).unwrap();
        assert!((normal - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-5);
    }

    #[test]
    fn should_project_voxels_onto_surface() {
        // Voxel 7 on z has its center at 0.9375, within one voxel of the plane.
        let index = Vector3::new(8, 8, 7);
        let voxel = PlaneStorage.voxel(&index).unwrap();
        let (point, _) = surface_point(&PlaneStorage, &index, &voxel).unwrap();
        assert!((point[2] - 1.0).abs() < 1e-5);

        let far = Vector3::new(8, 8, 2);
        assert!(surface_point(&PlaneStorage, &far, &PlaneStorage.voxel(&far).unwrap()).is_none());
    }

    #[test]
    fn should_clip_rays_to_box() {
        let bounds = (Vector3::zeros(), Vector3::repeat(2.0));
        let (t0, t1) = intersect_box(
            &Vector3::new(1.0, 1.0, -1.0),
            &Vector3::new(0.0, 0.0, 1.0),
            &bounds,
        )
        .unwrap();
        assert!((t0 - 1.0).abs() < 1e-6);
        assert!((t1 - 3.0).abs() < 1e-6);

        assert!(intersect_box(
            &Vector3::new(5.0, 1.0, -1.0),
            &Vector3::new(0.0, 0.0, 1.0),
            &bounds
        )
        .is_none());
    }
}
