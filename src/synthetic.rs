//! Analytic scenes rendered into depth frames, for tests, benchmarks and demos.
use nalgebra::Vector3;
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use crate::{camera::CameraIntrinsics, image::DepthFrame, transform::Transform};

#[derive(Clone, Debug)]
pub enum Primitive {
    /// Points `x` with `normal . x = offset`.
    Plane { normal: Vector3<f32>, offset: f32 },
    Sphere { center: Vector3<f32>, radius: f32 },
}

impl Primitive {
    /// Distance along the ray to the first intersection in front of the origin.
    pub fn intersect(&self, origin: &Vector3<f32>, direction: &Vector3<f32>) -> Option<f32> {
        let t = match self {
            Primitive::Plane { normal, offset } => {
                let denominator = normal.dot(direction);
                if denominator.abs() < 1e-8 {
                    return None;
                }
                (offset - normal.dot(origin)) / denominator
            }
            Primitive::Sphere { center, radius } => {
                let oc = origin - center;
                let a = direction.norm_squared();
                let b = oc.dot(direction);
                let c = oc.norm_squared() - radius * radius;
                let discriminant = b * b - a * c;
                if discriminant < 0.0 {
                    return None;
                }
                let sqrt_disc = discriminant.sqrt();
                let near = (-b - sqrt_disc) / a;
                if near > 0.0 {
                    near
                } else {
                    (-b + sqrt_disc) / a
                }
            }
        };
        if t > 0.0 {
            Some(t)
        } else {
            None
        }
    }
}

/// A set of primitives seen by an ideal depth sensor, optionally with bounded uniform noise.
#[derive(Clone, Debug, Default)]
pub struct SyntheticScene {
    pub primitives: Vec<Primitive>,
    /// Maximum absolute depth error in meters.
    pub noise: f32,
    pub seed: u64,
}

impl SyntheticScene {
    pub fn new(primitives: Vec<Primitive>) -> Self {
        Self {
            primitives,
            noise: 0.0,
            seed: 0,
        }
    }

    pub fn with_noise(mut self, noise: f32, seed: u64) -> Self {
        self.noise = noise;
        self.seed = seed;
        self
    }

    /// A single wall facing the camera at `distance`.
    pub fn wall(distance: f32) -> Self {
        Self::new(vec![Primitive::Plane {
            normal: Vector3::z(),
            offset: distance,
        }])
    }

    /// A wall at z = 2.5, a floor at y = 1 and a row of spheres along the x axis, from -3 to 5 meters.
    /// Cameras at the origin looking down +z, moving along x, always see a few spheres.
    pub fn room() -> Self {
        let mut primitives = vec![
            Primitive::Plane {
                normal: Vector3::z(),
                offset: 2.5,
            },
            Primitive::Plane {
                normal: Vector3::y(),
                offset: 1.0,
            },
        ];
        for i in 0..14 {
            let x = -3.0 + i as f32 * 0.6;
            let y = if i % 2 == 0 { -0.3 } else { 0.35 };
            primitives.push(Primitive::Sphere {
                center: Vector3::new(x, y, 2.0 + 0.1 * (i % 3) as f32),
                radius: 0.15 + 0.05 * (i % 3) as f32,
            });
        }
        Self::new(primitives)
    }

    /// Depth of the first hit along a world ray.
    pub fn cast(&self, origin: &Vector3<f32>, direction: &Vector3<f32>) -> Option<f32> {
        self.primitives
            .iter()
            .filter_map(|primitive| primitive.intersect(origin, direction))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Renders the depth seen from `camera_to_world`. `index` selects the noise sample
    /// and is stored as the frame timestamp.
    pub fn render_depth(
        &self,
        intrinsics: &CameraIntrinsics,
        width: usize,
        height: usize,
        camera_to_world: &Transform,
        index: usize,
    ) -> DepthFrame {
        let origin = camera_to_world.translation();
        let mut depth = Array2::<f32>::zeros((height, width));

        depth
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut depth_row)| {
                let mut rng = StdRng::seed_from_u64(
                    self.seed ^ ((index as u64) << 32) ^ row as u64,
                );
                for col in 0..width {
                    // Unit depth rays: the hit distance is the depth.
                    let direction =
                        camera_to_world.transform_normal(&intrinsics.ray(col as f32, row as f32));
                    if let Some(z) = self.cast(&origin, &direction) {
                        let noise = if self.noise > 0.0 {
                            rng.gen_range(-self.noise..=self.noise)
                        } else {
                            0.0
                        };
                        depth_row[col] = z + noise;
                    }
                }
            });

        DepthFrame::new(intrinsics.clone().with_size(width, height), depth)
            .with_timestamp(index as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector6;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_simple_intrinsic(50.0, 50.0, 31.5, 23.5)
    }

    #[test]
    fn should_render_wall_depth() {
        let frame = SyntheticScene::wall(2.0).render_depth(&intrinsics(), 64, 48, &Transform::eye(), 0);
        assert!(frame.depth.iter().all(|z| (z - 2.0).abs() < 1e-5));
        assert_eq!(frame.timestamp, Some(0.0));
    }

    #[test]
    fn should_see_nearest_primitive() {
        let scene = SyntheticScene::new(vec![
            Primitive::Plane {
                normal: Vector3::z(),
                offset: 3.0,
            },
            Primitive::Sphere {
                center: Vector3::new(0.0, 0.0, 2.0),
                radius: 0.5,
            },
        ]);
        let origin = Vector3::zeros();
        assert!((scene.cast(&origin, &Vector3::z()).unwrap() - 1.5).abs() < 1e-5);
        assert!((scene.cast(&origin, &Vector3::new(1.0, 0.0, 1.0)).unwrap() - 3.0).abs() < 1e-5);
        assert!(scene.cast(&origin, &-Vector3::z()).is_none());
    }

    #[test]
    fn should_follow_camera_pose() {
        let pose = Transform::from_se3_exp(&Vector6::new(0.0, 0.0, 0.5, 0.0, 0.0, 0.0));
        let frame = SyntheticScene::wall(2.0).render_depth(&intrinsics(), 64, 48, &pose, 0);
        assert!((frame.depth[[24, 32]] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn should_bound_noise_deterministically() {
        let scene = SyntheticScene::wall(2.0).with_noise(0.01, 7);
        let frame_a = scene.render_depth(&intrinsics(), 64, 48, &Transform::eye(), 3);
        let frame_b = scene.render_depth(&intrinsics(), 64, 48, &Transform::eye(), 3);

        assert_eq!(frame_a.depth, frame_b.depth);
        assert!(frame_a.depth.iter().all(|z| (z - 2.0).abs() <= 0.01 + 1e-6));
        assert!(frame_a.depth.iter().any(|z| (z - 2.0).abs() > 1e-4));
    }
}
