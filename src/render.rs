use nalgebra::Vector3;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

use crate::range_image::RangeImage;

/// Phong reflection coefficients of the grey surface material.
#[derive(Clone, Debug)]
pub struct Shading {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Default for Shading {
    fn default() -> Self {
        Self {
            ambient: 0.3,
            diffuse: 0.5,
            specular: 0.2,
            shininess: 20.0,
        }
    }
}

impl Shading {
    /// Intensity in [0, 1] of a point lit by a white light, everything in the camera frame.
    pub fn intensity(
        &self,
        point: &Vector3<f32>,
        normal: &Vector3<f32>,
        light_position: &Vector3<f32>,
    ) -> f32 {
        let to_light = (light_position - point).normalize();
        let to_eye = (-point).normalize();
        let n_dot_l = normal.dot(&to_light);
        if n_dot_l <= 0.0 {
            return self.ambient;
        }
        let reflected = (normal * (2.0 * n_dot_l) - to_light).normalize();

        let value = self.ambient
            + self.diffuse * n_dot_l
            + self.specular * reflected.dot(&to_eye).max(0.0).powf(self.shininess);
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Shades a raycast surface into an RGB image with shape (height, width, 3).
    /// Pixels without surface are black.
    pub fn render(&self, surface: &RangeImage, light_position: &Vector3<f32>) -> Array3<u8> {
        let mut image = Array3::<u8>::zeros((surface.height(), surface.width(), 3));

        image
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut image_row)| {
                for col in 0..surface.width() {
                    if let (Some(point), Some(normal)) =
                        (surface.get_point(row, col), surface.get_normal(row, col))
                    {
                        let gray =
                            (self.intensity(&point, &normal, light_position) * 255.0).round() as u8;
                        image_row[[col, 0]] = gray;
                        image_row[[col, 1]] = gray;
                        image_row[[col, 2]] = gray;
                    }
                }
            });

        image
    }
}
