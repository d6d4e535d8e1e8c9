use nalgebra::Vector3;
use serde_derive::{Deserialize, Serialize};

use super::transform::Transform;

/// Camera intrinsic parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length and pixel scale in the X-axis.
    pub fx: f64,
    /// Focal length and pixel scale in the Y-axis.
    pub fy: f64,
    /// Camera X-center.
    pub cx: f64,
    /// Camera Y-center.
    pub cy: f64,
    pub width: Option<usize>,
    pub height: Option<usize>,
}

impl CameraIntrinsics {
    pub fn from_simple_intrinsic(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width: None,
            height: None,
        }
    }

    /// Project a 3D point into image space.
    ///
    /// # Arguments
    ///
    /// * point: The 3D point.
    ///
    /// # Returns
    ///
    /// * (x and y) coordinates.
    pub fn project(&self, point: &Vector3<f32>) -> (f32, f32) {
        (
            point[0] * self.fx as f32 / point[2] + self.cx as f32,
            point[1] * self.fy as f32 / point[2] + self.cy as f32,
        )
    }

    pub fn backproject(&self, x: f32, y: f32, z: f32) -> Vector3<f32> {
        Vector3::new(
            (x - self.cx as f32) * z / self.fx as f32,
            (y - self.cy as f32) * z / self.fy as f32,
            z,
        )
    }

    /// Viewing ray through a pixel with unit depth, that is, `backproject(x, y, 1)`.
    pub fn ray(&self, x: f32, y: f32) -> Vector3<f32> {
        self.backproject(x, y, 1.0)
    }

    /// Scale the camera parameters according to the given scale.
    ///
    /// # Arguments
    ///
    /// * scale: The scale factor.
    ///
    /// # Returns
    ///
    /// * A new camera with scaled parameters.
    pub fn scale(&self, scale: f64) -> Self {
        Self {
            fx: self.fx * scale,
            fy: self.fy * scale,
            cx: self.cx * scale,
            cy: self.cy * scale,
            width: self
                .width
                .map(|width| (width as f64 * scale) as usize),
            height: self
                .height
                .map(|height| (height as f64 * scale) as usize),
        }
    }

    pub fn size(&mut self, width: usize, height: usize) {
        self.width = Some(width);
        self.height = Some(height);
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.size(width, height);
        self
    }

    /// Intrinsics for images of `width` x `height` covering the same field of view.
    /// Intrinsics without a size are assumed to already match.
    pub fn resized(&self, width: usize, height: usize) -> Self {
        let (sx, sy) = match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {
                (width as f64 / w as f64, height as f64 / h as f64)
            }
            _ => (1.0, 1.0),
        };
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            width: Some(width),
            height: Some(height),
        }
    }
}

/// Intrinsics plus a pose and an image size.
#[derive(Clone, Debug)]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub camera_to_world: Transform,
    world_to_camera: Transform,
    pub width: usize,
    pub height: usize,
}

impl PinholeCamera {
    pub fn new(
        intrinsics: CameraIntrinsics,
        camera_to_world: Transform,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            intrinsics,
            world_to_camera: camera_to_world.inverse(),
            camera_to_world,
            width,
            height,
        }
    }

    pub fn world_to_camera(&self) -> &Transform {
        &self.world_to_camera
    }

    /// Project a 3D point into image space.
    ///
    /// # Arguments
    ///
    /// * point: The 3D point in world coordinates.
    ///
    /// # Returns
    ///
    /// * (x and y) coordinates.
    pub fn project(&self, point: &Vector3<f32>) -> (f32, f32) {
        self.intrinsics
            .project(&self.world_to_camera.transform_vector(point))
    }

    /// Projects a world point, returning `None` when it is behind the camera,
    /// beyond `max_depth` (if positive) or outside of the image.
    pub fn project_if_visible(&self, point: &Vector3<f32>, max_depth: f32) -> Option<(f32, f32)> {
        let camera_point = self.world_to_camera.transform_vector(point);
        if camera_point[2] <= 0.0 || (max_depth > 0.0 && camera_point[2] > max_depth) {
            return None;
        }
        let (x, y) = self.intrinsics.project(&camera_point);

        if x >= 0.0 && x < self.width as f32 && y >= 0.0 && y < self.height as f32 {
            Some((x, y))
        } else {
            None
        }
    }
}
