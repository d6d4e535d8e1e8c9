use nalgebra::Vector3;
use ndarray::{Array2, Array3};

use crate::{camera::CameraIntrinsics, image::DepthFrame, pointcloud::PointCloud};

use super::resize::{resize_range_normals, resize_range_points};

/// A point cloud that comes from an image-based measurement. It representation holds its grid structure.
/// Frames back-projected from depth and surfaces raycast from a volume share this type.
#[derive(Clone, Debug)]
pub struct RangeImage {
    /// 3D points in the camera frame, as array with shape: (height, width, 3)
    pub points: Array3<f32>,
    /// Mask of valid points, as array with shape: (height, width)
    pub mask: Array2<u8>,
    /// Normals of the points, as array with shape: (height, width, 3)
    pub normals: Option<Array3<f32>>,
    /// Camera parameters that originated the image.
    pub camera: CameraIntrinsics,
    valid_points: usize,
}

impl RangeImage {
    /// Creates a new range image from a depth frame.
    ///
    /// # Arguments
    ///
    /// * frame - Depth frame in meters. Preferably, already filtered.
    pub fn from_depth_frame(frame: &DepthFrame) -> Self {
        let (width, height) = (frame.width(), frame.height());
        let mut points = Array3::zeros((height, width, 3));
        let mut mask = Array2::<u8>::zeros((height, width));
        let mut valid_points = 0;

        for row in 0..height {
            for col in 0..width {
                if let Some(z) = frame.depth_at(row, col) {
                    let point3d = frame.camera.backproject(col as f32, row as f32, z);
                    points[[row, col, 0]] = point3d[0];
                    points[[row, col, 1]] = point3d[1];
                    points[[row, col, 2]] = point3d[2];
                    mask[[row, col]] = 1;
                    valid_points += 1;
                }
            }
        }

        Self {
            points,
            mask,
            normals: None,
            camera: frame.camera.clone(),
            valid_points,
        }
    }

    /// Assembles a range image from already computed buffers.
    pub fn from_parts(
        points: Array3<f32>,
        mask: Array2<u8>,
        normals: Option<Array3<f32>>,
        camera: CameraIntrinsics,
    ) -> Self {
        let valid_points = mask.iter().filter(|m| **m == 1).count();
        Self {
            points,
            mask,
            normals,
            camera,
            valid_points,
        }
    }

    pub fn width(&self) -> usize {
        self.points.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.points.shape()[0]
    }

    pub fn valid_points_count(&self) -> usize {
        self.valid_points
    }

    pub fn len(&self) -> usize {
        let shape = self.points.shape();
        shape[0] * shape[1]
    }

    pub fn is_empty(&self) -> bool {
        self.valid_points == 0
    }

    /// Fraction of pixels holding a valid point.
    pub fn coverage(&self) -> f32 {
        if self.len() == 0 {
            0.0
        } else {
            self.valid_points as f32 / self.len() as f32
        }
    }

    pub fn get_point(&self, row: usize, col: usize) -> Option<Vector3<f32>> {
        if col < self.width() && row < self.height() && self.mask[(row, col)] == 1 {
            Some(Vector3::new(
                self.points[(row, col, 0)],
                self.points[(row, col, 1)],
                self.points[(row, col, 2)],
            ))
        } else {
            None
        }
    }

    /// Normal at a valid pixel. Pixels whose normal could not be estimated return `None`.
    pub fn get_normal(&self, row: usize, col: usize) -> Option<Vector3<f32>> {
        let normals = self.normals.as_ref()?;
        if col < self.width() && row < self.height() && self.mask[(row, col)] == 1 {
            let normal = Vector3::new(
                normals[(row, col, 0)],
                normals[(row, col, 1)],
                normals[(row, col, 2)],
            );
            if normal.norm_squared() > 0.5 {
                return Some(normal);
            }
        }
        None
    }

    /// Picks the finite difference direction along one image axis. Prefers the central difference
    /// unless one side is much farther than the other, which indicates a depth discontinuity.
    fn axis_tangent(
        center: &Vector3<f32>,
        prev: Option<Vector3<f32>>,
        next: Option<Vector3<f32>>,
    ) -> Option<Vector3<f32>> {
        const RATIO_THRESHOLD_SQUARED: f32 = 4.0;

        match (prev, next) {
            (Some(prev), Some(next)) => {
                let prev_dist_squared = (prev - center).norm_squared();
                let next_dist_squared = (next - center).norm_squared();
                let ratio = prev_dist_squared / next_dist_squared;
                if ratio < RATIO_THRESHOLD_SQUARED && ratio > 1.0 / RATIO_THRESHOLD_SQUARED {
                    Some(next - prev)
                } else if prev_dist_squared < next_dist_squared {
                    Some(center - prev)
                } else {
                    Some(next - center)
                }
            }
            (Some(prev), None) => Some(center - prev),
            (None, Some(next)) => Some(next - center),
            (None, None) => None,
        }
    }

    /// Estimates per-pixel normals from the neighbor points. Normals face the camera.
    /// Pixels without enough neighbors get a zero normal.
    pub fn compute_normals(&mut self) -> &mut Self {
        let height = self.height();
        let width = self.width();

        let mut normals = Array3::<f32>::zeros((height, width, 3));

        for row in 0..height {
            for col in 0..width {
                let center = match self.get_point(row, col) {
                    Some(center) => center,
                    None => continue,
                };

                let left = col.checked_sub(1).and_then(|c| self.get_point(row, c));
                let right = self.get_point(row, col + 1);
                let top = row.checked_sub(1).and_then(|r| self.get_point(r, col));
                let bottom = self.get_point(row + 1, col);

                let (left_to_right, top_to_bottom) = match (
                    Self::axis_tangent(&center, left, right),
                    Self::axis_tangent(&center, top, bottom),
                ) {
                    (Some(horizontal), Some(vertical)) => (horizontal, vertical),
                    _ => continue,
                };

                let mut normal = top_to_bottom.cross(&left_to_right);
                let normal_magnitude = normal.magnitude();
                if normal_magnitude > 1e-6_f32 {
                    normal /= normal_magnitude;
                    if normal.dot(&center) > 0.0 {
                        normal = -normal;
                    }
                    normals[(row, col, 0)] = normal[0];
                    normals[(row, col, 1)] = normal[1];
                    normals[(row, col, 2)] = normal[2];
                }
            }
        }

        self.normals = Some(normals);

        self
    }

    pub fn scale_down(&self) -> RangeImage {
        let (width, height) = (self.width() / 2, self.height() / 2);
        let (points, mask) =
            resize_range_points(&self.points.view(), &self.mask.view(), width, height);

        let normals = self
            .normals
            .as_ref()
            .map(|normals| resize_range_normals(&normals.view(), &self.mask.view(), width, height));

        RangeImage::from_parts(points, mask, normals, self.camera.scale(0.5))
    }

    /// Builds a pyramid where the first element is this image and each following
    /// level halves the resolution of the previous one.
    pub fn pyramid(self, levels: usize) -> Vec<RangeImage> {
        let mut pyramid = vec![self];

        for _ in 1..levels {
            let next = match pyramid.last() {
                Some(prev) if prev.width() >= 2 && prev.height() >= 2 => prev.scale_down(),
                _ => break,
            };
            pyramid.push(next);
        }

        pyramid
    }
}

impl From<&RangeImage> for PointCloud {
    fn from(image_pcl: &RangeImage) -> PointCloud {
        let valid_pixels = || {
            image_pcl
                .mask
                .indexed_iter()
                .filter(|(_, mask)| **mask == 1)
                .map(|((row, col), _)| (row, col))
        };

        let points = Array2::from_shape_vec(
            (image_pcl.valid_points_count(), 3),
            valid_pixels()
                .flat_map(|(row, col)| {
                    [
                        image_pcl.points[(row, col, 0)],
                        image_pcl.points[(row, col, 1)],
                        image_pcl.points[(row, col, 2)],
                    ]
                })
                .collect(),
        )
        .unwrap_or_else(|_| Array2::zeros((0, 3)));

        let normals = image_pcl.normals.as_ref().map(|normals| {
            Array2::from_shape_vec(
                (image_pcl.valid_points_count(), 3),
                valid_pixels()
                    .flat_map(|(row, col)| {
                        [
                            normals[(row, col, 0)],
                            normals[(row, col, 1)],
                            normals[(row, col, 2)],
                        ]
                    })
                    .collect(),
            )
            .unwrap_or_else(|_| Array2::zeros((0, 3)))
        });

        PointCloud { points, normals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::{plane_frame, small_intrinsics};
    use rstest::*;

    #[rstest]
    fn should_backproject_depth_frame(plane_frame: DepthFrame) {
        let range_image = RangeImage::from_depth_frame(&plane_frame);

        assert_eq!(range_image.height(), plane_frame.height());
        assert_eq!(range_image.width(), plane_frame.width());
        assert_eq!(range_image.valid_points_count(), range_image.len());

        let point = range_image.get_point(10, 20).unwrap();
        assert!((point[2] - 1.5).abs() < 1e-5);
    }

    #[rstest]
    fn should_compute_normals_facing_camera(plane_frame: DepthFrame) {
        let mut range_image = RangeImage::from_depth_frame(&plane_frame);
        range_image.compute_normals();

        let normal = range_image.get_normal(30, 40).unwrap();
        assert!((normal.norm() - 1.0).abs() < 1e-5);
        assert!((normal[2] + 1.0).abs() < 1e-4);
    }

    #[rstest]
    fn should_skip_isolated_points(small_intrinsics: CameraIntrinsics) {
        let mut depth = Array2::<f32>::zeros((8, 8));
        depth[(4, 4)] = 1.0;
        let mut range_image = RangeImage::from_depth_frame(&DepthFrame::new(small_intrinsics, depth));
        range_image.compute_normals();

        assert!(range_image.get_point(4, 4).is_some());
        assert!(range_image.get_normal(4, 4).is_none());
    }

    #[rstest]
    fn verify_pyramid(plane_frame: DepthFrame) {
        let mut range_image = RangeImage::from_depth_frame(&plane_frame);
        range_image.compute_normals();
        let pyramid = range_image.pyramid(3);

        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid[1].width(), plane_frame.width() / 2);
        assert_eq!(pyramid[2].height(), plane_frame.height() / 4);
        assert!(pyramid[2].normals.is_some());
        assert!((pyramid[2].camera.fx - plane_frame.camera.fx * 0.25).abs() < 1e-9);
    }

    #[rstest]
    fn should_convert_into_pointcloud(plane_frame: DepthFrame) {
        let mut range_image = RangeImage::from_depth_frame(&plane_frame);
        range_image.compute_normals();

        let pcl = PointCloud::from(&range_image);
        assert_eq!(pcl.len(), range_image.valid_points_count());
        assert_eq!(pcl.normals.unwrap().shape(), &[pcl.points.shape()[0], 3]);
    }
}
