use nalgebra::Vector3;
use ndarray::prelude::*;

use crate::transform::Transform;

/// Unstructured point cloud with optional normals, shape (N, 3) each.
#[derive(Clone, Debug)]
pub struct PointCloud {
    pub points: Array2<f32>,
    pub normals: Option<Array2<f32>>,
}

impl PointCloud {
    /// Packs a sequence of (point, normal) pairs.
    pub fn from_points_normals<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (Vector3<f32>, Vector3<f32>)>,
    {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for (point, normal) in iter {
            points.extend_from_slice(point.as_slice());
            normals.extend_from_slice(normal.as_slice());
        }
        let len = points.len() / 3;
        Self {
            points: Array2::from_shape_vec((len, 3), points)
                .unwrap_or_else(|_| Array2::zeros((0, 3))),
            normals: Some(
                Array2::from_shape_vec((len, 3), normals)
                    .unwrap_or_else(|_| Array2::zeros((0, 3))),
            ),
        }
    }

    pub fn empty() -> Self {
        Self {
            points: Array2::<f32>::zeros((0, 3)),
            normals: Some(Array2::<f32>::zeros((0, 3))),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Vector3<f32> {
        let p = self.points.row(index);
        Vector3::new(p[0], p[1], p[2])
    }

    /// Iterates over (point, normal) pairs. Clouds without normals yield zero normals.
    pub fn iter(&self) -> impl Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_ {
        (0..self.len()).map(move |i| {
            let normal = self
                .normals
                .as_ref()
                .map(|normals| {
                    let n = normals.row(i);
                    Vector3::new(n[0], n[1], n[2])
                })
                .unwrap_or_else(Vector3::zeros);
            (self.point(i), normal)
        })
    }
}

impl std::ops::Mul<&PointCloud> for &Transform {
    type Output = PointCloud;
    fn mul(self, rhs: &PointCloud) -> PointCloud {
        PointCloud {
            points: self * &rhs.points,
            normals: rhs.normals.as_ref().map(|normals| {
                let mut rotated = normals.clone();
                for mut normal in rotated.axis_iter_mut(Axis(0)) {
                    let n = self.transform_normal(&Vector3::new(normal[0], normal[1], normal[2]));
                    normal[0] = n[0];
                    normal[1] = n[1];
                    normal[2] = n[2];
                }
                rotated
            }),
        }
    }
}
