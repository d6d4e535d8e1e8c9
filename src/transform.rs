use nalgebra::{
    Isometry3, Matrix4, Point3, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6,
};
use ndarray::{Array2, Axis};

use std::ops;

/// Rigid transform in metric space.
/// Used both for camera poses (camera to submap/world) and submap poses (submap to world).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform(Isometry3<f32>);

impl Default for Transform {
    fn default() -> Self {
        Self::eye()
    }
}

impl Transform {
    pub fn eye() -> Self {
        Self(Isometry3::<f32>::identity())
    }

    /// Creates a transform from a translation and a (not necessarily unit) quaternion.
    pub fn new(translation: &Vector3<f32>, rotation: &Quaternion<f32>) -> Self {
        Self(Isometry3::<f32>::from_parts(
            Translation3::from(*translation),
            UnitQuaternion::from_quaternion(*rotation),
        ))
    }

    pub fn from_isometry(isometry: Isometry3<f32>) -> Self {
        Self(isometry)
    }

    pub fn from_translation(translation: &Vector3<f32>) -> Self {
        Self(Isometry3::<f32>::from_parts(
            Translation3::from(*translation),
            UnitQuaternion::identity(),
        ))
    }

    /// Exponential map with the decoupled parametrization used by the solvers:
    /// the first 3 entries are the translation, the last 3 the scaled rotation axis.
    pub fn from_se3_exp(translation_so3: &Vector6<f32>) -> Self {
        let translation =
            Translation3::new(translation_so3[0], translation_so3[1], translation_so3[2]);
        let so3 = Vector3::new(translation_so3[3], translation_so3[4], translation_so3[5]);

        Self(Isometry3::<f32>::from_parts(
            translation,
            UnitQuaternion::from_scaled_axis(so3),
        ))
    }

    /// Inverse of [`Transform::from_se3_exp`].
    pub fn log(&self) -> Vector6<f32> {
        let t = self.0.translation.vector;
        let r = self.0.rotation.scaled_axis();
        Vector6::new(t[0], t[1], t[2], r[0], r[1], r[2])
    }

    pub fn from_matrix4(matrix: &Matrix4<f32>) -> Self {
        let translation = Translation3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        let so3 = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(
            &matrix.fixed_slice::<3, 3>(0, 0).into_owned(),
        ));
        Self(Isometry3::<f32>::from_parts(translation, so3))
    }

    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Applies rotation and translation to a point.
    pub fn transform_vector(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.0.transform_point(&Point3::from(*vector)).coords
    }

    /// Applies only the rotation, for directions and normals.
    pub fn transform_normal(&self, normal: &Vector3<f32>) -> Vector3<f32> {
        self.0.rotation * normal
    }

    pub fn translation(&self) -> Vector3<f32> {
        self.0.translation.vector
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.0.rotation
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f32 {
        self.0.rotation.angle()
    }

    pub fn isometry(&self) -> &Isometry3<f32> {
        &self.0
    }

    /// Double precision copy, used by the pose graph solver.
    pub fn to_f64(&self) -> Isometry3<f64> {
        nalgebra::convert(self.0)
    }

    pub fn from_f64(isometry: &Isometry3<f64>) -> Self {
        Self(nalgebra::convert(*isometry))
    }
}

impl ops::Mul<&Array2<f32>> for &Transform {
    type Output = Array2<f32>;

    fn mul(self, rhs: &Array2<f32>) -> Self::Output {
        let mut result = Array2::<f32>::zeros((rhs.len_of(Axis(0)), 3));

        for (in_iter, mut out_iter) in rhs.axis_iter(Axis(0)).zip(result.axis_iter_mut(Axis(0))) {
            let v = self.transform_vector(&Vector3::new(in_iter[0], in_iter[1], in_iter[2]));
            out_iter[0] = v[0];
            out_iter[1] = v[1];
            out_iter[2] = v[2];
        }

        result
    }
}

impl ops::Mul<&Vector3<f32>> for &Transform {
    type Output = Vector3<f32>;

    fn mul(self, rhs: &Vector3<f32>) -> Self::Output {
        self.transform_vector(rhs)
    }
}

impl ops::Mul<&Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Self::Output {
        Transform(self.0 * rhs.0)
    }
}

impl From<Transform> for Matrix4<f32> {
    fn from(transform: Transform) -> Self {
        transform.0.into()
    }
}
