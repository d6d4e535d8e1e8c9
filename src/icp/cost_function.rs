use nalgebra::Vector3;

/// Point to plane distance between a source point and a target surface sample.
pub struct PointPlaneDistance {}

impl PointPlaneDistance {
    /// Computes the residual and the Jacobian of the point-plane distance with
    /// respect to a small motion of the source, [translation, rotation].
    ///
    /// # Arguments
    ///
    /// * source_point - 3D point in the target frame.
    /// * target_point - 3D point in the target frame.
    /// * target_normal - Normal of the plane in the target frame.
    ///
    /// # Returns
    ///
    /// * The residual and the (6) Jacobian row.
    pub fn jacobian(
        &self,
        source_point: &Vector3<f32>,
        target_point: &Vector3<f32>,
        target_normal: &Vector3<f32>,
    ) -> (f32, [f32; 6]) {
        let residual = (target_point - source_point).dot(target_normal);
        let twist = source_point.cross(target_normal);
        (
            residual,
            [
                target_normal[0],
                target_normal[1],
                target_normal[2],
                twist[0],
                twist[1],
                twist[2],
            ],
        )
    }
}
