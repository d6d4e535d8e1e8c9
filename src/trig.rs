use nalgebra::Vector3;

/// Returns the angle between two unit normals in radians.
///
/// # Arguments
///
/// * lfs - Left normal.
/// * rfs - Right normal.
///
/// # Returns
///
/// * Angle between the two normals in radians, in [0, pi].
pub fn angle_between_normals(lfs: &Vector3<f32>, rfs: &Vector3<f32>) -> f32 {
    lfs.dot(rfs).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_between_normals() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        assert_eq!(angle_between_normals(&up, &up), 0.0);
        assert!(
            (angle_between_normals(&up, &Vector3::new(0.0, 1.0, 0.0))
                - std::f32::consts::FRAC_PI_2)
                .abs()
                < 1e-6
        );
        // Rounding may push the dot product slightly above one.
        assert_eq!(
            angle_between_normals(&up, &Vector3::new(0.0, 0.0, 1.000_000_1)),
            0.0
        );
    }
}
