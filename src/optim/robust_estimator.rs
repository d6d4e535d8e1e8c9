/// Iteratively reweighted least squares weights.
pub trait RobustEstimator {
    /// Weight of a residual, multiplies both its jacobian row and value in the normal equations.
    fn weight(&self, residual: f32) -> f32;
}

pub struct HuberEstimator {
    pub delta: f32,
}

impl RobustEstimator for HuberEstimator {
    fn weight(&self, residual: f32) -> f32 {
        let abs_residual = residual.abs();
        if abs_residual <= self.delta {
            1.0
        } else {
            self.delta / abs_residual
        }
    }
}
