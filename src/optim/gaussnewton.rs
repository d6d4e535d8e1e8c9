use nalgebra::{Cholesky, Const, SMatrix, SVector};
use num::Zero;

/// Implements the standard Gauss Newton optimization
///
/// # Type parameters
///
/// * `DIM` - The dimension of the problem.
pub struct GaussNewton<const DIM: usize> {
    hessian: SMatrix<f32, DIM, DIM>,
    gradient: SVector<f32, DIM>,
    squared_residual_sum: f32,
    count: usize,
}

impl<const DIM: usize> Default for GaussNewton<DIM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DIM: usize> GaussNewton<DIM> {
    /// Creates a new Gauss Newton optimizer.
    pub fn new() -> Self {
        Self {
            hessian: SMatrix::zeros(),
            gradient: SVector::zeros(),
            squared_residual_sum: 0.0,
            count: 0,
        }
    }

    /// Resets the optimizer.
    pub fn reset(&mut self) {
        self.hessian.set_zero();
        self.gradient.set_zero();
        self.squared_residual_sum = 0.0;
        self.count = 0;
    }

    /// Adds a new step to the optimizer.
    ///
    /// # Arguments
    ///
    /// * `residual` - The residual of the step.
    /// * `jacobian` - The jacobian of the step.
    pub fn step(&mut self, residual: f32, jacobian: &[f32; DIM]) {
        let mut jt_j = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            let ival = jacobian[i];
            self.gradient[i] += ival * residual;

            jt_j[i][i] = ival * ival;
            for j in i + 1..DIM {
                let jval = jacobian[j];
                let mul = ival * jval;
                jt_j[i][j] = mul;
                jt_j[j][i] = mul;
            }
        }

        // self.hessian += SMatrix::from_data(ArrayStorage(jt_j));
        for (i, row) in jt_j.iter().enumerate().take(DIM) {
            for (j, value) in row.iter().enumerate().take(DIM) {
                self.hessian[(i, j)] += value;
            }
        }

        self.squared_residual_sum += residual * residual;
        self.count += 1;
    }

    /// Solve the current gauss newton system.
    ///
    /// # Returns
    ///
    /// The update vector.
    pub fn solve(&self) -> Option<SVector<f32, DIM>> {
        if self.count == 0 {
            return None;
        }
        let hessian: SMatrix<f64, DIM, DIM> = nalgebra::convert(self.hessian);
        let gradient: SVector<f64, DIM> = nalgebra::convert(self.gradient);

        Cholesky::<f64, Const<DIM>>::new(hessian)
            .map(|cholesky| nalgebra::convert(cholesky.solve(&gradient)))
    }

    /// Adds a new step scaled by a robust weight.
    /// Equivalent to calling `step` with residual and jacobian multiplied by `weight.sqrt()`.
    pub fn step_weighted(&mut self, residual: f32, jacobian: &[f32; DIM], weight: f32) {
        let scale = weight.sqrt();
        let mut scaled = [0.0; DIM];
        for (dst, src) in scaled.iter_mut().zip(jacobian.iter()) {
            *dst = src * scale;
        }
        self.step(residual * scale, &scaled);
    }

    /// Adds the values of another optimizer to this one.
    /// Use this to combine the state of sub optimizers.
    ///
    /// # Arguments
    ///
    /// * `other` - The other optimizer.
    pub fn add(&mut self, other: &Self) {
        self.hessian += other.hessian;
        self.gradient += other.gradient;
        self.squared_residual_sum += other.squared_residual_sum;
        self.count += other.count;
    }

    /// Number of accumulated steps.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the mean squared residual.
    pub fn mean_squared_residual(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.squared_residual_sum / self.count as f32
    }
}

#[cfg(test)]
mod tests {
    use nshare::ToNalgebra;

    #[test]
    fn test_gauss_newton() {
        use super::*;
        use ndarray::array;

        let mut gn = GaussNewton::<6>::new();

        gn.step(1.0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        gn.step(2.0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        gn.step(3.0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let hessian = gn.hessian;
        let gradient = gn.gradient;

        let expected_hessian = array![
            [3.0, 6.0, 9.0, 12.0, 15.0, 18.0],
            [6.0, 12.0, 18.0, 24.0, 30.0, 36.0],
            [9.0, 18.0, 27.0, 36.0, 45.0, 54.0],
            [12.0, 24.0, 36.0, 48.0, 60.0, 72.0],
            [15.0, 30.0, 45.0, 60.0, 75.0, 90.0],
            [18.0, 36.0, 54.0, 72.0, 90.0, 108.0],
        ]
        .into_nalgebra();
        assert_eq!(hessian, expected_hessian);

        let expected_gradient = array![6.0, 12.0, 18.0, 24.0, 30.0, 36.0].into_nalgebra();
        assert_eq!(gradient, expected_gradient);
    }

    #[test]
    fn test_weighted_step_scales_system() {
        use super::*;

        let mut plain = GaussNewton::<2>::new();
        plain.step(2.0, &[1.0, 3.0]);

        let mut weighted = GaussNewton::<2>::new();
        weighted.step_weighted(2.0, &[1.0, 3.0], 0.25);

        assert!((weighted.hessian[(1, 1)] - plain.hessian[(1, 1)] * 0.25).abs() < 1e-6);
        assert!((weighted.gradient[0] - plain.gradient[0] * 0.25).abs() < 1e-6);
        assert_eq!(weighted.count(), 1);
    }

    #[test]
    fn test_solve_needs_steps() {
        use super::*;
        assert!(GaussNewton::<6>::new().solve().is_none());
    }
}
