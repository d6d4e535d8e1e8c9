use nalgebra::Vector3;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    optim::{GaussNewton, HuberEstimator, RobustEstimator},
    range_image::RangeImage,
    transform::Transform,
    trig,
};

use super::{cost_function::PointPlaneDistance, icp_params::IcpParams};

/// Outcome of an alignment.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Transform from the source camera frame to the target camera frame.
    pub transform: Transform,
    /// Whether the update fell below the tolerance before the iteration cap.
    pub converged: bool,
    /// Iterations performed.
    pub iterations: usize,
    /// Correspondences used by the last iteration.
    pub correspondences: usize,
    /// Mean squared point to plane residual of the last iteration.
    pub residual: f32,
}

/// Projective point to plane ICP between two range images. Correspondences are found by
/// projecting the source points into the target image instead of searching neighbors.
pub struct ImageIcp<'target_lt> {
    /// Parameters of the ICP algorithm.
    pub params: IcpParams,
    /// Initial transformation to start the algorithm. Default is the identity.
    pub initial_transform: Transform,
    target: &'target_lt RangeImage,
}

impl<'target_lt> ImageIcp<'target_lt> {
    /// Create a new ICP instance.
    ///
    /// # Arguments
    ///
    /// * params - Parameters of the ICP algorithm.
    /// * target - Target range image, it must have normals.
    pub fn new(params: IcpParams, target: &'target_lt RangeImage) -> Self {
        Self {
            params,
            initial_transform: Transform::eye(),
            target,
        }
    }

    fn correspondence(
        &self,
        source_point: &Vector3<f32>,
        source_normal: &Vector3<f32>,
    ) -> Option<(Vector3<f32>, Vector3<f32>)> {
        if source_point[2] <= 0.0 {
            return None;
        }
        let (x, y) = self.target.camera.project(source_point);
        let (col, row) = (x.round(), y.round());
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);

        let target_point = self.target.get_point(row, col)?;
        let target_normal = self.target.get_normal(row, col)?;

        if (target_point - source_point).norm() > self.params.max_distance
            || trig::angle_between_normals(source_normal, &target_normal)
                > self.params.max_normal_angle
        {
            return None;
        }
        Some((target_point, target_normal))
    }

    /// Accumulates the normal equations of all source pixels under `transform`.
    fn linearize(&self, source: &RangeImage, transform: &Transform) -> GaussNewton<6> {
        let geom_cost = PointPlaneDistance {};
        let robust = HuberEstimator {
            delta: self.params.huber_delta,
        };

        (0..source.height())
            .into_par_iter()
            .fold(GaussNewton::<6>::new, |mut optimizer, row| {
                for col in 0..source.width() {
                    let (point, normal) =
                        match (source.get_point(row, col), source.get_normal(row, col)) {
                            (Some(point), Some(normal)) => (point, normal),
                            _ => continue,
                        };
                    let source_point = transform.transform_vector(&point);
                    let source_normal = transform.transform_normal(&normal);

                    if let Some((target_point, target_normal)) =
                        self.correspondence(&source_point, &source_normal)
                    {
                        let (residual, jacobian) =
                            geom_cost.jacobian(&source_point, &target_point, &target_normal);
                        optimizer.step_weighted(residual, &jacobian, robust.weight(residual));
                    }
                }
                optimizer
            })
            .reduce(GaussNewton::<6>::new, |mut lhs, rhs| {
                lhs.add(&rhs);
                lhs
            })
    }

    /// Aligns the source range image to the target.
    ///
    /// # Returns
    ///
    /// The transformation that aligns the source to the target. Fails with [`Error::TrackingLost`]
    /// when there are not enough correspondences or the system is degenerate.
    pub fn align(&self, source: &RangeImage) -> Result<IcpResult> {
        let mut optim_transform = self.initial_transform;
        let mut result = IcpResult {
            transform: optim_transform,
            converged: false,
            iterations: 0,
            correspondences: 0,
            residual: 0.0,
        };

        for iteration in 0..self.params.max_iterations {
            let optimizer = self.linearize(source, &optim_transform);
            if optimizer.count() < self.params.min_correspondences {
                return Err(Error::tracking_lost(format!(
                    "{} correspondences, at least {} are required",
                    optimizer.count(),
                    self.params.min_correspondences
                )));
            }

            let update = optimizer
                .solve()
                .ok_or_else(|| Error::tracking_lost("degenerate point to plane system"))?;
            if update.iter().any(|v| !v.is_finite()) {
                return Err(Error::tracking_lost("non finite pose update"));
            }
            optim_transform = &Transform::from_se3_exp(&update) * &optim_transform;

            result = IcpResult {
                transform: optim_transform,
                converged: update.norm() < self.params.tolerance,
                iterations: iteration + 1,
                correspondences: optimizer.count(),
                residual: optimizer.mean_squared_residual(),
            };
            if result.converged {
                break;
            }
        }

        Ok(result)
    }
}
