use itertools::izip;
use log::debug;

use super::{IcpResult, ImageIcp, MsIcpParams};
use crate::{error::Result, range_image::RangeImage, transform::Transform};

/// Coarse to fine alignment of two range image pyramids.
/// Pyramids are ordered finest level first, like [`RangeImage::pyramid`] builds them.
pub struct MultiscaleAlign<'pyramid_lt> {
    target_pyramid: &'pyramid_lt [RangeImage],
    params: MsIcpParams,
}

impl<'pyramid_lt> MultiscaleAlign<'pyramid_lt> {
    pub fn new(target_pyramid: &'pyramid_lt [RangeImage], params: MsIcpParams) -> Self {
        Self {
            target_pyramid,
            params,
        }
    }

    /// Aligns the source pyramid, starting from the coarsest level.
    /// Convergence is the one of the finest level.
    pub fn align(&self, source_pyramid: &[RangeImage], initial_transform: &Transform) -> Result<IcpResult> {
        let mut result = IcpResult {
            transform: *initial_transform,
            converged: false,
            iterations: 0,
            correspondences: 0,
            residual: 0.0,
        };

        for (level, target, source) in izip!(
            0..self.params.level_iterations.len(),
            self.target_pyramid.iter(),
            source_pyramid.iter()
        )
        .rev()
        {
            let mut icp = ImageIcp::new(self.params.level(level), target);
            icp.initial_transform = result.transform;
            result = icp.align(source)?;
            debug!(
                "level {}: {} iterations, {} correspondences, residual {:.6}",
                level, result.iterations, result.correspondences, result.residual
            );
        }

        Ok(result)
    }
}
