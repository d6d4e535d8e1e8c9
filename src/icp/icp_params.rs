/// Parameters of one level of projective ICP.
#[derive(Debug, Clone)]
pub struct IcpParams {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Correspondences farther than this distance (meters) are discarded.
    pub max_distance: f32,
    /// Correspondences whose normals differ by more than this angle (radians) are discarded.
    pub max_normal_angle: f32,
    /// Fewer correspondences than this fails the alignment.
    pub min_correspondences: usize,
    /// The alignment converges when the update norm is below this value.
    pub tolerance: f32,
    /// Residuals larger than this value (meters) are down-weighted.
    pub huber_delta: f32,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_distance: 0.1,
            max_normal_angle: 30.0_f32.to_radians(),
            min_correspondences: 64,
            tolerance: 1e-5,
            huber_delta: 0.02,
        }
    }
}

impl IcpParams {
    pub fn max_iterations(&'_ mut self, value: usize) -> &'_ mut IcpParams {
        self.max_iterations = value;
        self
    }

    pub fn max_distance(&'_ mut self, value: f32) -> &'_ mut IcpParams {
        self.max_distance = value;
        self
    }

    pub fn max_normal_angle(&'_ mut self, value: f32) -> &'_ mut IcpParams {
        self.max_normal_angle = value;
        self
    }
}

/// Parameters of coarse to fine ICP.
#[derive(Debug, Clone)]
pub struct MsIcpParams {
    /// Iterations per pyramid level, finest level first.
    pub level_iterations: Vec<usize>,
    /// Parameters shared by the levels. Its `max_iterations` is overridden per level.
    pub icp: IcpParams,
}

impl Default for MsIcpParams {
    fn default() -> Self {
        Self {
            level_iterations: vec![10, 5, 4],
            icp: IcpParams::default(),
        }
    }
}

impl MsIcpParams {
    /// Parameters of the pyramid level `level`, 0 being the finest.
    pub fn level(&self, level: usize) -> IcpParams {
        let mut params = self.icp.clone();
        params.max_iterations(self.level_iterations.get(level).copied().unwrap_or(0));
        params
    }
}
