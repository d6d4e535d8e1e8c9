use thiserror::Error as ThisError;

/// Main error type for the library.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Used when the user pass a logical invalid parameter to a function.
    #[error("Parameter error: {0}")]
    InvalidParameter(String),
    /// Configuration rejected at construction time.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Frame does not match what the engine was configured for.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    /// Alignment failed: too few correspondences or a degenerate system.
    #[error("Tracking lost: {0}")]
    TrackingLost(String),
    /// A hashed volume would need more units than its budget allows.
    #[error("Resource exhausted: {required} units required, budget is {budget}")]
    ResourceExhausted { required: usize, budget: usize },
    #[error("Pose graph optimization did not converge after {iterations} iterations: {reason}")]
    OptimizationDidNotConverge { iterations: usize, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parser error: {0}")]
    Parser(#[from] serde_json::Error),
}

impl Error {
    /// Create a error with the kind `InvalidParameter`.
    /// # Arguments
    /// * `msg` - The error message.
    pub fn invalid_parameter<T: ToString>(msg: T) -> Self {
        Error::InvalidParameter(msg.to_string())
    }

    /// Create a error with the kind `InvalidConfiguration`.
    pub fn invalid_configuration<T: ToString>(msg: T) -> Self {
        Error::InvalidConfiguration(msg.to_string())
    }

    pub fn tracking_lost<T: ToString>(msg: T) -> Self {
        Error::TrackingLost(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
