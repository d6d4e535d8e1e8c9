//! Submaps and their life cycle.
mod params;
pub use params::SubmapParams;

mod types;
pub use types::{Submap, SubmapId, SubmapState};

mod constraint;
pub use constraint::PoseConstraint;

mod manager;
pub use manager::{MapUpdate, SubmapManager};
