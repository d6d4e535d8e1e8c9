//! Large scale volumetric reconstruction from depth streams.
//!
//! The map is made of submaps, each one a TSDF volume with its own pose. Frames are tracked
//! with projective ICP against the surface raycast from the current submap, fused into the
//! active submaps and the submap poses are kept consistent by a pose graph.
pub mod camera;
pub mod error;
pub mod icp;
pub mod image;
pub mod metrics;
mod optim;
pub mod pointcloud;
pub mod pose_graph;
pub mod range_image;
pub mod render;
pub mod submap;
pub mod synthetic;
pub mod tracker;
pub mod trajectory;
pub mod transform;
mod trig;
pub mod volume;

mod params;
pub use params::Params;

mod engine;
pub use engine::{FrameStatus, ReconstructionEngine};

#[cfg(test)]
mod unit_test;
