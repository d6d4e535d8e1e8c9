mod icp_params;
pub use icp_params::{IcpParams, MsIcpParams};
mod cost_function;
mod image_icp;
pub use image_icp::{IcpResult, ImageIcp};
mod multiscale;
pub use multiscale::MultiscaleAlign;
