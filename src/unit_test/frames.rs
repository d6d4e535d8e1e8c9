use ndarray::Array2;
use rstest::fixture;

use crate::{camera::CameraIntrinsics, image::DepthFrame};

#[fixture]
pub fn small_intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_simple_intrinsic(8.0, 8.0, 3.5, 3.5)
}

/// 64x48 frame of a wall 1.5 meters in front of the camera.
#[fixture]
pub fn plane_frame() -> DepthFrame {
    DepthFrame::new(
        CameraIntrinsics::from_simple_intrinsic(50.0, 50.0, 31.5, 23.5).with_size(64, 48),
        Array2::from_elem((48, 64), 1.5),
    )
}
