use ndarray::{Array2, Array3, ArrayView2};

use crate::{camera::CameraIntrinsics, error::Error};

/// One input frame: metric depth, optional color and the intrinsics of the sensor.
/// Frames are consumed by tracking and integration, never retained.
#[derive(Clone, Debug)]
pub struct DepthFrame {
    pub camera: CameraIntrinsics,
    /// Depth in meters, shape (height, width). Zero marks a missing measurement.
    pub depth: Array2<f32>,
    /// Optional color image, shape (height, width, 3).
    pub color: Option<Array3<u8>>,
    /// Timestamp or sequence index.
    pub timestamp: Option<f64>,
}

impl DepthFrame {
    pub fn new(camera: CameraIntrinsics, depth: Array2<f32>) -> Self {
        Self {
            camera,
            depth,
            color: None,
            timestamp: None,
        }
    }

    /// Creates a frame from raw sensor units.
    ///
    /// # Arguments
    ///
    /// * `camera` - Sensor intrinsics.
    /// * `depth` - Raw depth image.
    /// * `depth_factor` - Raw units per meter, for example 5000 for the TUM datasets.
    pub fn from_raw_depth(
        camera: CameraIntrinsics,
        depth: &ArrayView2<u16>,
        depth_factor: f32,
    ) -> Result<Self, Error> {
        if depth_factor <= 0.0 {
            return Err(Error::invalid_parameter(format!(
                "depth factor must be positive, got {depth_factor}"
            )));
        }
        Ok(Self::new(
            camera,
            depth.mapv(|raw| raw as f32 / depth_factor),
        ))
    }

    pub fn with_color(mut self, color: Array3<u8>) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Zeroes every depth beyond `threshold`. Non-positive thresholds keep the frame as is.
    pub fn truncate(mut self, threshold: f32) -> Self {
        if threshold > 0.0 {
            self.depth.mapv_inplace(|z| if z > threshold { 0.0 } else { z });
        }
        self
    }

    pub fn width(&self) -> usize {
        self.depth.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.depth.shape()[0]
    }

    /// Depth at a pixel, `None` when outside the image or missing.
    pub fn depth_at(&self, row: usize, col: usize) -> Option<f32> {
        match self.depth.get((row, col)) {
            Some(&z) if z > 0.0 && z.is_finite() => Some(z),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_simple_intrinsic(10.0, 10.0, 1.0, 1.0)
    }

    #[test]
    fn should_scale_raw_depth() {
        let raw = array![[5000u16, 0], [2500, 10000]];
        let frame = DepthFrame::from_raw_depth(intrinsics(), &raw.view(), 5000.0).unwrap();
        assert_eq!(frame.depth_at(0, 0), Some(1.0));
        assert_eq!(frame.depth_at(0, 1), None);
        assert_eq!(frame.depth_at(1, 0), Some(0.5));
        assert_eq!(frame.depth_at(5, 5), None);
    }

    #[test]
    fn should_reject_invalid_depth_factor() {
        let raw = array![[1u16]];
        assert!(DepthFrame::from_raw_depth(intrinsics(), &raw.view(), 0.0).is_err());
    }

    #[test]
    fn should_truncate_far_depth() {
        let frame = DepthFrame::new(intrinsics(), array![[1.0, 3.0], [4.5, 2.0]]).truncate(2.5);
        assert_eq!(frame.depth, array![[1.0, 0.0], [0.0, 2.0]]);
    }
}
