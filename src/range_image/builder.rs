use crate::image::DepthFrame;

use super::RangeImage;

#[derive(Debug, Clone)]
/// Builder for multiple range images from depth frames.
pub struct RangeImageBuilder {
    with_normals: bool,
    pyramid_levels: usize,
    truncate_threshold: f32,
}

impl Default for RangeImageBuilder {
    /// Creates a new builder with default parameters.
    fn default() -> Self {
        Self {
            with_normals: true,
            pyramid_levels: 3,
            truncate_threshold: 0.0,
        }
    }
}

impl RangeImageBuilder {
    /// Computes the normals of the range image.
    /// See [`RangeImage::compute_normals`].
    pub fn with_normals(mut self, value: bool) -> Self {
        self.with_normals = value;
        self
    }

    /// Sets the number of pyramid levels to use, this corresponds to the output length of [`build`].
    /// See [`RangeImage::pyramid`].
    pub fn pyramid_levels(mut self, levels: usize) -> Self {
        self.pyramid_levels = levels;
        self
    }

    /// Depth values beyond this distance are discarded. Zero disables it.
    pub fn truncate_threshold(mut self, threshold: f32) -> Self {
        self.truncate_threshold = threshold;
        self
    }

    /// Builds the range images from the given depth frame.
    ///
    /// # Arguments
    ///
    /// * `frame` - The depth frame to build the range images from.
    ///
    /// # Returns
    ///
    /// A vector of range images, finest first. The length of the vector depends on the number of pyramid levels.
    pub fn build(&self, frame: &DepthFrame) -> Vec<RangeImage> {
        let mut first_image = if self.truncate_threshold > 0.0 {
            RangeImage::from_depth_frame(&frame.clone().truncate(self.truncate_threshold))
        } else {
            RangeImage::from_depth_frame(frame)
        };
        if self.with_normals {
            first_image.compute_normals();
        }
        first_image.pyramid(self.pyramid_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::plane_frame;
    use rstest::*;

    #[rstest]
    fn should_build_pyramid_with_normals(plane_frame: DepthFrame) {
        let pyramid = RangeImageBuilder::default().pyramid_levels(2).build(&plane_frame);
        assert_eq!(pyramid.len(), 2);
        assert!(pyramid.iter().all(|level| level.normals.is_some()));
    }

    #[rstest]
    fn should_truncate_far_points(plane_frame: DepthFrame) {
        let pyramid = RangeImageBuilder::default()
            .truncate_threshold(1.0)
            .build(&plane_frame);
        assert_eq!(pyramid[0].valid_points_count(), 0);
    }
}
