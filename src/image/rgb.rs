use image::RgbImage;
use ndarray::Array3;

/// Trait to convert objects into image::RgbImage
pub trait IntoImageRgb8 {
    fn into_image_rgb8(self) -> RgbImage;
}

impl IntoImageRgb8 for Array3<u8> {
    /// Arrays must have the shape [height, width, 3].
    fn into_image_rgb8(self) -> RgbImage {
        let (height, width, _) = self.dim();
        RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            image::Rgb([self[(y, x, 0)], self[(y, x, 1)], self[(y, x, 2)]])
        })
    }
}
