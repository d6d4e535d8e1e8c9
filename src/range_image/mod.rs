mod range_image;
pub use range_image::RangeImage;

mod resize;

mod builder;
pub use builder::RangeImageBuilder;
