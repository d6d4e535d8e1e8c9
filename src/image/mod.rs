mod rgb;
pub use rgb::IntoImageRgb8;

mod depth_frame;
pub use depth_frame::DepthFrame;
