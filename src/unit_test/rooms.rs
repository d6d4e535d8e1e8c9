use rstest::fixture;

use crate::{
    camera::CameraIntrinsics, range_image::RangeImage, range_image::RangeImageBuilder,
    synthetic::SyntheticScene, transform::Transform,
};

pub struct TestRoom {
    pub scene: SyntheticScene,
    pub intrinsics: CameraIntrinsics,
    pub width: usize,
    pub height: usize,
    pub levels: usize,
}

impl TestRoom {
    /// Range image pyramid, with normals, seen from `camera_to_world`.
    pub fn render(&self, camera_to_world: &Transform) -> Vec<RangeImage> {
        let frame = self.scene.render_depth(
            &self.intrinsics,
            self.width,
            self.height,
            camera_to_world,
            0,
        );
        RangeImageBuilder::default()
            .pyramid_levels(self.levels)
            .build(&frame)
    }
}

#[fixture]
pub fn room_pyramid() -> TestRoom {
    TestRoom {
        scene: SyntheticScene::room(),
        intrinsics: CameraIntrinsics::from_simple_intrinsic(130.0, 130.0, 79.5, 59.5),
        width: 160,
        height: 120,
        levels: 3,
    }
}
