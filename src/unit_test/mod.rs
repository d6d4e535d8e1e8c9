mod frames;
pub(crate) use frames::{plane_frame, small_intrinsics};

mod params;
pub(crate) use params::{small_dense_params, small_engine_params, small_hashed_params};

mod rooms;
pub(crate) use rooms::{room_pyramid, TestRoom};
