use criterion::{criterion_group, criterion_main, Criterion};
use pprof::criterion::{Output, PProfProfiler};
use submapfusion::{
    camera::CameraIntrinsics,
    synthetic::SyntheticScene,
    transform::Transform,
    volume::{TsdfVolume, VolumeKind, VolumeParams, VoxelVolume},
};

const WIDTH: usize = 320;
const HEIGHT: usize = 240;

fn volume_params(kind: VolumeKind) -> VolumeParams {
    VolumeParams {
        resolution: [256; 3],
        volume_size: 5.12,
        origin: [-2.56, -2.56, 0.0],
        voxel_size: 0.02,
        truncation_distance: 0.1,
        depth_trunc_threshold: 4.0,
        ..VolumeParams::default_params(kind)
    }
}

fn integrate_benchmark(c: &mut Criterion) {
    let intrinsics = CameraIntrinsics::from_simple_intrinsic(260.0, 260.0, 159.5, 119.5);
    let frame = SyntheticScene::room().render_depth(&intrinsics, WIDTH, HEIGHT, &Transform::eye(), 0);

    for (name, kind) in [("dense", VolumeKind::Tsdf), ("hashed", VolumeKind::HashTsdf)] {
        let mut volume = VoxelVolume::new(volume_params(kind)).unwrap();
        c.bench_function(&format!("integrate {name}"), |b| {
            b.iter(|| {
                volume.integrate(&frame, &Transform::eye()).unwrap();
            });
        });

        c.bench_function(&format!("raycast {name}"), |b| {
            b.iter(|| volume.raycast(&Transform::eye(), &intrinsics, WIDTH, HEIGHT));
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = integrate_benchmark
}

criterion_main!(benches);
