//! Criterion benchmarks for frame averaging.
//!
//! Every setpoint of a sweep averages a burst of frames, so this path bounds how
//! fast a sweep can run once the field has settled.
//!
//! Run with: cargo bench --bench frame_averaging

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use magsweep::acquisition::{FrameAverager, ImagingPreset};
use magsweep::hardware::mock::{FramePattern, SimulatedCamera};

/// Average 15 frames for each imaging preset.
fn averaging_by_preset(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("frame_averaging");
    let frames = 15;

    for preset in [ImagingPreset::Grid, ImagingPreset::Single, ImagingPreset::Data] {
        let framing = preset.framing();
        let window = framing.camera_roi;
        let camera = SimulatedCamera::new(
            window.width(),
            window.height(),
            FramePattern::Noisy {
                level: 1000,
                noise: 50,
            },
        );
        let averager = FrameAverager::new(&camera);
        let pixels = u64::from(window.width()) * u64::from(window.height());

        group.throughput(Throughput::Elements(pixels * frames as u64));
        group.bench_with_input(
            BenchmarkId::new("capture", format!("{:?}", preset)),
            &framing.crop_roi,
            |b, roi| {
                b.iter(|| {
                    let image = rt.block_on(averager.capture(roi, frames)).unwrap();
                    black_box(image.snr_db())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, averaging_by_preset);
criterion_main!(benches);
