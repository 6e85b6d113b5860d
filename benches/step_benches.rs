use criterion::{Criterion, criterion_group, criterion_main};
use glam::{Vec2, Vec4};
use jetfluid::{CpuBackend, FluidConfig, FluidSimulation, Jet, Resolution};

fn bench_step(c: &mut Criterion) {
    let mut sim = FluidSimulation::new(CpuBackend::new());
    sim.initialize(FluidConfig::new(Resolution::new(256, 256), 8, 0.999))
        .unwrap();

    let jets: Vec<_> = (0..8)
        .map(|i| {
            let t = i as f32 / 8.0;
            Jet::new(
                Vec2::new(32.0 + 192.0 * t, 128.0),
                Vec2::new(0.0, 1.0),
                Vec4::new(t, 1.0 - t, 0.5, 1.0),
                8.0,
            )
        })
        .collect();

    c.bench_function("cpu_step_256x256_8_jets", |b| {
        b.iter(|| sim.step_once(&jets).unwrap())
    });
    c.bench_function("cpu_step_256x256_no_jets", |b| {
        b.iter(|| sim.step_once(&[]).unwrap())
    });
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
