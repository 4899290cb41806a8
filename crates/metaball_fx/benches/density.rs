mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use metaball_fx::device::cpu::CpuDevice;
use metaball_fx::device::{DensityDevice, Kernel};
use metaball_fx::field::accumulate;
use metaball_fx::field::layout::{GpuCorner, GpuParticle, KernelParams};
use metaball_fx::grid::cube::build_cube_grid;
use metaball_fx::grid::frame::BoundingBox;

const PARTICLE_COUNTS: [usize; 4] = [8, 32, 128, 512];

fn density_accumulate_benches(c: &mut Criterion) {
    let bounds = BoundingBox::new(Vec3::ZERO, Vec3::splat(4.0));
    let mut grid = build_cube_grid(&bounds, 4).expect("valid bounds");
    let corners = grid.corner_count();

    let mut group = c.benchmark_group("density/accumulate");
    for &count in &PARTICLE_COUNTS {
        let sources = common::scattered_sources(count, 1.8, 0.6, 0xD3_u64 ^ count as u64);
        group.throughput(common::elements_throughput(corners * count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                accumulate(grid.corners_mut(), &sources);
                black_box(grid.corners().active_count());
            });
        });
    }
    group.finish();
}

fn density_cpu_device_benches(c: &mut Criterion) {
    let bounds = BoundingBox::new(Vec3::ZERO, Vec3::splat(4.0));
    let grid = build_cube_grid(&bounds, 4).expect("valid bounds");
    let corners: Vec<GpuCorner> = grid.corners().iter().map(GpuCorner::from).collect();
    let mut readback = vec![GpuCorner::default(); corners.len()];

    let mut group = c.benchmark_group("density/cpu_device");
    for &count in &PARTICLE_COUNTS {
        let particles: Vec<GpuParticle> =
            common::scattered_sources(count, 1.8, 0.6, 0xC9_u64 ^ count as u64)
                .into_iter()
                .map(GpuParticle::from)
                .collect();
        let params = KernelParams::new(grid.dims(), corners.len(), particles.len());
        let mut device = CpuDevice::new();
        group.throughput(common::elements_throughput(corners.len() * count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                device.write_corners(&corners).expect("write corners");
                device.write_particles(&particles).expect("write particles");
                device
                    .dispatch(&[Kernel::Densities], &params)
                    .expect("dispatch");
                device.read_corners(&mut readback).expect("read corners");
                black_box(readback[0].intensity);
            });
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = density_accumulate_benches, density_cpu_device_benches
}
criterion_main!(benches);
