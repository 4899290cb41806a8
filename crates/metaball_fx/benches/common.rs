use std::time::Duration;

use criterion::{Criterion, Throughput};
use glam::Vec3;
use metaball_fx::field::DensitySource;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub const SAMPLE_SIZE: usize = 20;
pub const WARM_UP: Duration = Duration::from_secs(1);
pub const MEASUREMENT_TIME: Duration = Duration::from_secs(2);

pub fn default_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .sample_size(SAMPLE_SIZE)
        .warm_up_time(WARM_UP)
        .measurement_time(MEASUREMENT_TIME)
}

pub fn elements_throughput(elements: usize) -> Throughput {
    Throughput::Elements(elements.max(1) as u64)
}

fn unit(rng: &mut StdRng) -> f32 {
    (rng.next_u32() >> 8) as f32 / (1u32 << 24) as f32
}

/// `count` metaballs scattered inside a box of half-extent `half` around the origin.
#[allow(dead_code)]
pub fn scattered_sources(count: usize, half: f32, radius: f32, seed: u64) -> Vec<DensitySource> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let p = Vec3::new(unit(&mut rng), unit(&mut rng), unit(&mut rng)) * 2.0 - Vec3::ONE;
            DensitySource::new(p * half, radius)
        })
        .collect()
}
