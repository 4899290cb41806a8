//! Small sampling helpers on top of [`RngCore`].
use rand::RngCore;

/// Uniform sample in `[0, 1)`.
#[inline]
pub(crate) fn rand01(rng: &mut dyn RngCore) -> f32 {
    // 24 high bits fit an f32 mantissa exactly, so the result never rounds up to 1.0.
    (rng.next_u32() >> 8) as f32 / (1u32 << 24) as f32
}

/// Uniform sample in `[min, max)`. Returns `min` when the range is empty.
#[inline]
pub(crate) fn rand_range(rng: &mut dyn RngCore, min: f32, max: f32) -> f32 {
    if max <= min {
        return min;
    }
    min + rand01(rng) * (max - min)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng {
        value: u32,
    }

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.value
        }

        fn next_u64(&mut self) -> u64 {
            self.value as u64
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            let bytes = self.value.to_le_bytes();
            for (i, b) in dest.iter_mut().enumerate() {
                *b = bytes[i % 4];
            }
        }
    }

    #[test]
    fn rand01_returns_zero_for_zero_input() {
        let mut rng = FixedRng { value: 0 };
        assert_eq!(rand01(&mut rng), 0.0);
    }

    #[test]
    fn rand01_stays_in_unit_interval() {
        for value in [0, 1, 1000, u32::MAX / 2, u32::MAX - 1, u32::MAX] {
            let mut rng = FixedRng { value };
            let result = rand01(&mut rng);
            assert!((0.0..1.0).contains(&result), "value {value} gave {result}");
        }
    }

    #[test]
    fn rand_range_maps_midpoint() {
        let mut rng = FixedRng {
            value: u32::MAX / 2,
        };
        let v = rand_range(&mut rng, 2.0, 4.0);
        assert!((v - 3.0).abs() < 1e-3);
    }

    #[test]
    fn rand_range_collapses_empty_range() {
        let mut rng = FixedRng { value: 12345 };
        assert_eq!(rand_range(&mut rng, 5.0, 5.0), 5.0);
        assert_eq!(rand_range(&mut rng, 5.0, 1.0), 5.0);
    }
}
