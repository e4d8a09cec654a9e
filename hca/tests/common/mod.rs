#![allow(dead_code)]

/// 56-bit key code shared by the keyed stream tests.
pub const EXAMPLE_KEY_CODE: u64 = 0xCF222F1FE0748978;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 12000-amplitude sine at `frequency` Hz.
pub fn sine(frequency: f64, sample_rate: u32, len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * frequency * i as f64 / sample_rate as f64;
            (12000.0 * phase.sin()).round() as i16
        })
        .collect()
}

/// Uniform noise in -8000..=8000 from a fixed-seed LCG.
pub fn noise(seed: u32, len: usize) -> Vec<i16> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            ((state >> 16) % 16001) as i16 - 8000
        })
        .collect()
}

pub fn rms_error(a: &[i16], b: &[i16]) -> f64 {
    assert_eq!(a.len(), b.len());
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    (sum / a.len().max(1) as f64).sqrt()
}

pub fn rms(samples: &[i16]) -> f64 {
    let sum: f64 = samples.iter().map(|&x| x as f64 * x as f64).sum();
    (sum / samples.len().max(1) as f64).sqrt()
}
