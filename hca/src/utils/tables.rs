//! Quantization, reconstruction and psychoacoustic lookup tables.
//!
//! The closed-form tables are built once on first use. The variable-length
//! coefficient code tables for resolutions 1 through 7 are literal; the
//! writer's inverse tables are derived from them.

use std::sync::LazyLock;

/// Spectral bands per subframe.
pub const BAND_COUNT: usize = 128;

/// Ratio between consecutive scale factor steps, `2^(53/128)`.
fn scale_step() -> f64 {
    2f64.powf(53.0 / 128.0)
}

/// Dequantizer scale per scale factor, `sqrt(128) * step^(x - 63)`.
pub static DEQUANTIZER_SCALE: LazyLock<[f32; 64]> = LazyLock::new(|| {
    let step = scale_step();
    std::array::from_fn(|x| (128f64.sqrt() * step.powi(x as i32 - 63)) as f32)
});

/// Quantizer step per resolution. Resolution 0 carries no data.
pub static QUANTIZER_STEP: LazyLock<[f32; 16]> = LazyLock::new(|| {
    std::array::from_fn(|x| match x {
        0 => 0.0,
        1..8 => (2.0 / (2 * x + 1) as f64) as f32,
        _ => (2.0 / ((1u32 << (x - 3)) - 1) as f64) as f32,
    })
});

/// HFR gain by `hfr_scale - source_scale_factor + 64`.
pub static SCALE_CONVERSION: LazyLock<[f32; 128]> = LazyLock::new(|| {
    let step = scale_step();
    std::array::from_fn(|x| {
        if x > 1 && x < 127 {
            step.powi(x as i32 - 64) as f32
        } else {
            0.0
        }
    })
});

/// Primary channel gain per intensity code.
pub static INTENSITY_RATIO: LazyLock<[f32; 16]> = LazyLock::new(|| {
    std::array::from_fn(|x| {
        if x <= 14 {
            ((14 - x) as f64 / 7.0) as f32
        } else {
            0.0
        }
    })
});

/// Resolution by clamped curve position `noise - 5 * scale_factor / 2 + 2`.
#[rustfmt::skip]
pub const RESOLUTION_CURVE: [u8; 59] = [
    15, 14, 14, 14, 14, 14, 14, 13, 13, 13, 13, 13, 13, 12, 12, 12,
    12, 12, 12, 11, 11, 11, 11, 11, 11, 10, 10, 10, 10, 10, 10, 10,
     9,  9,  9,  9,  9,  9,  8,  8,  8,  8,  8,  8,  7,  6,  6,  5,
     4,  4,  4,  3,  3,  3,  2,  2,  2,  2,  1,
];

/// Code width per resolution. Resolutions 8 and up are sign-magnitude.
pub const MAX_BITS: [u32; 16] = [0, 2, 3, 3, 4, 4, 4, 4, 5, 6, 7, 8, 9, 10, 11, 12];

/// Bits consumed for each peeked code of resolutions 0 through 7.
#[rustfmt::skip]
pub const READ_BITS: [[u8; 16]; 8] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4],
    [3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4],
    [3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4],
    [3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4],
];

/// Decoded value for each peeked code of resolutions 0 through 7.
#[rustfmt::skip]
pub const READ_VALUES: [[i8; 16]; 8] = [
    [0, 0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0],
    [0, 0,  1, -1,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0],
    [0, 0,  1,  1, -1, -1,  2, -2,  0,  0,  0,  0,  0,  0,  0,  0],
    [0, 0,  1, -1,  2, -2,  3, -3,  0,  0,  0,  0,  0,  0,  0,  0],
    [0, 0,  1,  1, -1, -1,  2,  2, -2, -2,  3,  3, -3, -3,  4, -4],
    [0, 0,  1,  1, -1, -1,  2,  2, -2, -2,  3, -3,  4, -4,  5, -5],
    [0, 0,  1,  1, -1, -1,  2, -2,  3, -3,  4, -4,  5, -5,  6, -6],
    [0, 0,  1, -1,  2, -2,  3, -3,  4, -4,  5, -5,  6, -6,  7, -7],
];

/// Code and bit count for writing value `v` at a resolution below 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeEntry {
    pub code: u32,
    pub bits: u32,
}

/// Inverse of [`READ_VALUES`], indexed by resolution and `value + 7`.
pub static WRITE_CODES: LazyLock<[[CodeEntry; 15]; 8]> = LazyLock::new(|| {
    let mut table = [[CodeEntry::default(); 15]; 8];
    for resolution in 1..8 {
        let max_bits = MAX_BITS[resolution];
        for index in (0..1usize << max_bits).rev() {
            let bits = READ_BITS[resolution][index] as u32;
            let value = READ_VALUES[resolution][index] as i32;
            table[resolution][(value + 7) as usize] = CodeEntry {
                code: (index >> (max_bits - bits)) as u32,
                bits,
            };
        }
    }
    table
});

/// Largest quantized magnitude representable at `resolution`.
pub const fn max_quantized(resolution: usize) -> i32 {
    if resolution < 8 {
        resolution as i32
    } else {
        (1 << (MAX_BITS[resolution] - 1)) - 1
    }
}

/// Bits spent on one coefficient with quantized value `value`.
#[inline(always)]
pub fn coefficient_bits(resolution: usize, value: i32) -> u32 {
    match resolution {
        0 => 0,
        1..8 => WRITE_CODES[resolution][(value + 7) as usize].bits,
        _ => MAX_BITS[resolution] - u32::from(value == 0),
    }
}

/// Entries in the base threshold-of-hearing curve.
pub const ATH_BASE_LEN: usize = 656;

/// Base absolute threshold of hearing, one entry per 32 Hz step.
#[rustfmt::skip]
pub const ATH_BASE_CURVE: [u8; ATH_BASE_LEN] = [
    0x78, 0x5F, 0x56, 0x51, 0x4E, 0x4C, 0x4B, 0x49, 0x48, 0x48, 0x47, 0x46, 0x46, 0x45, 0x45, 0x45,
    0x44, 0x44, 0x44, 0x44, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42,
    0x42, 0x42, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x40, 0x40, 0x40, 0x40,
    0x40, 0x40, 0x40, 0x40, 0x40, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F,
    0x3F, 0x3F, 0x3F, 0x3E, 0x3E, 0x3E, 0x3E, 0x3E, 0x3E, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D,
    0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B,
    0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B,
    0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3B, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C, 0x3C,
    0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3D, 0x3E, 0x3E, 0x3E, 0x3E, 0x3E, 0x3E, 0x3E, 0x3F,
    0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F,
    0x3F, 0x3F, 0x3F, 0x3F, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40,
    0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42,
    0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x43, 0x43,
    0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x43, 0x44,
    0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x45, 0x45, 0x45,
    0x45, 0x45, 0x45, 0x45, 0x45, 0x45, 0x45, 0x45, 0x45, 0x46, 0x46, 0x46, 0x46, 0x46, 0x46, 0x46,
    0x46, 0x46, 0x46, 0x47, 0x47, 0x47, 0x47, 0x47, 0x47, 0x47, 0x47, 0x47, 0x47, 0x48, 0x48, 0x48,
    0x48, 0x48, 0x48, 0x48, 0x48, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x4A, 0x4A, 0x4A,
    0x4A, 0x4A, 0x4A, 0x4A, 0x4A, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4B, 0x4C, 0x4C, 0x4C, 0x4C,
    0x4C, 0x4C, 0x4D, 0x4D, 0x4D, 0x4D, 0x4D, 0x4D, 0x4E, 0x4E, 0x4E, 0x4E, 0x4E, 0x4E, 0x4F, 0x4F,
    0x4F, 0x4F, 0x4F, 0x4F, 0x50, 0x50, 0x50, 0x50, 0x50, 0x51, 0x51, 0x51, 0x51, 0x51, 0x52, 0x52,
    0x52, 0x52, 0x52, 0x53, 0x53, 0x53, 0x53, 0x54, 0x54, 0x54, 0x54, 0x54, 0x55, 0x55, 0x55, 0x55,
    0x56, 0x56, 0x56, 0x56, 0x57, 0x57, 0x57, 0x57, 0x57, 0x58, 0x58, 0x58, 0x59, 0x59, 0x59, 0x59,
    0x5A, 0x5A, 0x5A, 0x5A, 0x5B, 0x5B, 0x5B, 0x5B, 0x5C, 0x5C, 0x5C, 0x5D, 0x5D, 0x5D, 0x5D, 0x5E,
    0x5E, 0x5E, 0x5F, 0x5F, 0x5F, 0x60, 0x60, 0x60, 0x61, 0x61, 0x61, 0x61, 0x62, 0x62, 0x62, 0x63,
    0x63, 0x63, 0x64, 0x64, 0x64, 0x65, 0x65, 0x66, 0x66, 0x66, 0x67, 0x67, 0x67, 0x68, 0x68, 0x68,
    0x69, 0x69, 0x6A, 0x6A, 0x6A, 0x6B, 0x6B, 0x6B, 0x6C, 0x6C, 0x6D, 0x6D, 0x6D, 0x6E, 0x6E, 0x6F,
    0x6F, 0x70, 0x70, 0x70, 0x71, 0x71, 0x72, 0x72, 0x73, 0x73, 0x73, 0x74, 0x74, 0x75, 0x75, 0x76,
    0x76, 0x77, 0x77, 0x78, 0x78, 0x78, 0x79, 0x79, 0x7A, 0x7A, 0x7B, 0x7B, 0x7C, 0x7C, 0x7D, 0x7D,
    0x7E, 0x7E, 0x7F, 0x7F, 0x80, 0x80, 0x81, 0x81, 0x82, 0x83, 0x83, 0x84, 0x84, 0x85, 0x85, 0x86,
    0x86, 0x87, 0x88, 0x88, 0x89, 0x89, 0x8A, 0x8A, 0x8B, 0x8C, 0x8C, 0x8D, 0x8D, 0x8E, 0x8F, 0x8F,
    0x90, 0x90, 0x91, 0x92, 0x92, 0x93, 0x94, 0x94, 0x95, 0x95, 0x96, 0x97, 0x97, 0x98, 0x99, 0x99,
    0x9A, 0x9B, 0x9B, 0x9C, 0x9D, 0x9D, 0x9E, 0x9F, 0xA0, 0xA0, 0xA1, 0xA2, 0xA2, 0xA3, 0xA4, 0xA5,
    0xA5, 0xA6, 0xA7, 0xA7, 0xA8, 0xA9, 0xAA, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAE, 0xAF, 0xB0, 0xB1,
    0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE,
    0xBF, 0xC0, 0xC1, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xC9, 0xCA, 0xCB, 0xCC,
    0xCD, 0xCE, 0xCF, 0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC,
    0xDD, 0xDE, 0xDF, 0xE0, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xEB, 0xED,
    0xEE, 0xEF, 0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFF,
];

/// Scales the base curve to the bands of a stream at `sample_rate`.
pub fn scale_ath_curve(sample_rate: u32) -> [u8; BAND_COUNT] {
    let mut curve = [0u8; BAND_COUNT];
    let mut acc = 0u64;
    for value in curve.iter_mut() {
        acc += sample_rate as u64;
        let index = (acc >> 13) as usize;
        if index >= ATH_BASE_LEN - 2 {
            *value = 0xFF;
            continue;
        }
        *value = ATH_BASE_CURVE[index];
    }
    curve
}
