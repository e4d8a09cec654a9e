//! Modified discrete cosine transform with persistent overlap state.
//!
//! The DCT-IV core is a decimation butterfly over per-stage twiddle tables
//! followed by a bit-reversal shuffle. Twiddle, shuffle and window tables are
//! shared process-wide per transform size; each [`Mdct`] keeps its own overlap
//! buffers, so an instance must stay bound to a single channel.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

/// Tables shared by every transform of one size.
#[derive(Debug)]
pub struct DctTables {
    bits: u32,
    /// `sin[k][i] = sin(pi * (4i + 1) / (4 * 2^k))`, one row per stage size.
    sin: Vec<Vec<f32>>,
    cos: Vec<Vec<f32>>,
    shuffle: Vec<usize>,
    window: Vec<f32>,
}

impl DctTables {
    fn generate(bits: u32) -> Self {
        let size = 1usize << bits;

        let (sin, cos) = (0..=bits)
            .map(|k| {
                let n = 1usize << k;
                (0..n)
                    .map(|i| {
                        let angle = PI * (4 * i + 1) as f64 / (4 * n) as f64;
                        (angle.sin() as f32, angle.cos() as f32)
                    })
                    .unzip::<_, _, Vec<f32>, Vec<f32>>()
            })
            .unzip();

        let shuffle = (0..size)
            .map(|i| bit_reverse(i ^ (i >> 1), bits))
            .collect();

        let window = (0..size)
            .map(|i| {
                let inner = (PI * (i as f64 + 0.5) / (2 * size) as f64).sin();
                (PI / 2.0 * inner * inner).sin() as f32
            })
            .collect();

        Self {
            bits,
            sin,
            cos,
            shuffle,
            window,
        }
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }
}

fn bit_reverse(value: usize, bits: u32) -> usize {
    if bits == 0 {
        return 0;
    }
    value.reverse_bits() >> (usize::BITS - bits)
}

static TABLE_CACHE: Mutex<Vec<Option<Arc<DctTables>>>> = Mutex::new(Vec::new());

/// Returns the shared tables for `2^bits` points, generating them on first use.
pub fn dct_tables(bits: u32) -> Arc<DctTables> {
    let mut cache = TABLE_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    let index = bits as usize;
    if cache.len() <= index {
        cache.resize(index + 1, None);
    }

    cache[index]
        .get_or_insert_with(|| Arc::new(DctTables::generate(bits)))
        .clone()
}

/// Type-IV DCT of `input` into `output`, using `work` as scratch.
pub fn dct4(tables: &DctTables, input: &[f32], output: &mut [f32], work: &mut [f32], scale: f32) {
    let bits = tables.bits;
    let size = 1usize << bits;
    let half = size >> 1;
    let last = size - 1;

    let sin = &tables.sin[bits as usize];
    let cos = &tables.cos[bits as usize];
    for i in 0..half {
        let a = input[2 * i];
        let b = input[last - 2 * i];
        work[2 * i] = a * cos[i] + b * sin[i];
        work[2 * i + 1] = a * sin[i] - b * cos[i];
    }

    let stage_count = bits.saturating_sub(1);
    for stage in 0..stage_count {
        let block_count = 1usize << stage;
        let block_size_bits = stage_count - stage;
        let block_half_bits = block_size_bits - 1;
        let block_size = 1usize << block_size_bits;
        let block_half = 1usize << block_half_bits;
        let sin = &tables.sin[block_half_bits as usize];
        let cos = &tables.cos[block_half_bits as usize];

        for block in 0..block_count {
            for i in 0..block_half {
                let front = (block * block_size + i) * 2;
                let back = front + block_size;
                let a = work[front] - work[back];
                let b = work[front + 1] - work[back + 1];
                work[front] += work[back];
                work[front + 1] += work[back + 1];
                work[back] = a * cos[i] + b * sin[i];
                work[back + 1] = a * sin[i] - b * cos[i];
            }
        }
    }

    for (out, &index) in output.iter_mut().zip(tables.shuffle.iter()) {
        *out = work[index] * scale;
    }
}

/// Windowed MDCT/IMDCT pair with overlap carried between calls.
#[derive(Debug, Clone)]
pub struct Mdct {
    size: usize,
    scale: f32,
    tables: Arc<DctTables>,
    mdct_previous: Vec<f32>,
    imdct_previous: Vec<f32>,
    dct_buffer: Vec<f32>,
    work: Vec<f32>,
}

impl Mdct {
    /// Creates a transform over `2^bits` samples with output gain `scale`.
    pub fn new(bits: u32, scale: f32) -> Self {
        let size = 1usize << bits;

        Self {
            size,
            scale,
            tables: dct_tables(bits),
            mdct_previous: vec![0.0; size],
            imdct_previous: vec![0.0; size],
            dct_buffer: vec![0.0; size],
            work: vec![0.0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform of one block of time samples into `output` coefficients.
    pub fn mdct(&mut self, input: &[f32], output: &mut [f32]) {
        let size = self.size;
        let half = size >> 1;
        let window = &self.tables.window;
        let previous = &self.mdct_previous;

        for i in 0..half {
            let a = window[half - i - 1] * -input[half + i];
            let b = window[half + i] * input[half - i - 1];
            let c = window[i] * previous[i];
            let d = window[size - i - 1] * previous[size - i - 1];
            self.dct_buffer[i] = a - b;
            self.dct_buffer[half + i] = c - d;
        }

        dct4(
            &self.tables,
            &self.dct_buffer,
            output,
            &mut self.work,
            self.scale,
        );
        self.mdct_previous.copy_from_slice(&input[..size]);
    }

    /// Inverse transform of one block of coefficients into `output` time samples.
    pub fn imdct(&mut self, input: &[f32], output: &mut [f32]) {
        let size = self.size;
        let half = size >> 1;

        dct4(
            &self.tables,
            input,
            &mut self.dct_buffer,
            &mut self.work,
            self.scale,
        );

        let window = &self.tables.window;
        let dct = &self.dct_buffer;
        let previous = &mut self.imdct_previous;
        for i in 0..half {
            output[i] = window[i] * dct[i + half] + previous[i];
            output[i + half] = window[i + half] * -dct[size - 1 - i] - previous[i + half];
            previous[i] = window[size - 1 - i] * -dct[half - i - 1];
            previous[i + half] = window[half - i - 1] * dct[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dct4(input: &[f32]) -> Vec<f64> {
        let n = input.len();
        (0..n)
            .map(|k| {
                input
                    .iter()
                    .enumerate()
                    .map(|(j, &x)| {
                        x as f64 * (PI / n as f64 * (j as f64 + 0.5) * (k as f64 + 0.5)).cos()
                    })
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_dct4_matches_definition() {
        for bits in [2u32, 3, 4, 7] {
            let size = 1usize << bits;
            let input: Vec<f32> = (0..size)
                .map(|i| ((i * 37 % 11) as f32 - 5.0) / 7.0)
                .collect();
            let mut output = vec![0.0; size];
            let mut work = vec![0.0; size];
            dct4(&dct_tables(bits), &input, &mut output, &mut work, 1.0);

            for (fast, slow) in output.iter().zip(naive_dct4(&input)) {
                assert!((*fast as f64 - slow).abs() < 1e-4, "bits {bits}");
            }
        }
    }

    #[test]
    fn test_tables_are_shared() {
        let a = dct_tables(7);
        let b = dct_tables(7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.shuffle.len(), 128);
        assert!((a.window()[0] - 5.9139e-5).abs() < 1e-8);
    }

    #[test]
    fn test_perfect_reconstruction_with_one_block_delay() {
        let scale = (2.0f32 / 128.0).sqrt();
        let mut forward = Mdct::new(7, scale);
        let mut inverse = Mdct::new(7, scale);

        let signal: Vec<f32> = (0..128 * 10).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let mut decoded = Vec::with_capacity(signal.len());
        let mut spectrum = [0.0f32; 128];
        let mut pcm = [0.0f32; 128];
        for block in signal.chunks_exact(128) {
            forward.mdct(block, &mut spectrum);
            inverse.imdct(&spectrum, &mut pcm);
            decoded.extend_from_slice(&pcm);
        }

        for i in 0..signal.len() - 256 {
            assert!((decoded[i + 128] - signal[i]).abs() < 1e-4, "sample {i}");
        }
    }
}
