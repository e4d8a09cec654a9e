//! Stream parameter derivation for the encoder.
//!
//! Everything here runs once per stream: the bitrate follows from a quality
//! tier (or an explicit override), the frame size from the bitrate, and the
//! split of the bands into base, stereo and HFR bands from the cutoff
//! frequency and the bits each channel gets per frame.

use std::fmt;

use anyhow::{Result, bail};
use log::debug;

use crate::process::{MAX_HFR_GROUPS, SAMPLES_PER_FRAME};
use crate::structs::frame::FRAME_OVERHEAD_BITS;
use crate::utils::errors::EncodeError;
use crate::utils::tables::BAND_COUNT;

/// Encoder quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    Highest,
    #[default]
    High,
    Middle,
    Low,
    Lowest,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Highest => write!(f, "Highest"),
            Quality::High => write!(f, "High"),
            Quality::Middle => write!(f, "Middle"),
            Quality::Low => write!(f, "Low"),
            Quality::Lowest => write!(f, "Lowest"),
        }
    }
}

impl Quality {
    /// Ratio of 16-bit PCM size to compressed size.
    pub fn compression_ratio(&self, channel_count: usize) -> u32 {
        let mono = channel_count == 1;
        match self {
            Quality::Highest => 4,
            Quality::High => 6,
            Quality::Middle => 8,
            Quality::Low if mono => 10,
            Quality::Low => 12,
            Quality::Lowest if mono => 12,
            Quality::Lowest => 16,
        }
    }
}

/// Worst-case bits a coded band costs per channel per frame.
const BAND_BIT_ESTIMATE: i64 = 22;

/// Highest frequency worth coding, in Hz.
const MAX_CUTOFF_FREQUENCY: u64 = 20000;

/// Band split derived from the bitrate and frame budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    pub total_band_count: usize,
    pub base_band_count: usize,
    pub stereo_band_count: usize,
    pub bands_per_hfr_group: usize,
}

impl BandLayout {
    pub fn hfr_band_count(&self) -> usize {
        self.total_band_count - self.base_band_count - self.stereo_band_count
    }
}

fn pcm_bitrate(channel_count: usize, sample_rate: u32) -> u64 {
    sample_rate as u64 * channel_count as u64 * 16
}

/// Band index holding `frequency` Hz, rounded to the nearest band edge.
fn band_for_frequency(frequency: u64, sample_rate: u32) -> usize {
    let rate = sample_rate.max(1) as u64;
    ((frequency * 2 * BAND_COUNT as u64 + rate / 2) / rate) as usize
}

/// Bitrate in bits per second.
///
/// An explicit `bitrate` replaces the quality tier. The result never exceeds a
/// quarter of the PCM rate, and with `limit_bitrate` it is raised to a floor
/// that keeps low tiers listenable.
pub fn derive_bitrate(
    quality: Quality,
    channel_count: usize,
    sample_rate: u32,
    bitrate: Option<u32>,
    limit_bitrate: bool,
) -> u32 {
    let pcm = pcm_bitrate(channel_count, sample_rate);
    let mut rate = bitrate.map_or_else(
        || pcm / quality.compression_ratio(channel_count) as u64,
        u64::from,
    );
    rate = rate.min(pcm / 4);

    if limit_bitrate {
        let floor = if channel_count == 1 {
            42666
        } else {
            32000 * channel_count as u64
        };
        rate = rate.max(floor.min(pcm / 6));
    }

    rate as u32
}

/// Frame size in bytes carrying `bitrate` at `sample_rate`.
pub fn frame_size_for_bitrate(bitrate: u32, sample_rate: u32) -> Result<usize> {
    let frame_size =
        (bitrate as u64 * SAMPLES_PER_FRAME as u64 / sample_rate.max(1) as u64 / 8) as usize;

    if !(8..=0xFFFF).contains(&frame_size) {
        bail!(EncodeError::InvalidBitrate {
            bitrate,
            frame_size,
        });
    }

    Ok(frame_size)
}

/// Splits the bands for a stream at `bitrate`.
///
/// The cutoff and the HFR start frequency scale with the compression ratio,
/// using the narrower pair of ratios for mono and lightly compressed streams.
/// The cutoff is also held below Nyquist and [`MAX_CUTOFF_FREQUENCY`]. The
/// coded bands are further limited to what the per-channel frame budget can
/// carry. Multichannel streams under the wider ratios code the upper half of
/// the coded bands as intensity stereo.
pub fn derive_band_layout(
    sample_rate: u32,
    bitrate: u32,
    frame_size: usize,
    channel_count: usize,
) -> BandLayout {
    let pcm = pcm_bitrate(channel_count, sample_rate);
    let bitrate = (bitrate as u64).clamp(1, pcm.max(1));
    let narrow = channel_count <= 1 || pcm / bitrate <= 6;
    let (hfr_ratio, cutoff_ratio) = if narrow { (6, 12) } else { (8, 16) };

    let nyquist = sample_rate as u64 / 2;
    let cutoff = (nyquist * cutoff_ratio * bitrate / pcm.max(1))
        .min(nyquist)
        .min(MAX_CUTOFF_FREQUENCY);
    let hfr_start = (nyquist * hfr_ratio * bitrate / pcm.max(1)).min(cutoff);

    let total = band_for_frequency(cutoff, sample_rate).clamp(1, BAND_COUNT);

    let frame_bits = (frame_size as i64) << 3;
    let per_channel =
        (frame_bits - FRAME_OVERHEAD_BITS as i64) / channel_count as i64 - 3 - 48;
    let budget = (per_channel / BAND_BIT_ESTIMATE).max(1) as usize;
    let coded = band_for_frequency(hfr_start, sample_rate)
        .min(budget)
        .clamp(1, total);

    let stereo = if !narrow && coded < BAND_COUNT {
        coded / 2
    } else {
        0
    };

    let layout = BandLayout {
        total_band_count: total,
        base_band_count: coded - stereo,
        stereo_band_count: stereo,
        bands_per_hfr_group: (total - coded).div_ceil(MAX_HFR_GROUPS),
    };

    debug!(
        "Band layout for {channel_count} channels at {sample_rate} Hz, {bitrate} bps: cutoff {cutoff} Hz, total {}, base {}, stereo {}, hfr {} in groups of {}",
        layout.total_band_count,
        layout.base_band_count,
        layout.stereo_band_count,
        layout.hfr_band_count(),
        layout.bands_per_hfr_group
    );

    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_bitrates() {
        assert_eq!(derive_bitrate(Quality::High, 1, 48000, None, false), 128000);
        assert_eq!(derive_bitrate(Quality::Highest, 2, 48000, None, false), 384000);
        assert_eq!(derive_bitrate(Quality::Lowest, 2, 48000, None, false), 96000);
        assert_eq!(derive_bitrate(Quality::Lowest, 1, 44100, None, false), 58800);
        assert_eq!(
            derive_bitrate(Quality::High, 2, 48000, Some(900_000), false),
            384000
        );
        assert_eq!(
            derive_bitrate(Quality::Lowest, 1, 8000, Some(1000), true),
            21333
        );
        assert_eq!(
            derive_bitrate(Quality::Lowest, 2, 48000, Some(1000), true),
            64000
        );
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size_for_bitrate(128000, 48000).unwrap(), 0x155);
        assert_eq!(frame_size_for_bitrate(384000, 48000).unwrap(), 1024);
        assert!(frame_size_for_bitrate(100, 48000).is_err());
    }

    #[test]
    fn test_band_layout() {
        let mono = derive_band_layout(48000, 128000, 0x155, 1);
        assert_eq!(mono.total_band_count, 107);
        assert_eq!(mono.base_band_count, 107);
        assert_eq!(mono.stereo_band_count, 0);
        assert_eq!(mono.bands_per_hfr_group, 0);

        let mono_lowest = derive_band_layout(48000, 64000, 170, 1);
        assert_eq!(mono_lowest.base_band_count, 57);
        assert_eq!(mono_lowest.stereo_band_count, 0);
        assert_eq!(mono_lowest.hfr_band_count(), 50);
        assert_eq!(mono_lowest.bands_per_hfr_group, 7);

        let high = derive_band_layout(48000, 256000, 682, 2);
        assert_eq!(high.stereo_band_count, 0);

        let low = derive_band_layout(48000, 128000, 0x155, 2);
        assert_eq!(low.base_band_count, 29);
        assert_eq!(low.stereo_band_count, 29);
        assert_eq!(low.hfr_band_count(), 49);

        let starved = derive_band_layout(48000, 1000, 16, 8);
        assert_eq!(starved.base_band_count + starved.stereo_band_count, 1);
    }

    #[test]
    fn test_band_layout_follows_sample_rate() {
        let full = derive_band_layout(48000, 96000, 256, 2);
        assert_eq!(full.total_band_count, 107);
        assert_eq!(full.base_band_count, 22);
        assert_eq!(full.stereo_band_count, 21);
        assert_eq!(full.bands_per_hfr_group, 8);

        let narrow = derive_band_layout(22050, 44100, 256, 2);
        assert_eq!(narrow.total_band_count, 128);
        assert_eq!(narrow.base_band_count, 22);
        assert_eq!(narrow.stereo_band_count, 21);
        assert_eq!(narrow.bands_per_hfr_group, 11);
        assert_ne!(full, narrow);

        for (sample_rate, bitrate, frame_size, channels) in [
            (8000, 32000, 512, 2),
            (44100, 705600, 2048, 1),
            (96000, 96000, 128, 8),
        ] {
            let layout = derive_band_layout(sample_rate, bitrate, frame_size, channels);
            assert!(layout.total_band_count <= BAND_COUNT);
            assert!(layout.base_band_count >= 1);
            let groups = layout
                .hfr_band_count()
                .div_ceil(layout.bands_per_hfr_group.max(1));
            assert!(groups <= MAX_HFR_GROUPS);
        }
    }
}
