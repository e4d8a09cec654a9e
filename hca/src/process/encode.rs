use anyhow::{Result, bail};
use log::{debug, trace};

use crate::process::quality::{
    Quality, derive_band_layout, derive_bitrate, frame_size_for_bitrate,
};
use crate::process::{SAMPLES_PER_FRAME, SUBFRAMES, VERSION_V200};
use crate::structs::channel::ChannelType;
use crate::structs::frame::Frame;
use crate::structs::info::{EncryptionType, LoopInfo, StreamInfo};
use crate::structs::key::{Key, KeyKind};
use crate::utils::errors::{EncodeError, StreamError};
use crate::utils::tables::{BAND_COUNT, DEQUANTIZER_SCALE, INTENSITY_RATIO};

/// Samples of delay introduced by the transform overlap.
pub const ENCODER_DELAY: usize = 128;

const MAX_NOISE_LEVEL: u32 = 255;
const MAX_EVALUATION_BOUNDARY: usize = 127;

/// Options applied when a stream is set up.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub quality: Quality,
    /// Overrides the bitrate implied by `quality`.
    pub bitrate: Option<u32>,
    /// Raise very low bitrates to a usable floor.
    pub limit_bitrate: bool,
    pub version: u16,
    pub use_ath_curve: bool,
    /// Loop range in samples, end exclusive.
    pub loop_points: Option<(usize, usize)>,
    /// Encrypts every frame with this key.
    pub key: Option<Key>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            bitrate: None,
            limit_bitrate: false,
            version: VERSION_V200,
            use_ath_curve: false,
            loop_points: None,
            key: None,
        }
    }
}

/// Encodes 16-bit PCM into fixed-size frames.
pub struct Encoder {
    frame: Frame,
    key: Option<Key>,
    frame_index: usize,
    samples: Vec<f32>,
}

impl Encoder {
    /// Derives the stream parameters for `sample_count` samples per channel.
    pub fn new(
        channel_count: usize,
        sample_rate: u32,
        sample_count: usize,
        config: &EncoderConfig,
    ) -> Result<Self> {
        let bitrate = derive_bitrate(
            config.quality,
            channel_count,
            sample_rate,
            config.bitrate,
            config.limit_bitrate,
        );
        let frame_size = frame_size_for_bitrate(bitrate, sample_rate)?;
        let layout = derive_band_layout(sample_rate, bitrate, frame_size, channel_count.max(1));

        let loop_padding = config.loop_points.map_or(0, |(start, _)| {
            (SAMPLES_PER_FRAME - (start + ENCODER_DELAY) % SAMPLES_PER_FRAME) % SAMPLES_PER_FRAME
        });
        let inserted_samples = ENCODER_DELAY + loop_padding;
        let frame_count = (sample_count + inserted_samples).div_ceil(SAMPLES_PER_FRAME);
        let appended_samples = frame_count * SAMPLES_PER_FRAME - sample_count - inserted_samples;

        let loop_info = match config.loop_points {
            Some((start, end)) if start >= end || end > sample_count => {
                bail!(StreamError::InvalidLoopPoints {
                    start,
                    end,
                    samples: sample_count,
                });
            }
            Some((start, end)) => {
                let end_frame = (end + inserted_samples - 1) / SAMPLES_PER_FRAME;
                Some(LoopInfo {
                    start_frame: (start + inserted_samples) / SAMPLES_PER_FRAME,
                    end_frame,
                    pre_loop_samples: (start + inserted_samples) % SAMPLES_PER_FRAME,
                    post_loop_samples: (end_frame + 1) * SAMPLES_PER_FRAME - end - inserted_samples,
                })
            }
            None => None,
        };

        let encryption = match config.key.as_ref().map(Key::kind) {
            None | Some(KeyKind::Type0) => EncryptionType::None,
            Some(KeyKind::Type1) => EncryptionType::Type1,
            Some(KeyKind::Code(_)) => EncryptionType::Keyed,
        };

        let info = StreamInfo {
            version: config.version,
            channel_count,
            sample_rate,
            frame_count,
            inserted_samples,
            appended_samples,
            frame_size,
            min_resolution: 1,
            max_resolution: 15,
            track_count: 1,
            channel_config: 0,
            total_band_count: layout.total_band_count,
            base_band_count: layout.base_band_count,
            stereo_band_count: layout.stereo_band_count,
            bands_per_hfr_group: layout.bands_per_hfr_group,
            loop_info,
            use_ath_curve: config.use_ath_curve,
            encryption,
        };
        info.validate()?;

        debug!(
            "Encoding {channel_count} channels at {sample_rate} Hz, {} quality: {bitrate} bps, {frame_count} frames of {frame_size} bytes",
            config.quality
        );

        Ok(Self {
            frame: Frame::new(&info),
            key: config.key.clone().filter(|_| encryption != EncryptionType::None),
            frame_index: 0,
            samples: vec![0.0; SAMPLES_PER_FRAME],
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.frame.info
    }

    /// Encodes one frame from exactly 1024 samples per channel.
    ///
    /// The caller is responsible for the leading delay and padding described
    /// by [`StreamInfo::inserted_samples`]; [`Encoder::encode_stream`] handles
    /// them.
    pub fn encode_frame(&mut self, pcm: &[&[i16]]) -> Result<Vec<u8>> {
        let info = &self.frame.info;
        if self.frame_index >= info.frame_count {
            bail!(EncodeError::StreamComplete(info.frame_count));
        }
        if pcm.len() != info.channel_count {
            bail!(EncodeError::ChannelCountMismatch {
                expected: info.channel_count,
                actual: pcm.len(),
            });
        }
        if let Some((channel, samples)) = pcm
            .iter()
            .enumerate()
            .find(|(_, samples)| samples.len() != SAMPLES_PER_FRAME)
        {
            bail!(EncodeError::SampleCountMismatch {
                channel,
                expected: SAMPLES_PER_FRAME,
                actual: samples.len(),
            });
        }

        for (channel, input) in self.frame.channels.iter_mut().zip(pcm) {
            for (sample, &value) in self.samples.iter_mut().zip(input.iter()) {
                *sample = value as f32 / 32768.0;
            }
            channel.run_mdct(&self.samples);
        }

        analyze_intensity(&mut self.frame);
        calculate_scale_factors(&mut self.frame);
        calculate_hfr_scales(&mut self.frame);

        let info = &self.frame.info;
        for channel in self.frame.channels.iter_mut() {
            channel.plan_side_info(info);
        }

        search_allocation(&mut self.frame)?;

        trace!(
            "Frame {}: noise level {}, evaluation boundary {}, {} bits",
            self.frame_index,
            self.frame.noise_level,
            self.frame.evaluation_boundary,
            self.frame.bit_count()
        );

        self.frame_index += 1;
        self.frame.pack(self.key.as_ref())
    }

    /// Encodes a whole stream, one buffer of `sample_count` samples per channel,
    /// into concatenated frames.
    pub fn encode_stream(&mut self, pcm: &[Vec<i16>]) -> Result<Vec<u8>> {
        let info = self.info().clone();
        if pcm.len() != info.channel_count {
            bail!(EncodeError::ChannelCountMismatch {
                expected: info.channel_count,
                actual: pcm.len(),
            });
        }

        let sample_count = info.sample_count();
        if let Some((channel, samples)) = pcm
            .iter()
            .enumerate()
            .find(|(_, samples)| samples.len() != sample_count)
        {
            bail!(EncodeError::SampleCountMismatch {
                channel,
                expected: sample_count,
                actual: samples.len(),
            });
        }

        let leading = info.inserted_samples - ENCODER_DELAY;
        let padded_len = info.frame_count * SAMPLES_PER_FRAME;
        let padded: Vec<Vec<i16>> = pcm
            .iter()
            .map(|samples| {
                let mut buffer = vec![0i16; padded_len];
                buffer[leading..leading + samples.len()].copy_from_slice(samples);
                buffer
            })
            .collect();

        let mut output = Vec::with_capacity(info.frame_count * info.frame_size);
        for index in 0..info.frame_count {
            let range = index * SAMPLES_PER_FRAME..(index + 1) * SAMPLES_PER_FRAME;
            let blocks: Vec<&[i16]> = padded.iter().map(|b| &b[range.clone()]).collect();
            output.extend_from_slice(&self.encode_frame(&blocks)?);
        }

        Ok(output)
    }
}

/// Smallest scale factor whose dequantizer scale exceeds `value`.
fn find_scale_factor(value: f32) -> u8 {
    DEQUANTIZER_SCALE
        .iter()
        .position(|&scale| scale > value)
        .unwrap_or(63) as u8
}

/// Folds each primary/secondary pair's shared bands into the primary and
/// records the balance as intensity codes on the secondary.
///
/// The primary carries the pair's sum, scaled so that the intensity ratio
/// restores the left channel's level. The code is the ratio table entry
/// nearest to `2·Σ|L| / (Σ|L| + Σ|R|)`.
fn analyze_intensity(frame: &mut Frame) {
    let start = frame.info.base_band_count;
    let end = frame.info.total_band_count.min(BAND_COUNT);

    for index in 1..frame.channels.len() {
        let (head, tail) = frame.channels.split_at_mut(index);
        let primary = &mut head[index - 1];
        let secondary = &mut tail[0];
        if primary.channel_type != ChannelType::StereoPrimary
            || secondary.channel_type != ChannelType::StereoSecondary
        {
            continue;
        }

        for subframe in 0..SUBFRAMES {
            let left = &mut primary.spectra[subframe];
            let right = &secondary.spectra[subframe];

            let mut energy_left = 0.0f32;
            let mut energy_right = 0.0f32;
            let mut energy_sum = 0.0f32;
            for band in start..end {
                energy_left += left[band].abs();
                energy_right += right[band].abs();
                energy_sum += (left[band] + right[band]).abs();
            }

            let energy = energy_left + energy_right;
            if energy <= 0.0 {
                secondary.intensity[subframe] = 7;
                continue;
            }

            let gain = if energy_sum > 0.0 {
                (energy / (2.0 * energy_sum)).min(2.0)
            } else {
                0.0
            };
            for band in start..end {
                left[band] = (left[band] + right[band]) * gain;
            }

            let balance = 2.0 * energy_left / energy;
            let mut code = 0;
            while code < 14 && (INTENSITY_RATIO[code] + INTENSITY_RATIO[code + 1]) / 2.0 > balance
            {
                code += 1;
            }
            secondary.intensity[subframe] = code as u8;
        }
    }
}

/// Picks one scale factor per coded band and normalizes the spectra by it.
fn calculate_scale_factors(frame: &mut Frame) {
    for channel in frame.channels.iter_mut() {
        let coded = channel.coded_count;
        for band in 0..BAND_COUNT {
            if band >= coded {
                channel.scale_factors[band] = 0;
                continue;
            }

            let peak = channel
                .spectra
                .iter()
                .map(|spectrum| spectrum[band].abs())
                .fold(0.0f32, f32::max);
            channel.scale_factors[band] = find_scale_factor(peak);
        }

        for (scaled, spectrum) in channel
            .scaled_spectra
            .iter_mut()
            .zip(channel.spectra.iter())
        {
            for band in 0..BAND_COUNT {
                let scale_factor = channel.scale_factors[band] as usize;
                scaled[band] = if band >= coded || scale_factor == 0 {
                    0.0
                } else {
                    (spectrum[band] / DEQUANTIZER_SCALE[scale_factor]).clamp(-0.999999, 0.999999)
                };
            }
        }
    }
}

/// Chooses HFR scales so the mirrored bands match the level of the originals.
fn calculate_hfr_scales(frame: &mut Frame) {
    let info = &frame.info;
    let groups = info.hfr_group_count();
    let per_group = info.bands_per_hfr_group;
    if groups == 0 || per_group == 0 {
        return;
    }

    let start = info.base_band_count + info.stereo_band_count;
    let hfr_bands = info.hfr_band_count();
    let used = hfr_bands.min(
        info.total_band_count
            .min(BAND_COUNT - 1)
            .saturating_sub(hfr_bands),
    );

    for channel in frame.channels.iter_mut() {
        if channel.channel_type == ChannelType::StereoSecondary {
            continue;
        }

        for group in 0..groups {
            let first = group * per_group;
            let last = (first + per_group).min(hfr_bands);

            let high: Vec<usize> = (start + first..start + last)
                .filter(|&band| band < BAND_COUNT)
                .collect();
            let target = mean_magnitude(&channel.spectra, &high);

            let low: Vec<usize> = (first..last.min(used))
                .map(|band| start - band - 1)
                .collect();
            let source = mean_magnitude(&channel.scaled_spectra, &low);

            let mut level = target;
            if source > 0.0 {
                level *= (1.0 / source).min(std::f32::consts::SQRT_2);
            }
            channel.hfr_scales[group] = find_scale_factor(level);
        }
    }
}

fn mean_magnitude(spectra: &[[f32; BAND_COUNT]; SUBFRAMES], bands: &[usize]) -> f32 {
    if bands.is_empty() {
        return 0.0;
    }

    let sum: f32 = spectra
        .iter()
        .flat_map(|spectrum| bands.iter().map(move |&band| spectrum[band].abs()))
        .sum();
    sum / (bands.len() * SUBFRAMES) as f32
}

/// Quantizes at the given allocation and reports the frame's size in bits.
fn allocation_bits(frame: &mut Frame, noise_level: u32, boundary: usize) -> u64 {
    frame.noise_level = noise_level;
    frame.evaluation_boundary = boundary;
    frame.calculate_resolutions();
    frame.quantize();
    frame.bit_count()
}

/// Finds the lowest noise level, then the highest evaluation boundary, that
/// fit the frame, and leaves the frame quantized at that allocation.
fn search_allocation(frame: &mut Frame) -> Result<()> {
    let available = (frame.info.frame_size as u64) << 3;

    let mut low = 0;
    let mut high = MAX_NOISE_LEVEL;
    while low < high {
        let mid = (low + high) / 2;
        if allocation_bits(frame, mid, 0) > available {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    let noise_level = low;
    let needed = allocation_bits(frame, noise_level, 0);
    if needed > available {
        bail!(EncodeError::NoFittingNoiseLevel { needed, available });
    }

    if noise_level == 0 {
        return Ok(());
    }

    let mut low = 0;
    let mut high = MAX_EVALUATION_BOUNDARY;
    while low < high {
        let mid = (low + high).div_ceil(2);
        if allocation_bits(frame, noise_level, mid) > available {
            high = mid - 1;
        } else {
            low = mid;
        }
    }

    if allocation_bits(frame, noise_level, low) > available {
        allocation_bits(frame, noise_level, 0);
    }

    Ok(())
}
