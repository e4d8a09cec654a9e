//! Frame model and the bitstream layout of one frame.
//!
//! ```text
//! sync (16) | noise level (9) | evaluation boundary (7)
//! per channel: scale factors, then intensity codes or HFR scales
//! per subframe, per channel: coefficients of the coded bands
//! zero padding | CRC-16 (16)
//! ```
//!
//! A [`Frame`] is allocated once per stream and reused. The transforms held by
//! its channels carry overlap state from one frame to the next, so frames must
//! be processed in stream order.

use anyhow::{Result, bail};

use crate::process::{
    FRAME_SYNC, SAMPLES_PER_SUBFRAME, SUBFRAME_BITS, SUBFRAMES, VERSION_V300,
};
use crate::structs::channel::{Channel, ChannelType, channel_types};
use crate::structs::info::StreamInfo;
use crate::structs::key::Key;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::crc::FRAME_CRC;
use crate::utils::errors::FrameError;
use crate::utils::mdct::Mdct;
use crate::utils::tables::{
    BAND_COUNT, DEQUANTIZER_SCALE, INTENSITY_RATIO, MAX_BITS, QUANTIZER_STEP, READ_BITS,
    READ_VALUES, RESOLUTION_CURVE, SCALE_CONVERSION, WRITE_CODES, coefficient_bits,
    max_quantized, scale_ath_curve,
};

/// Sync, noise level, evaluation boundary and CRC.
pub const FRAME_OVERHEAD_BITS: u64 = 16 + 9 + 7 + 16;

#[derive(Debug, Clone)]
pub struct Frame {
    pub info: StreamInfo,
    pub channels: Vec<Channel>,
    /// Acceptable noise level, 0..=511.
    pub noise_level: u32,
    /// Bands below this index use a noise level one lower.
    pub evaluation_boundary: usize,
    pub ath_curve: [u8; BAND_COUNT],
}

impl Frame {
    pub fn new(info: &StreamInfo) -> Self {
        let scale = (2.0 / SAMPLES_PER_SUBFRAME as f32).sqrt();
        let channels = channel_types(info)
            .into_iter()
            .map(|channel_type| Channel::new(channel_type, info, Mdct::new(SUBFRAME_BITS, scale)))
            .collect();

        let ath_curve = if info.use_ath_curve {
            scale_ath_curve(info.sample_rate)
        } else {
            [0; BAND_COUNT]
        };

        Self {
            info: info.clone(),
            channels,
            noise_level: 0,
            evaluation_boundary: 0,
            ath_curve,
        }
    }

    /// Reads a decrypted frame into the channel model.
    ///
    /// Structural problems (bad sync word, intensity overflow, fields running
    /// past the end of `data`) are errors. `Ok(false)` means the frame parsed
    /// but failed the leftover-bits validity check, which is what a wrongly
    /// decrypted frame usually looks like.
    pub fn unpack(&mut self, data: &[u8]) -> Result<bool> {
        let mut reader = BsIoSliceReader::from_slice(data);

        let sync = reader.get_n(16)?;
        if sync != FRAME_SYNC {
            bail!(FrameError::InvalidSync(sync));
        }

        self.noise_level = reader.get_n(9)?;
        self.evaluation_boundary = reader.get_n(7)? as usize;

        let mut all_empty = true;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let (delta_bits, valid) = channel.read_side_info(&mut reader, &self.info, index)?;
            if !valid {
                return Ok(false);
            }
            all_empty &= delta_bits == 0;
        }

        self.calculate_resolutions();

        for subframe in 0..SUBFRAMES {
            for channel in self.channels.iter_mut() {
                read_coefficients(&mut reader, channel, subframe)?;
            }
        }

        let left = reader.len() - reader.position()?;
        Ok((16..=128).contains(&left) || all_empty || (self.noise_level == 0 && left >= 16))
    }

    /// Writes the channel model as one frame of `info.frame_size` bytes,
    /// encrypting it with `key` before the CRC is appended.
    pub fn pack(&self, key: Option<&Key>) -> Result<Vec<u8>> {
        let frame_size = self.info.frame_size;
        let frame_bits = (frame_size as u64) << 3;

        let mut writer = BitstreamIoWriter::with_capacity(frame_size);
        writer.put_n(16, FRAME_SYNC)?;
        writer.put_n(9, self.noise_level)?;
        writer.put_n(7, self.evaluation_boundary as u32)?;

        for channel in &self.channels {
            channel.write_side_info(&mut writer, &self.info)?;
        }

        for subframe in 0..SUBFRAMES {
            for channel in &self.channels {
                write_coefficients(&mut writer, channel, subframe)?;
            }
        }

        let needed = writer.position() + 16;
        if needed > frame_bits {
            bail!(FrameError::FrameOverflow {
                needed,
                available: frame_bits,
            });
        }

        writer.align(8)?;
        let padding = frame_size - (writer.position() >> 3) as usize;
        writer.fill_bytes(0, padding)?;

        let mut bytes = writer.into_bytes()?;
        let (body, crc) = bytes.split_at_mut(frame_size - 2);
        if let Some(key) = key {
            key.encrypt(body);
        }
        crc.copy_from_slice(&FRAME_CRC.checksum(body).to_be_bytes());

        Ok(bytes)
    }

    /// Derives every coded band's resolution from its scale factor, the ATH
    /// curve, the noise level and the evaluation boundary.
    pub fn calculate_resolutions(&mut self) {
        let noise = self.noise_level as i32;
        let boundary = self.evaluation_boundary;

        for channel in self.channels.iter_mut() {
            let coded = channel.coded_count;
            for band in 0..coded {
                let level = self.ath_curve[band] as i32
                    + if band < boundary { noise - 1 } else { noise };
                channel.resolution[band] =
                    calculate_resolution(&self.info, channel.scale_factors[band], level);
            }
            channel.resolution[coded..].fill(0);
        }
    }

    /// Rebuilds spectra from quantized values. Bands that are not coded are zeroed.
    pub fn dequantize(&mut self) {
        for channel in self.channels.iter_mut() {
            let coded = channel.coded_count;
            for band in 0..coded {
                let scale = DEQUANTIZER_SCALE[channel.scale_factors[band] as usize]
                    * QUANTIZER_STEP[channel.resolution[band] as usize];
                for subframe in 0..SUBFRAMES {
                    channel.spectra[subframe][band] =
                        channel.quantized_spectra[subframe][band] as f32 * scale;
                }
            }
            for spectrum in channel.spectra.iter_mut() {
                spectrum[coded..].fill(0.0);
            }
        }
    }

    /// Fills the HFR bands of every non-secondary channel by mirroring the
    /// coded bands below them, then clears the top bin.
    pub fn reconstruct_high_frequency(&mut self) {
        let groups = self.info.hfr_group_count();
        let per_group = self.info.bands_per_hfr_group;
        if groups == 0 || per_group == 0 {
            return;
        }

        let start = self.info.base_band_count + self.info.stereo_band_count;
        let hfr_bands = self.info.hfr_band_count();
        let used = hfr_bands.min(
            self.info
                .total_band_count
                .min(BAND_COUNT - 1)
                .saturating_sub(hfr_bands),
        );

        for channel in self.channels.iter_mut() {
            if channel.channel_type == ChannelType::StereoSecondary {
                continue;
            }

            for band in 0..used {
                let group = band / per_group;
                let high = start + band;
                let low = start - band - 1;
                let index = channel.hfr_scales[group] as i32 - channel.scale_factors[low] as i32 + 64;
                let gain = SCALE_CONVERSION[index.clamp(0, 127) as usize];
                for spectrum in channel.spectra.iter_mut() {
                    spectrum[high] = gain * spectrum[low];
                }
            }

            for spectrum in channel.spectra.iter_mut() {
                spectrum[BAND_COUNT - 1] = 0.0;
            }
        }
    }

    /// Splits each primary channel's shared bands between it and its secondary.
    pub fn apply_intensity_stereo(&mut self) {
        let start = self.info.base_band_count;
        let end = self.info.total_band_count.min(BAND_COUNT);

        for index in 1..self.channels.len() {
            let (head, tail) = self.channels.split_at_mut(index);
            let primary = &mut head[index - 1];
            let secondary = &mut tail[0];
            if primary.channel_type != ChannelType::StereoPrimary
                || secondary.channel_type != ChannelType::StereoSecondary
            {
                continue;
            }

            for subframe in 0..SUBFRAMES {
                let ratio_l = INTENSITY_RATIO[secondary.intensity[subframe] as usize];
                let ratio_r = ratio_l - 2.0;
                for band in start..end {
                    let value = primary.spectra[subframe][band];
                    secondary.spectra[subframe][band] = value * ratio_r;
                    primary.spectra[subframe][band] = value * ratio_l;
                }
            }
        }
    }

    /// Runs the inverse transform of every channel into its `pcm` blocks.
    pub fn run_imdct(&mut self) {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.channels.par_iter_mut().for_each(Channel::run_imdct);
        }

        #[cfg(not(feature = "parallel"))]
        self.channels.iter_mut().for_each(Channel::run_imdct);
    }

    /// Quantizes the scaled spectra at the current resolutions.
    pub fn quantize(&mut self) {
        for channel in self.channels.iter_mut() {
            let coded = channel.coded_count;
            for band in 0..coded {
                let resolution = channel.resolution[band] as usize;
                let step = QUANTIZER_STEP[resolution];
                let limit = max_quantized(resolution);
                for subframe in 0..SUBFRAMES {
                    let value = channel.scaled_spectra[subframe][band];
                    channel.quantized_spectra[subframe][band] = if resolution == 0 {
                        0
                    } else {
                        let magnitude = ((value.abs() / step + 0.5).floor() as i32).min(limit);
                        if value < 0.0 { -magnitude } else { magnitude }
                    };
                }
            }
            for spectrum in channel.quantized_spectra.iter_mut() {
                spectrum[coded..].fill(0);
            }
        }
    }

    /// Frame bits needed for the current side information and quantized
    /// spectra, including sync, header and CRC.
    pub fn bit_count(&self) -> u64 {
        let mut bits = FRAME_OVERHEAD_BITS;
        for channel in &self.channels {
            bits += channel.header_bits as u64;
            for spectrum in &channel.quantized_spectra {
                for (band, &value) in spectrum[..channel.coded_count].iter().enumerate() {
                    bits += coefficient_bits(channel.resolution[band] as usize, value) as u64;
                }
            }
        }
        bits
    }
}

/// Resolution of a band with `scale_factor` at noise `level`.
pub fn calculate_resolution(info: &StreamInfo, scale_factor: u8, level: i32) -> u8 {
    if scale_factor == 0 {
        return 0;
    }

    let position = level - 5 * scale_factor as i32 / 2 + 2;
    if info.version < VERSION_V300 {
        return RESOLUTION_CURVE[position.clamp(0, 58) as usize];
    }

    if position >= 67 {
        return 0;
    }
    RESOLUTION_CURVE[position.clamp(0, 58) as usize]
        .max(info.min_resolution)
        .min(info.max_resolution)
}

fn read_coefficients(
    reader: &mut BsIoSliceReader,
    channel: &mut Channel,
    subframe: usize,
) -> Result<()> {
    let coded = channel.coded_count;
    for band in 0..coded {
        let resolution = channel.resolution[band] as usize;
        let max_bits = MAX_BITS[resolution];
        let code = reader.peek_n(max_bits)?;

        let (value, bits) = if resolution < 8 {
            (
                READ_VALUES[resolution][code as usize] as i32,
                READ_BITS[resolution][code as usize] as u32,
            )
        } else {
            let magnitude = (code >> 1) as i32;
            let value = if code & 1 == 1 { -magnitude } else { magnitude };
            (value, max_bits - u32::from(magnitude == 0))
        };

        reader.skip_n(bits)?;
        channel.quantized_spectra[subframe][band] = value;
    }
    channel.quantized_spectra[subframe][coded..].fill(0);

    Ok(())
}

fn write_coefficients(
    writer: &mut BitstreamIoWriter,
    channel: &Channel,
    subframe: usize,
) -> Result<()> {
    for band in 0..channel.coded_count {
        let resolution = channel.resolution[band] as usize;
        let value = channel.quantized_spectra[subframe][band];

        if resolution < 8 {
            let entry = WRITE_CODES[resolution][(value + 7) as usize];
            writer.put_n(entry.bits, entry.code)?;
        } else {
            let magnitude = value.unsigned_abs();
            writer.put_n(MAX_BITS[resolution] - 1, magnitude)?;
            if magnitude != 0 {
                writer.put(value < 0)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::VERSION_V200;

    fn mono_info(frame_size: usize) -> StreamInfo {
        StreamInfo {
            frame_count: 1,
            frame_size,
            ..Default::default()
        }
    }

    fn fill_frame(frame: &mut Frame) {
        for channel in frame.channels.iter_mut() {
            for band in 0..channel.coded_count {
                channel.scale_factors[band] = (band % 20 + 30) as u8;
            }
            for (subframe, spectrum) in channel.scaled_spectra.iter_mut().enumerate() {
                for (band, value) in spectrum.iter_mut().enumerate() {
                    *value = ((subframe * 7 + band * 3) % 19) as f32 / 19.0 - 0.5;
                }
            }
            channel.plan_side_info(&frame.info);
        }
        frame.calculate_resolutions();
        frame.quantize();
    }

    #[test]
    fn test_resolution_curve_rules() {
        let v2 = StreamInfo::default();
        assert_eq!(calculate_resolution(&v2, 0, 0), 0);
        assert_eq!(calculate_resolution(&v2, 1, 0), 15);
        assert_eq!(calculate_resolution(&v2, 10, 100), 1);
        assert_eq!(calculate_resolution(&v2, 10, 78), 2);

        let v3 = StreamInfo {
            version: VERSION_V300,
            min_resolution: 3,
            max_resolution: 12,
            ..Default::default()
        };
        assert_eq!(calculate_resolution(&v3, 10, 100), 0);
        assert_eq!(calculate_resolution(&v3, 10, 80), 3);
        assert_eq!(calculate_resolution(&v3, 1, 0), 12);
        assert_eq!(calculate_resolution(&v3, 0, 0), 0);
    }

    #[test]
    fn test_pack_unpack_preserves_quantized_spectra() {
        let info = mono_info(2048);
        let mut frame = Frame::new(&info);
        fill_frame(&mut frame);
        assert!(frame.bit_count() <= 2048 * 8);

        let bytes = frame.pack(None).unwrap();
        assert_eq!(bytes.len(), 2048);
        assert_eq!(FRAME_CRC.checksum(&bytes), 0);

        let mut decoded = Frame::new(&info);
        assert!(decoded.unpack(&bytes).unwrap());
        assert_eq!(decoded.noise_level, 0);
        assert_eq!(
            decoded.channels[0].scale_factors,
            frame.channels[0].scale_factors
        );
        assert_eq!(
            decoded.channels[0].quantized_spectra,
            frame.channels[0].quantized_spectra
        );
    }

    #[test]
    fn test_validity_depends_on_leftover_bits() {
        let mut frame = Frame::new(&mono_info(4096));
        frame.noise_level = 90;
        frame.evaluation_boundary = 12;
        fill_frame(&mut frame);

        let exact = frame.bit_count().div_ceil(8) as usize + 4;
        frame.info.frame_size = exact;
        let bytes = frame.pack(None).unwrap();
        let mut decoded = Frame::new(&mono_info(exact));
        assert!(decoded.unpack(&bytes).unwrap());
        assert_eq!(decoded.evaluation_boundary, 12);
        assert_eq!(
            decoded.channels[0].quantized_spectra,
            frame.channels[0].quantized_spectra
        );

        frame.info.frame_size = exact + 64;
        let bytes = frame.pack(None).unwrap();
        let mut decoded = Frame::new(&mono_info(exact + 64));
        assert!(!decoded.unpack(&bytes).unwrap());
    }

    #[test]
    fn test_pack_rejects_overflow() {
        let mut frame = Frame::new(&mono_info(64));
        fill_frame(&mut frame);
        let err = frame.pack(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::FrameOverflow { .. })
        ));
    }

    #[test]
    fn test_empty_frame_is_valid() {
        let info = mono_info(0x155);
        let bytes = Frame::new(&info).pack(None).unwrap();
        assert_eq!(bytes.len(), 0x155);
        assert_eq!(bytes[..4], [0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(FRAME_CRC.checksum(&bytes), 0);

        let mut decoded = Frame::new(&info);
        assert!(decoded.unpack(&bytes).unwrap());
    }

    #[test]
    fn test_bad_sync_is_error() {
        let info = mono_info(0x155);
        let mut bytes = Frame::new(&info).pack(None).unwrap();
        bytes[1] = 0x7F;

        let err = Frame::new(&info).unpack(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::InvalidSync(0xFF7F))
        ));
    }

    #[test]
    fn test_hfr_mirrors_coded_bands() {
        let info = StreamInfo {
            version: VERSION_V200,
            base_band_count: 96,
            bands_per_hfr_group: 4,
            ..mono_info(0x155)
        };
        let mut frame = Frame::new(&info);
        let channel = &mut frame.channels[0];
        assert_eq!(channel.coded_count, 96);
        channel.scale_factors[95] = 40;
        channel.scale_factors[94] = 40;
        channel.hfr_scales[0] = 40;
        for spectrum in channel.spectra.iter_mut() {
            spectrum[95] = 0.5;
            spectrum[94] = -0.25;
            spectrum[127] = 1.0;
        }

        frame.reconstruct_high_frequency();
        let spectra = &frame.channels[0].spectra;
        for spectrum in spectra {
            assert!((spectrum[96] - 0.5).abs() < 1e-6);
            assert!((spectrum[97] + 0.25).abs() < 1e-6);
            assert_eq!(spectrum[127], 0.0);
        }
    }

    #[test]
    fn test_intensity_stereo_split() {
        let info = StreamInfo {
            channel_count: 2,
            base_band_count: 100,
            stereo_band_count: 28,
            ..mono_info(0x155)
        };
        let mut frame = Frame::new(&info);
        frame.channels[1].intensity = [7, 0, 14, 7, 7, 7, 7, 7];
        for spectrum in frame.channels[0].spectra.iter_mut() {
            spectrum[100] = 1.0;
            spectrum[10] = 1.0;
        }

        frame.apply_intensity_stereo();
        let (primary, secondary) = (&frame.channels[0], &frame.channels[1]);
        assert!((primary.spectra[0][100] - 1.0).abs() < 1e-6);
        assert!((secondary.spectra[0][100] + 1.0).abs() < 1e-6);
        assert!((primary.spectra[1][100] - 2.0).abs() < 1e-6);
        assert_eq!(secondary.spectra[1][100], 0.0);
        assert_eq!(primary.spectra[2][100], 0.0);
        assert!((secondary.spectra[2][100] + 2.0).abs() < 1e-6);
        assert_eq!(primary.spectra[0][10], 1.0);
        assert_eq!(secondary.spectra[0][10], 0.0);
    }
}
