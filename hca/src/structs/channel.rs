//! Per-channel frame state and side information coding.
//!
//! ## Channel roles
//!
//! With intensity stereo active, channels are paired inside each track:
//! - **Discrete**: coded independently over all coded bands
//! - **StereoPrimary**: carries the shared spectrum of a pair
//! - **StereoSecondary**: codes only the base bands, plus one intensity code
//!   per subframe that splits the primary's stereo bands between the two
//!
//! ## Side information
//!
//! Scale factors are delta coded with a per-channel width chosen by the
//! encoder. From version 3.0 the HFR scales ride at the end of the scale
//! factor section and intensity codes are delta coded as well.

use std::fmt;
use std::io;

use anyhow::{Result, bail};

use crate::process::{SAMPLES_PER_SUBFRAME, SUBFRAMES, VERSION_V300};
use crate::structs::info::StreamInfo;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::FrameError;
use crate::utils::mdct::Mdct;
use crate::utils::tables::BAND_COUNT;

/// Role of a channel in intensity stereo coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelType {
    #[default]
    Discrete,
    StereoPrimary,
    StereoSecondary,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Discrete => write!(f, "Discrete"),
            ChannelType::StereoPrimary => write!(f, "StereoPrimary"),
            ChannelType::StereoSecondary => write!(f, "StereoSecondary"),
        }
    }
}

/// Assigns a role to every channel of the stream.
pub fn channel_types(info: &StreamInfo) -> Vec<ChannelType> {
    use ChannelType::{Discrete as D, StereoPrimary as P, StereoSecondary as S};

    let per_track = info.channels_per_track();
    let layout: &[ChannelType] = if info.stereo_band_count == 0 || per_track <= 1 {
        &[]
    } else {
        match per_track {
            2 => &[P, S],
            3 => &[P, S, D],
            4 if info.channel_config != 0 => &[P, S, D, D],
            4 => &[P, S, P, S],
            5 if info.channel_config > 2 => &[P, S, D, D, D],
            5 => &[P, S, D, P, S],
            6 => &[P, S, D, D, P, S],
            7 => &[P, S, D, D, P, S, D],
            8 => &[P, S, D, D, P, S, P, S],
            _ => &[],
        }
    };

    (0..info.channel_count)
        .map(|channel| {
            if layout.is_empty() {
                D
            } else {
                layout[channel % per_track]
            }
        })
        .collect()
}

/// Maximum plain delta at `delta_bits`; larger steps are escaped.
const fn max_delta(delta_bits: u8) -> i32 {
    (1 << (delta_bits - 1)) - 1
}

/// Scale factor section width for `values` coded with `delta_bits`.
pub fn scale_factor_bits(values: &[u8], delta_bits: u8) -> usize {
    match delta_bits {
        0 => 3,
        6.. => 3 + 6 * values.len(),
        _ => {
            let limit = max_delta(delta_bits);
            let escaped = delta_bits as usize + 6;
            let deltas: usize = values
                .windows(2)
                .map(|w| {
                    if (w[1] as i32 - w[0] as i32).abs() > limit {
                        escaped
                    } else {
                        delta_bits as usize
                    }
                })
                .sum();
            3 + 6 + deltas
        }
    }
}

/// Picks the cheapest delta width for `values`, returning `(delta_bits, section_bits)`.
pub fn optimal_delta_bits(values: &[u8]) -> (u8, usize) {
    if values.iter().all(|&v| v == 0) {
        return (0, 3);
    }

    let mut best = (6, scale_factor_bits(values, 6));
    for delta_bits in 1..6 {
        let bits = scale_factor_bits(values, delta_bits);
        if bits < best.1 {
            best = (delta_bits, bits);
        }
    }
    best
}

/// Reads a scale factor section into `values`. Returns `false` when a delta
/// walks outside the 6-bit range.
pub fn read_scale_factors(reader: &mut BsIoSliceReader, values: &mut [u8]) -> Result<(u8, bool)> {
    let delta_bits = reader.get_n(3)? as u8;

    if delta_bits == 0 {
        values.fill(0);
        return Ok((delta_bits, true));
    }

    if delta_bits >= 6 {
        for value in values.iter_mut() {
            *value = reader.get_n(6)? as u8;
        }
        return Ok((delta_bits, true));
    }

    let Some((first, rest)) = values.split_first_mut() else {
        return Ok((delta_bits, true));
    };
    *first = reader.get_n(6)? as u8;

    let escape = max_delta(delta_bits) + 1;
    let mut previous = *first as i32;
    for value in rest {
        let delta = reader.get_offset_binary(delta_bits as u32)?;
        let next = if delta < escape {
            previous + delta
        } else {
            reader.get_n(6)? as i32
        };

        if !(0..64).contains(&next) {
            return Ok((delta_bits, false));
        }

        *value = next as u8;
        previous = next;
    }

    Ok((delta_bits, true))
}

pub fn write_scale_factors(
    writer: &mut BitstreamIoWriter,
    values: &[u8],
    delta_bits: u8,
) -> io::Result<()> {
    writer.put_n(3, delta_bits as u32)?;

    match delta_bits {
        0 => Ok(()),
        6.. => values
            .iter()
            .try_for_each(|&v| writer.put_n(6, v as u32)),
        _ => {
            let Some((&first, _)) = values.split_first() else {
                return Ok(());
            };
            writer.put_n(6, first as u32)?;

            let limit = max_delta(delta_bits);
            let escape_code = (1u32 << delta_bits) - 1;
            for w in values.windows(2) {
                let delta = w[1] as i32 - w[0] as i32;
                if delta.abs() > limit {
                    writer.put_n(delta_bits as u32, escape_code)?;
                    writer.put_n(6, w[1] as u32)?;
                } else {
                    writer.put_n(delta_bits as u32, (delta + limit) as u32)?;
                }
            }
            Ok(())
        }
    }
}

/// Intensity code layout chosen by the encoder for version 3.0 streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntensityCoding {
    /// Eight raw 4-bit codes (before version 3.0).
    #[default]
    Raw,
    /// Every code is 7, written as a single 15.
    Centered,
    /// First code raw, then deltas with `selector + 1` bits.
    Delta(u8),
    /// First code raw, then seven raw codes.
    RawAfterFirst,
}

/// Reads the intensity section of a stereo secondary channel.
pub fn read_intensity(
    reader: &mut BsIoSliceReader,
    version: u16,
    channel: usize,
    intensity: &mut [u8; SUBFRAMES],
) -> Result<()> {
    if version < VERSION_V300 {
        for value in intensity.iter_mut() {
            *value = reader.get_n(4)? as u8;
        }
        return Ok(());
    }

    let first = reader.peek_n(4)?;
    if first == 15 {
        reader.skip_n(4)?;
        intensity.fill(7);
        return Ok(());
    }

    reader.skip_n(4)?;
    intensity[0] = first as u8;

    let selector = reader.get_n(2)?;
    if selector == 3 {
        for value in intensity.iter_mut().skip(1) {
            *value = reader.get_n(4)? as u8;
        }
        return Ok(());
    }

    let bits = selector + 1;
    let escape = (2u32 << selector) - 1;
    let mut previous = first as i32;
    for value in intensity.iter_mut().skip(1) {
        let delta = reader.get_n(bits)?;
        let next = if delta == escape {
            reader.get_n(4)? as i32
        } else {
            previous - (escape as i32 >> 1) + delta as i32
        };

        if !(0..=15).contains(&next) {
            bail!(FrameError::IntensityOutOfRange {
                channel,
                value: next,
            });
        }

        *value = next as u8;
        previous = next;
    }

    Ok(())
}

/// Bits needed for `intensity` under `coding`.
pub fn intensity_bits(intensity: &[u8; SUBFRAMES], coding: IntensityCoding) -> usize {
    match coding {
        IntensityCoding::Raw => 4 * SUBFRAMES,
        IntensityCoding::Centered => 4,
        IntensityCoding::RawAfterFirst => 4 + 2 + 4 * (SUBFRAMES - 1),
        IntensityCoding::Delta(selector) => {
            let bits = selector as usize + 1;
            let escape = (2i32 << selector) - 1;
            let offset = escape >> 1;
            let deltas: usize = intensity
                .windows(2)
                .map(|w| {
                    let code = w[1] as i32 - w[0] as i32 + offset;
                    if (0..escape).contains(&code) {
                        bits
                    } else {
                        bits + 4
                    }
                })
                .sum();
            4 + 2 + deltas
        }
    }
}

/// Chooses the cheapest intensity layout for version 3.0 streams.
pub fn optimal_intensity_coding(intensity: &[u8; SUBFRAMES]) -> (IntensityCoding, usize) {
    if intensity.iter().all(|&v| v == 7) {
        return (IntensityCoding::Centered, 4);
    }

    let mut best = (
        IntensityCoding::RawAfterFirst,
        intensity_bits(intensity, IntensityCoding::RawAfterFirst),
    );
    for selector in 0..3 {
        let coding = IntensityCoding::Delta(selector);
        let bits = intensity_bits(intensity, coding);
        if bits < best.1 {
            best = (coding, bits);
        }
    }
    best
}

pub fn write_intensity(
    writer: &mut BitstreamIoWriter,
    intensity: &[u8; SUBFRAMES],
    coding: IntensityCoding,
) -> io::Result<()> {
    match coding {
        IntensityCoding::Raw => intensity
            .iter()
            .try_for_each(|&v| writer.put_n(4, v as u32)),
        IntensityCoding::Centered => writer.put_n(4, 15),
        IntensityCoding::RawAfterFirst => {
            writer.put_n(4, intensity[0] as u32)?;
            writer.put_n(2, 3)?;
            intensity[1..]
                .iter()
                .try_for_each(|&v| writer.put_n(4, v as u32))
        }
        IntensityCoding::Delta(selector) => {
            writer.put_n(4, intensity[0] as u32)?;
            writer.put_n(2, selector as u32)?;

            let bits = selector as u32 + 1;
            let escape = (2i32 << selector) - 1;
            let offset = escape >> 1;
            for w in intensity.windows(2) {
                let code = w[1] as i32 - w[0] as i32 + offset;
                if (0..escape).contains(&code) {
                    writer.put_n(bits, code as u32)?;
                } else {
                    writer.put_n(bits, escape as u32)?;
                    writer.put_n(4, w[1] as u32)?;
                }
            }
            Ok(())
        }
    }
}

/// Per-channel state for one frame, plus the channel's persistent transform.
#[derive(Debug, Clone)]
pub struct Channel {
    pub channel_type: ChannelType,
    /// Bands carried in the bitstream for this channel.
    pub coded_count: usize,

    pub scale_factors: [u8; BAND_COUNT],
    pub resolution: [u8; BAND_COUNT],
    pub intensity: [u8; SUBFRAMES],
    pub hfr_scales: [u8; 8],

    pub spectra: [[f32; BAND_COUNT]; SUBFRAMES],
    pub scaled_spectra: [[f32; BAND_COUNT]; SUBFRAMES],
    pub quantized_spectra: [[i32; BAND_COUNT]; SUBFRAMES],
    pub pcm: [[f32; BAND_COUNT]; SUBFRAMES],

    pub mdct: Mdct,

    pub scale_factor_delta_bits: u8,
    pub scale_factor_bits: usize,
    pub intensity_coding: IntensityCoding,
    /// Side information bits, excluding coefficients.
    pub header_bits: usize,
}

impl Channel {
    pub fn new(channel_type: ChannelType, info: &StreamInfo, mdct: Mdct) -> Self {
        let coded_count = match channel_type {
            ChannelType::StereoSecondary => info.base_band_count,
            _ => info.base_band_count + info.stereo_band_count,
        };

        Self {
            channel_type,
            coded_count,
            scale_factors: [0; BAND_COUNT],
            resolution: [0; BAND_COUNT],
            intensity: [0; SUBFRAMES],
            hfr_scales: [0; 8],
            spectra: [[0.0; BAND_COUNT]; SUBFRAMES],
            scaled_spectra: [[0.0; BAND_COUNT]; SUBFRAMES],
            quantized_spectra: [[0; BAND_COUNT]; SUBFRAMES],
            pcm: [[0.0; BAND_COUNT]; SUBFRAMES],
            mdct,
            scale_factor_delta_bits: 0,
            scale_factor_bits: 0,
            intensity_coding: IntensityCoding::Raw,
            header_bits: 0,
        }
    }

    /// Forward transform of one frame of samples into `spectra`.
    pub fn run_mdct(&mut self, samples: &[f32]) {
        for (block, spectrum) in samples
            .chunks_exact(SAMPLES_PER_SUBFRAME)
            .zip(self.spectra.iter_mut())
        {
            self.mdct.mdct(block, spectrum);
        }
    }

    /// Inverse transform of `spectra` into `pcm`.
    pub fn run_imdct(&mut self) {
        for (spectrum, pcm) in self.spectra.iter().zip(self.pcm.iter_mut()) {
            self.mdct.imdct(spectrum, pcm);
        }
    }

    /// Whether HFR scales are sent for this channel.
    pub fn has_hfr_scales(&self, info: &StreamInfo) -> bool {
        self.channel_type != ChannelType::StereoSecondary && info.hfr_group_count() > 0
    }

    /// Values of the scale factor section: coded bands, then HFR scales on version 3.0.
    pub fn scale_factor_section(&self, info: &StreamInfo) -> Vec<u8> {
        let mut values = self.scale_factors[..self.coded_count].to_vec();
        if info.version >= VERSION_V300 && self.has_hfr_scales(info) {
            values.extend_from_slice(&self.hfr_scales[..info.hfr_group_count()]);
        }
        values
    }

    /// Reads the scale factor and side information sections. Returns
    /// `(delta_bits, valid)`.
    pub fn read_side_info(
        &mut self,
        reader: &mut BsIoSliceReader,
        info: &StreamInfo,
        index: usize,
    ) -> Result<(u8, bool)> {
        let v3_hfr = info.version >= VERSION_V300 && self.has_hfr_scales(info);
        let groups = if v3_hfr { info.hfr_group_count() } else { 0 };

        let mut values = [0u8; BAND_COUNT + 8];
        let section = &mut values[..self.coded_count + groups];
        let (delta_bits, valid) = read_scale_factors(reader, section)?;
        if !valid {
            return Ok((delta_bits, false));
        }

        self.scale_factors[..self.coded_count].copy_from_slice(&section[..self.coded_count]);
        self.scale_factors[self.coded_count..].fill(0);
        if v3_hfr {
            self.hfr_scales[..groups].copy_from_slice(&section[self.coded_count..]);
        }

        if self.channel_type == ChannelType::StereoSecondary {
            read_intensity(reader, info.version, index, &mut self.intensity)?;
        } else if info.version < VERSION_V300 && self.has_hfr_scales(info) {
            for scale in self.hfr_scales.iter_mut().take(info.hfr_group_count()) {
                *scale = reader.get_n(6)? as u8;
            }
        }

        Ok((delta_bits, true))
    }

    /// Writes the sections read by [`Channel::read_side_info`], using the
    /// encoder's chosen delta width and intensity layout.
    pub fn write_side_info(
        &self,
        writer: &mut BitstreamIoWriter,
        info: &StreamInfo,
    ) -> io::Result<()> {
        write_scale_factors(
            writer,
            &self.scale_factor_section(info),
            self.scale_factor_delta_bits,
        )?;

        if self.channel_type == ChannelType::StereoSecondary {
            write_intensity(writer, &self.intensity, self.intensity_coding)?;
        } else if info.version < VERSION_V300 && self.has_hfr_scales(info) {
            for &scale in &self.hfr_scales[..info.hfr_group_count()] {
                writer.put_n(6, scale as u32)?;
            }
        }

        Ok(())
    }

    /// Chooses delta width and intensity layout, and records the side
    /// information size in `header_bits`.
    pub fn plan_side_info(&mut self, info: &StreamInfo) {
        let (delta_bits, bits) = optimal_delta_bits(&self.scale_factor_section(info));
        self.scale_factor_delta_bits = delta_bits;
        self.scale_factor_bits = bits;
        self.header_bits = bits;

        if self.channel_type == ChannelType::StereoSecondary {
            let (coding, bits) = if info.version >= VERSION_V300 {
                optimal_intensity_coding(&self.intensity)
            } else {
                (IntensityCoding::Raw, 4 * SUBFRAMES)
            };
            self.intensity_coding = coding;
            self.header_bits += bits;
        } else if info.version < VERSION_V300 && self.has_hfr_scales(info) {
            self.header_bits += 6 * info.hfr_group_count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelType::{Discrete as D, StereoPrimary as P, StereoSecondary as S};

    fn info(channels: usize, stereo_bands: usize, config: u8) -> StreamInfo {
        StreamInfo {
            channel_count: channels,
            base_band_count: 64,
            stereo_band_count: stereo_bands,
            channel_config: config,
            ..Default::default()
        }
    }

    #[test]
    fn test_channel_roles() {
        assert_eq!(channel_types(&info(2, 0, 0)), vec![D, D]);
        assert_eq!(channel_types(&info(1, 16, 0)), vec![D]);
        assert_eq!(channel_types(&info(2, 16, 0)), vec![P, S]);
        assert_eq!(channel_types(&info(4, 16, 0)), vec![P, S, P, S]);
        assert_eq!(channel_types(&info(4, 16, 1)), vec![P, S, D, D]);
        assert_eq!(channel_types(&info(5, 16, 2)), vec![P, S, D, P, S]);
        assert_eq!(channel_types(&info(5, 16, 3)), vec![P, S, D, D, D]);
        assert_eq!(channel_types(&info(6, 16, 0)), vec![P, S, D, D, P, S]);
        assert_eq!(
            channel_types(&info(8, 16, 0)),
            vec![P, S, D, D, P, S, P, S]
        );

        let two_tracks = StreamInfo {
            track_count: 2,
            ..info(4, 16, 0)
        };
        assert_eq!(channel_types(&two_tracks), vec![P, S, P, S]);
    }

    fn scale_factor_round_trip(values: &[u8], delta_bits: u8) -> Vec<u8> {
        let mut writer = BitstreamIoWriter::default();
        write_scale_factors(&mut writer, values, delta_bits).unwrap();
        assert_eq!(
            writer.position() as usize,
            scale_factor_bits(values, delta_bits)
        );
        let bytes = writer.into_bytes().unwrap();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut decoded = vec![0u8; values.len()];
        let (read_bits, valid) = read_scale_factors(&mut reader, &mut decoded).unwrap();
        assert!(valid);
        assert_eq!(read_bits, delta_bits);
        decoded
    }

    #[test]
    fn test_scale_factor_deltas_round_trip() {
        let smooth: Vec<u8> = (0..128).map(|i| (32.0 + 20.0 * (i as f32 / 9.0).sin()) as u8).collect();
        let jumpy: Vec<u8> = (0..128).map(|i| ((i * 47 + 5) % 64) as u8).collect();
        let edges: Vec<u8> = (0..128).map(|i| if i % 3 == 0 { 63 } else { 0 }).collect();

        for values in [&smooth, &jumpy, &edges] {
            for delta_bits in 1..=6 {
                assert_eq!(&scale_factor_round_trip(values, delta_bits), values);
            }
        }
    }

    #[test]
    fn test_optimal_delta_bits() {
        assert_eq!(optimal_delta_bits(&[0; 40]), (0, 3));

        let flat = [20u8; 10];
        assert_eq!(optimal_delta_bits(&flat), (1, 3 + 6 + 9));

        let values: Vec<u8> = (0..64).collect();
        let (delta_bits, bits) = optimal_delta_bits(&values);
        assert_eq!(delta_bits, 2);
        assert_eq!(bits, 3 + 6 + 2 * 63);
    }

    #[test]
    fn test_scale_factor_overflow_is_soft_failure() {
        let mut writer = BitstreamIoWriter::default();
        writer.put_n(3, 3).unwrap();
        writer.put_n(6, 62).unwrap();
        writer.put_n(3, 6).unwrap();
        let bytes = writer.into_bytes().unwrap();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut values = [0u8; 2];
        let (_, valid) = read_scale_factors(&mut reader, &mut values).unwrap();
        assert!(!valid);
    }

    fn intensity_round_trip(intensity: [u8; SUBFRAMES], version: u16) -> [u8; SUBFRAMES] {
        let coding = if version >= VERSION_V300 {
            optimal_intensity_coding(&intensity).0
        } else {
            IntensityCoding::Raw
        };
        let mut writer = BitstreamIoWriter::default();
        write_intensity(&mut writer, &intensity, coding).unwrap();
        assert_eq!(
            writer.position() as usize,
            intensity_bits(&intensity, coding)
        );
        let bytes = writer.into_bytes().unwrap();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut decoded = [0u8; SUBFRAMES];
        read_intensity(&mut reader, version, 0, &mut decoded).unwrap();
        decoded
    }

    #[test]
    fn test_intensity_codings() {
        let cases = [
            [7u8; SUBFRAMES],
            [3, 4, 4, 5, 4, 3, 3, 4],
            [0, 14, 2, 13, 7, 7, 1, 12],
            [6, 6, 6, 6, 6, 6, 6, 6],
            [14, 13, 12, 11, 10, 9, 8, 7],
        ];
        for intensity in cases {
            assert_eq!(intensity_round_trip(intensity, VERSION_V300), intensity);
            assert_eq!(intensity_round_trip(intensity, 0x0200), intensity);
        }

        assert_eq!(
            optimal_intensity_coding(&[7; SUBFRAMES]),
            (IntensityCoding::Centered, 4)
        );
        assert_eq!(
            optimal_intensity_coding(&[6; SUBFRAMES]).0,
            IntensityCoding::Delta(0)
        );
    }

    #[test]
    fn test_intensity_overflow_is_error() {
        let mut writer = BitstreamIoWriter::default();
        writer.put_n(4, 14).unwrap();
        writer.put_n(2, 2).unwrap();
        writer.put_n(3, 6).unwrap();
        let bytes = writer.into_bytes().unwrap();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut intensity = [0u8; SUBFRAMES];
        let err = read_intensity(&mut reader, VERSION_V300, 1, &mut intensity).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::IntensityOutOfRange { channel: 1, .. })
        ));
    }
}
