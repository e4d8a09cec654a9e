use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::SAMPLES_PER_FRAME;
use crate::structs::frame::Frame;
use crate::structs::info::{EncryptionType, StreamInfo};
use crate::structs::key::{Key, KeyKind};
use crate::utils::crc::FRAME_CRC;
use crate::utils::errors::{FrameError, StreamError};

/// Decodes frames to PCM audio samples.
///
/// Frames must be fed in stream order: each channel's transform carries
/// overlap from the previous frame.
#[derive(Default)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    /// Creates a decoder for a stream described by `info`.
    ///
    /// Streams using the fixed type 1 cipher get their key automatically;
    /// keyed streams need [`Decoder::set_key`].
    pub fn new(info: &StreamInfo) -> Result<Self> {
        info.validate()?;

        let key = match info.encryption {
            EncryptionType::Type1 => Some(Key::new(KeyKind::Type1)),
            _ => None,
        };

        Ok(Self {
            state: DecoderState {
                frame: Frame::new(info),
                key,
                ..Default::default()
            },
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.state.frame.info
    }

    /// Decodes one frame of `info.frame_size` bytes.
    ///
    /// Returns 1024 samples per channel. No padding is removed; see
    /// [`Decoder::decode_stream`] for trimmed output.
    pub fn decode_frame(&mut self, data: &[u8]) -> Result<DecodedFrame> {
        self.state.decode_frame(data)?;

        let pcm = self
            .state
            .frame
            .channels
            .iter()
            .map(|channel| {
                let mut samples = [0i16; SAMPLES_PER_FRAME];
                for (out, value) in samples.iter_mut().zip(channel.pcm.iter().flatten()) {
                    *out = pcm_from_float(*value);
                }
                samples
            })
            .collect();

        Ok(DecodedFrame {
            frame_index: self.state.frame_index - 1,
            pcm,
        })
    }

    /// Decodes a whole stream of concatenated frames from its first frame.
    ///
    /// Leading inserted samples are dropped and the output is clipped to the
    /// stream's sample count.
    pub fn decode_stream(&mut self, data: &[u8]) -> Result<DecodedStream> {
        self.reset();

        let info = self.info().clone();
        let frame_size = info.frame_size;
        if data.len() % frame_size != 0 {
            bail!(FrameError::SizeMismatch {
                expected: frame_size,
                actual: data.len() % frame_size,
            });
        }

        let skip = info.inserted_samples;
        let wanted = info.sample_count();
        let mut pcm = vec![Vec::with_capacity(wanted); info.channel_count];

        for frame in data.chunks_exact(frame_size).take(info.frame_count) {
            let decoded = self.decode_frame(frame)?;

            let frame_start = decoded.frame_index * SAMPLES_PER_FRAME;
            let from = skip.saturating_sub(frame_start).min(SAMPLES_PER_FRAME);
            let to = (skip + wanted)
                .saturating_sub(frame_start)
                .min(SAMPLES_PER_FRAME);
            if from >= to {
                continue;
            }

            for (out, samples) in pcm.iter_mut().zip(decoded.pcm.iter()) {
                out.extend_from_slice(&samples[from..to]);
            }
        }

        debug!(
            "Decoded {} frames into {} samples per channel",
            self.state.frame_index,
            pcm.first().map_or(0, Vec::len)
        );

        Ok(DecodedStream {
            sample_rate: info.sample_rate,
            loop_start: info.loop_start_sample(),
            loop_end: info.loop_end_sample(),
            pcm,
        })
    }

    /// Sets the key used to decrypt frames. `None` disables decryption.
    pub fn set_key(&mut self, key: Option<Key>) {
        self.state.key = key;
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on CRC mismatches as well (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    /// Enables or disables the per-frame CRC check (enabled by default).
    pub fn set_verify_crc(&mut self, verify: bool) {
        self.state.verify_crc = verify;
    }

    /// Discards overlap state so the next frame is decoded as the first of a stream.
    pub fn reset(&mut self) {
        let info = self.state.frame.info.clone();
        self.state.frame = Frame::new(&info);
        self.state.frame_index = 0;
    }
}

/// PCM for one frame, one 1024-sample buffer per channel.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Index of the frame within the stream, counted from the last reset.
    pub frame_index: usize,
    pub pcm: Vec<[i16; SAMPLES_PER_FRAME]>,
}

/// PCM for a whole stream with padding removed.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    pub sample_rate: u32,
    /// Loop range in output samples, when the stream loops.
    pub loop_start: Option<usize>,
    pub loop_end: Option<usize>,
    /// One buffer per channel.
    pub pcm: Vec<Vec<i16>>,
}

/// Converts a float sample to 16-bit with round-half-up and clamping.
#[inline(always)]
pub fn pcm_from_float(value: f32) -> i16 {
    (value * 32768.0 + 0.5)
        .floor()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub struct DecoderState {
    pub frame: Frame,
    pub key: Option<Key>,
    pub fail_level: log::Level,
    pub verify_crc: bool,
    pub frame_index: usize,
    buffer: Vec<u8>,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self {
            frame: Frame::new(&StreamInfo::default()),
            key: None,
            fail_level: log::Level::Error,
            verify_crc: true,
            frame_index: 0,
            buffer: Vec::new(),
        }
    }
}

impl DecoderState {
    fn decode_frame(&mut self, data: &[u8]) -> Result<()> {
        let frame_size = self.frame.info.frame_size;
        if data.len() != frame_size {
            bail!(FrameError::SizeMismatch {
                expected: frame_size,
                actual: data.len(),
            });
        }

        let index = self.frame_index;

        if self.verify_crc {
            let (body, tail) = data.split_at(frame_size - 2);
            let calculated = FRAME_CRC.checksum(body);
            let read = u16::from_be_bytes([tail[0], tail[1]]);
            if calculated != read {
                log_or_err!(
                    self,
                    Warn,
                    anyhow!(FrameError::CrcMismatch {
                        frame: index,
                        calculated,
                        read,
                    })
                );
            }
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        match (&self.key, self.frame.info.encryption) {
            (Some(key), _) => key.decrypt(&mut self.buffer[..frame_size - 2]),
            (None, EncryptionType::None) => {}
            (None, _) => bail!(StreamError::MissingKey),
        }

        if !self.frame.unpack(&self.buffer)? {
            bail!(FrameError::ValidityCheckFailed(index));
        }

        trace!(
            "Frame {index}: noise level {}, evaluation boundary {}",
            self.frame.noise_level, self.frame.evaluation_boundary
        );

        self.frame.dequantize();
        self.frame.reconstruct_high_frequency();
        self.frame.apply_intensity_stereo();
        self.frame.run_imdct();
        self.frame_index += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_rounding() {
        assert_eq!(pcm_from_float(0.0), 0);
        assert_eq!(pcm_from_float(0.5 / 32768.0), 1);
        assert_eq!(pcm_from_float(-0.5 / 32768.0), 0);
        assert_eq!(pcm_from_float(-1.5 / 32768.0), -1);
        assert_eq!(pcm_from_float(1.0), i16::MAX);
        assert_eq!(pcm_from_float(-2.0), i16::MIN);
    }

    #[test]
    fn test_size_mismatch() {
        let mut decoder = Decoder::default();
        let err = decoder.decode_frame(&[0xFF; 10]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::SizeMismatch {
                expected: 0x155,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_empty_frame_decodes_to_silence() {
        let info = StreamInfo {
            frame_count: 1,
            ..Default::default()
        };
        let data = Frame::new(&info).pack(None).unwrap();

        let mut decoder = Decoder::new(&info).unwrap();
        let decoded = decoder.decode_frame(&data).unwrap();
        assert_eq!(decoded.frame_index, 0);
        assert_eq!(decoded.pcm.len(), 1);
        assert!(decoded.pcm[0].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_crc_mismatch_fail_level() {
        let info = StreamInfo {
            frame_count: 1,
            ..Default::default()
        };
        let mut data = Frame::new(&info).pack(None).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;

        let mut decoder = Decoder::new(&info).unwrap();
        assert!(decoder.decode_frame(&data).is_ok());

        decoder.set_fail_level(log::Level::Warn);
        let err = decoder.decode_frame(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::CrcMismatch { frame: 1, .. })
        ));

        decoder.set_verify_crc(false);
        assert!(decoder.decode_frame(&data).is_ok());
    }

    #[test]
    fn test_rejected_frame_keeps_index() {
        let info = StreamInfo {
            frame_count: 2,
            ..Default::default()
        };
        let data = Frame::new(&info).pack(None).unwrap();
        let mut unsynced = data.clone();
        unsynced[0] = 0x00;

        let mut decoder = Decoder::new(&info).unwrap();
        decoder.set_verify_crc(false);
        assert!(decoder.decode_frame(&data[..10]).is_err());
        assert!(decoder.decode_frame(&unsynced).is_err());

        assert_eq!(decoder.decode_frame(&data).unwrap().frame_index, 0);
        assert_eq!(decoder.decode_frame(&data).unwrap().frame_index, 1);
    }

    #[test]
    fn test_keyed_stream_requires_key() {
        let info = StreamInfo {
            frame_count: 1,
            encryption: EncryptionType::Keyed,
            ..Default::default()
        };
        let data = Frame::new(&info).pack(None).unwrap();

        let mut decoder = Decoder::new(&info).unwrap();
        let err = decoder.decode_frame(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::MissingKey)
        ));
    }
}
