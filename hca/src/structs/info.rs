//! Stream-level parameters.
//!
//! A [`StreamInfo`] is supplied by the container layer (or produced by the
//! encoder) and stays fixed for the lifetime of a stream.

use anyhow::{Result, bail};

use crate::process::{
    MAX_CHANNELS, MAX_HFR_GROUPS, SAMPLES_PER_FRAME, VERSION_V101, VERSION_V102, VERSION_V103,
    VERSION_V200, VERSION_V300,
};
use crate::utils::errors::StreamError;
use crate::utils::tables::BAND_COUNT;

/// Frame cipher applied to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionType {
    #[default]
    None,
    /// Fixed type 1 table.
    Type1,
    /// Table derived from a key code (type 56).
    Keyed,
}

impl EncryptionType {
    /// Maps the container's cipher type field.
    pub fn from_cipher_type(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Type1),
            56 => Some(Self::Keyed),
            _ => None,
        }
    }

    pub fn cipher_type(&self) -> u16 {
        match self {
            Self::None => 0,
            Self::Type1 => 1,
            Self::Keyed => 56,
        }
    }
}

/// Loop markers in frames plus intra-frame sample offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    pub start_frame: usize,
    pub end_frame: usize,
    pub pre_loop_samples: usize,
    pub post_loop_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub version: u16,
    pub channel_count: usize,
    pub sample_rate: u32,
    pub frame_count: usize,
    /// Leading samples to discard after decoding.
    pub inserted_samples: usize,
    /// Trailing padding samples in the last frame.
    pub appended_samples: usize,
    pub frame_size: usize,
    pub min_resolution: u8,
    pub max_resolution: u8,
    pub track_count: usize,
    pub channel_config: u8,
    pub total_band_count: usize,
    pub base_band_count: usize,
    pub stereo_band_count: usize,
    pub bands_per_hfr_group: usize,
    pub loop_info: Option<LoopInfo>,
    pub use_ath_curve: bool,
    pub encryption: EncryptionType,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            version: VERSION_V200,
            channel_count: 1,
            sample_rate: 48000,
            frame_count: 0,
            inserted_samples: 0,
            appended_samples: 0,
            frame_size: 0x155,
            min_resolution: 1,
            max_resolution: 15,
            track_count: 1,
            channel_config: 0,
            total_band_count: BAND_COUNT,
            base_band_count: BAND_COUNT,
            stereo_band_count: 0,
            bands_per_hfr_group: 0,
            loop_info: None,
            use_ath_curve: false,
            encryption: EncryptionType::None,
        }
    }
}

impl StreamInfo {
    /// Bands rebuilt from lower bands instead of being coded.
    pub fn hfr_band_count(&self) -> usize {
        self.total_band_count
            .saturating_sub(self.base_band_count + self.stereo_band_count)
    }

    pub fn hfr_group_count(&self) -> usize {
        if self.bands_per_hfr_group == 0 {
            return 0;
        }
        self.hfr_band_count().div_ceil(self.bands_per_hfr_group)
    }

    /// Playable samples per channel after removing padding.
    pub fn sample_count(&self) -> usize {
        (self.frame_count * SAMPLES_PER_FRAME)
            .saturating_sub(self.inserted_samples + self.appended_samples)
    }

    pub fn channels_per_track(&self) -> usize {
        if self.track_count == 0 {
            return self.channel_count;
        }
        self.channel_count / self.track_count
    }

    /// First looped sample, counted from the start of the playable audio.
    pub fn loop_start_sample(&self) -> Option<usize> {
        self.loop_info.map(|l| {
            (l.start_frame * SAMPLES_PER_FRAME + l.pre_loop_samples)
                .saturating_sub(self.inserted_samples)
        })
    }

    /// One past the last looped sample, counted from the start of the playable audio.
    pub fn loop_end_sample(&self) -> Option<usize> {
        self.loop_info.map(|l| {
            ((l.end_frame + 1) * SAMPLES_PER_FRAME)
                .saturating_sub(l.post_loop_samples + self.inserted_samples)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if ![
            VERSION_V101,
            VERSION_V102,
            VERSION_V103,
            VERSION_V200,
            VERSION_V300,
        ]
        .contains(&self.version)
        {
            bail!(StreamError::UnsupportedVersion(self.version));
        }

        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            bail!(StreamError::InvalidChannelCount(self.channel_count));
        }

        if self.sample_rate == 0 || self.sample_rate > 0x7F_FFFF {
            bail!(StreamError::InvalidSampleRate(self.sample_rate));
        }

        if self.frame_size < 8 || self.frame_size > 0xFFFF {
            bail!(StreamError::InvalidFrameSize(self.frame_size));
        }

        if self.min_resolution > self.max_resolution || self.max_resolution > 15 {
            bail!(StreamError::InvalidResolutionRange {
                min: self.min_resolution,
                max: self.max_resolution,
            });
        }

        if self.track_count == 0 || self.channel_count % self.track_count != 0 {
            bail!(StreamError::InvalidTrackCount {
                tracks: self.track_count,
                channels: self.channel_count,
            });
        }

        if self.total_band_count == 0
            || self.total_band_count > BAND_COUNT
            || self.base_band_count + self.stereo_band_count > self.total_band_count
        {
            bail!(StreamError::InvalidBandCounts {
                total: self.total_band_count,
                base: self.base_band_count,
                stereo: self.stereo_band_count,
            });
        }

        let groups = self.hfr_group_count();
        if groups > MAX_HFR_GROUPS {
            bail!(StreamError::TooManyHfrGroups { groups });
        }

        let padding = self.inserted_samples + self.appended_samples;
        if padding > self.frame_count * SAMPLES_PER_FRAME {
            bail!(StreamError::InvalidPadding { padding });
        }

        if let Some(l) = self.loop_info
            && (l.start_frame > l.end_frame || l.end_frame >= self.frame_count)
        {
            bail!(StreamError::InvalidLoop {
                start: l.start_frame,
                end: l.end_frame,
                frames: self.frame_count,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_counts() {
        let info = StreamInfo {
            total_band_count: 128,
            base_band_count: 60,
            stereo_band_count: 20,
            bands_per_hfr_group: 6,
            frame_count: 10,
            inserted_samples: 128,
            appended_samples: 100,
            ..Default::default()
        };

        assert_eq!(info.hfr_band_count(), 48);
        assert_eq!(info.hfr_group_count(), 8);
        assert_eq!(info.sample_count(), 10 * 1024 - 228);
        info.validate().unwrap();

        let no_groups = StreamInfo {
            bands_per_hfr_group: 0,
            ..info.clone()
        };
        assert_eq!(no_groups.hfr_group_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let base = StreamInfo {
            frame_count: 4,
            ..Default::default()
        };
        base.validate().unwrap();

        let bad_bands = StreamInfo {
            base_band_count: 100,
            stereo_band_count: 40,
            ..base.clone()
        };
        let err = bad_bands.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::InvalidBandCounts { .. })
        ));

        let too_many_groups = StreamInfo {
            base_band_count: 32,
            bands_per_hfr_group: 1,
            ..base.clone()
        };
        assert!(too_many_groups.validate().is_err());

        let bad_version = StreamInfo {
            version: 0x0400,
            ..base.clone()
        };
        assert!(bad_version.validate().is_err());

        let bad_loop = StreamInfo {
            loop_info: Some(LoopInfo {
                start_frame: 2,
                end_frame: 4,
                pre_loop_samples: 0,
                post_loop_samples: 0,
            }),
            ..base
        };
        assert!(bad_loop.validate().is_err());
    }

    #[test]
    fn test_loop_samples() {
        let info = StreamInfo {
            frame_count: 8,
            inserted_samples: 1024 + 128,
            loop_info: Some(LoopInfo {
                start_frame: 2,
                end_frame: 6,
                pre_loop_samples: 128,
                post_loop_samples: 24,
            }),
            ..Default::default()
        };

        assert_eq!(info.loop_start_sample(), Some(1024));
        assert_eq!(info.loop_end_sample(), Some(7 * 1024 - 24 - 1152));
    }
}
