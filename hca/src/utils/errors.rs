#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame sync word. Read {0:#06X}, expected 0xFFFF")]
    InvalidSync(u32),

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("CRC failed on frame {frame}. Calculated {calculated:#06X}, Read {read:#06X}")]
    CrcMismatch {
        frame: usize,
        calculated: u16,
        read: u16,
    },

    #[error("Intensity code out of range on channel {channel}: {value} > 15")]
    IntensityOutOfRange { channel: usize, value: i32 },

    #[error("Frame {0} failed the unpack validity check")]
    ValidityCheckFailed(usize),

    #[error("Frame content needs {needed} bits but only {available} are available")]
    FrameOverflow { needed: u64, available: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Unsupported bitstream version {0:#06X}")]
    UnsupportedVersion(u16),

    #[error("Channel count must be between 1 and 16. Got {0}")]
    InvalidChannelCount(usize),

    #[error("Sample rate must be between 1 and 0x7FFFFF. Got {0}")]
    InvalidSampleRate(u32),

    #[error("Frame size must be between 8 and 0xFFFF bytes. Got {0}")]
    InvalidFrameSize(usize),

    #[error("Resolution range invalid: min {min}, max {max}")]
    InvalidResolutionRange { min: u8, max: u8 },

    #[error("Track count {tracks} does not divide channel count {channels}")]
    InvalidTrackCount { tracks: usize, channels: usize },

    #[error(
        "Band counts inconsistent: total {total}, base {base}, stereo {stereo} (total must be <= 128 and >= base + stereo)"
    )]
    InvalidBandCounts {
        total: usize,
        base: usize,
        stereo: usize,
    },

    #[error("HFR needs {groups} groups, at most 8 are supported")]
    TooManyHfrGroups { groups: usize },

    #[error("Inserted and appended samples ({padding}) exceed the stream length")]
    InvalidPadding { padding: usize },

    #[error("Loop range invalid: frames {start}..={end} in a stream of {frames} frames")]
    InvalidLoop {
        start: usize,
        end: usize,
        frames: usize,
    },

    #[error("Loop points {start}..{end} do not fit a stream of {samples} samples")]
    InvalidLoopPoints {
        start: usize,
        end: usize,
        samples: usize,
    },

    #[error("Stream is encrypted but no key was provided")]
    MissingKey,
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("No noise level in 0..=255 fits {needed} bits into a {available} bit frame")]
    NoFittingNoiseLevel { needed: u64, available: u64 },

    #[error("Expected {expected} channels of PCM, got {actual}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("Channel {channel} has {actual} samples, expected {expected}")]
    SampleCountMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Bitrate {bitrate} yields an invalid frame size of {frame_size} bytes")]
    InvalidBitrate { bitrate: u32, frame_size: usize },

    #[error("All {0} frames of the stream have already been encoded")]
    StreamComplete(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("No frames available to test candidate keys")]
    NoFrames,
}
