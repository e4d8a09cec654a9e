/// Frame decoding to PCM samples.
///
/// Provides the [`Decoder`](decode::Decoder) for turning encoded frames into
/// 16-bit PCM, one buffer per channel.
pub mod decode;

/// PCM encoding to frames.
///
/// Provides the [`Encoder`](encode::Encoder) and its
/// [`EncoderConfig`](encode::EncoderConfig).
pub mod encode;

/// Stream parameter derivation from a quality tier or bitrate.
pub mod quality;

/// Brute-force identification of the key protecting a stream.
pub mod key_search;

/// Samples per channel in one frame.
pub const SAMPLES_PER_FRAME: usize = 1024;
/// Transform blocks per frame.
pub const SUBFRAMES: usize = 8;
pub const SAMPLES_PER_SUBFRAME: usize = 128;
/// log2 of [`SAMPLES_PER_SUBFRAME`].
pub const SUBFRAME_BITS: u32 = 7;

pub const MAX_CHANNELS: usize = 16;
pub const MAX_HFR_GROUPS: usize = 8;

pub const FRAME_SYNC: u32 = 0xFFFF;

pub const VERSION_V101: u16 = 0x0101;
pub const VERSION_V102: u16 = 0x0102;
pub const VERSION_V103: u16 = 0x0103;
pub const VERSION_V200: u16 = 0x0200;
pub const VERSION_V300: u16 = 0x0300;

const _: () = assert!(SUBFRAMES * SAMPLES_PER_SUBFRAME == SAMPLES_PER_FRAME);
const _: () = assert!(1 << SUBFRAME_BITS == SAMPLES_PER_SUBFRAME);
