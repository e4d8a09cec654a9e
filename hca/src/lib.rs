#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Encoder and decoder for CRI HCA, a fixed-frame-size lossy transform codec.
//!
//! ### Frame Organization
//!
//! Every frame holds 1024 samples per channel as 8 subframes of 128 MDCT
//! coefficients. Coefficients are grouped into 128 bands, each with a 6-bit
//! scale factor; the resolution of each band is derived from its scale factor
//! and two frame-wide parameters, the noise level and the evaluation boundary.
//!
//! ### Bandwidth Tools
//!
//! - **Intensity stereo**: channel pairs share the upper bands, split per
//!   subframe by a 4-bit intensity code
//! - **High frequency reconstruction**: the top bands are mirrored from the
//!   coded bands and scaled per group
//!
//! ### Encryption
//!
//! Frames may be protected by a byte substitution cipher. Keys come from a
//! 56-bit key code or one of two fixed tables, and
//! [`process::key_search::find_key`] can identify the key of a stream from a
//! list of candidate codes.
//!
//! ## Quick Start
//!
//! ```rust
//! use hca::process::decode::Decoder;
//! use hca::process::encode::{Encoder, EncoderConfig};
//!
//! let pcm: Vec<i16> = (0..4800)
//!     .map(|i| ((i as f32 * 0.0576).sin() * 8000.0) as i16)
//!     .collect();
//!
//! // Encode one channel at the default quality
//! let mut encoder = Encoder::new(1, 48000, pcm.len(), &EncoderConfig::default())?;
//! let frames = encoder.encode_stream(&[pcm])?;
//!
//! // Decode it back, with the encoder delay removed
//! let mut decoder = Decoder::new(encoder.info())?;
//! let decoded = decoder.decode_stream(&frames)?;
//! assert_eq!(decoded.pcm[0].len(), 4800);
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Processing functionality for HCA streams.
///
/// 1. **Decoding** ([`process::decode`]): Frames to 16-bit PCM.
///
/// 2. **Encoding** ([`process::encode`]): 16-bit PCM to frames, with stream
///    parameters from [`process::quality`].
///
/// 3. **Key Search** ([`process::key_search`]): Identifies the cipher key of
///    an encrypted stream.
pub mod process;

/// Data structures representing HCA stream components.
///
/// - **Stream Parameters** ([`structs::info`]): Layout shared by every frame
/// - **Channels** ([`structs::channel`]): Channel roles and side information
/// - **Frames** ([`structs::frame`]): Frame packing and unpacking
/// - **Keys** ([`structs::key`]): Frame cipher tables
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading/writing
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Lookup Tables** ([`utils::tables`]): Quantization and coding tables
/// - **Transform** ([`utils::mdct`]): MDCT with overlap state
pub mod utils;
