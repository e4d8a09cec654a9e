//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, CRC validation, lookup tables, the spectral
//! transform and error handling for frame processing.

pub mod bitstream_io;
pub mod crc;
pub mod errors;
pub mod mdct;
pub mod tables;
