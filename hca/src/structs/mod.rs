//! Data structures representing stream components.
//!
//! Contains the stream parameters, per-channel and per-frame state shared by
//! the decoder and encoder, and the cipher keys protecting frames.

pub mod channel;
pub mod frame;
pub mod info;
pub mod key;
