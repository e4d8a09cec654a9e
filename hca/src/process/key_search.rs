use anyhow::{Result, bail};
use log::{debug, trace};

use crate::structs::frame::Frame;
use crate::structs::info::StreamInfo;
use crate::structs::key::{Key, KeyKind};
use crate::utils::errors::KeyError;

/// Frames each candidate key must unpack.
pub const KEY_SEARCH_FRAMES: usize = 10;

/// Finds the key protecting `data`, a run of concatenated frames from the
/// start of the stream.
///
/// Candidates are the `catalogue` codes in order, followed by the type 0 and
/// type 1 tables. A candidate is accepted when every sampled frame unpacks
/// and passes the validity check. Leading silent frames are skipped since
/// they carry too little to tell keys apart.
pub fn find_key(info: &StreamInfo, data: &[u8], catalogue: &[u64]) -> Result<Option<Key>> {
    info.validate()?;

    let frame_size = info.frame_size;
    if frame_size < 4 {
        bail!(KeyError::NoFrames);
    }

    let frames: Vec<&[u8]> = data
        .chunks_exact(frame_size)
        .skip_while(|frame| frame[2..frame_size - 2].iter().all(|&b| b == 0))
        .take(KEY_SEARCH_FRAMES)
        .collect();
    if frames.is_empty() {
        bail!(KeyError::NoFrames);
    }

    let candidates: Vec<KeyKind> = catalogue
        .iter()
        .map(|&code| KeyKind::Code(code))
        .chain([KeyKind::Type0, KeyKind::Type1])
        .collect();

    debug!(
        "Testing {} candidate keys on {} frames",
        candidates.len(),
        frames.len()
    );

    #[cfg(feature = "parallel")]
    let found = {
        use rayon::prelude::*;
        candidates
            .par_iter()
            .map(|&kind| Key::new(kind))
            .find_first(|key| key_matches(info, &frames, key))
    };

    #[cfg(not(feature = "parallel"))]
    let found = candidates
        .iter()
        .map(|&kind| Key::new(kind))
        .find(|key| key_matches(info, &frames, key));

    match &found {
        Some(key) => debug!("Found {}", key.kind()),
        None => debug!("No candidate key matched"),
    }

    Ok(found)
}

/// Whether every frame unpacks cleanly after decryption with `key`.
///
/// `info` must already pass [`StreamInfo::validate`].
pub fn key_matches(info: &StreamInfo, frames: &[&[u8]], key: &Key) -> bool {
    let mut frame = Frame::new(info);
    let mut buffer = Vec::with_capacity(info.frame_size);

    frames.iter().enumerate().all(|(index, data)| {
        buffer.clear();
        buffer.extend_from_slice(data);
        let body = buffer.len().saturating_sub(2);
        key.decrypt(&mut buffer[..body]);

        match frame.unpack(&buffer) {
            Ok(valid) => valid,
            Err(err) => {
                trace!("{} rejected on frame {index}: {err}", key.kind());
                false
            }
        }
    })
}
