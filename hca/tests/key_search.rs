mod common;

use common::{EXAMPLE_KEY_CODE, init_logging, noise};

use hca::process::encode::{Encoder, EncoderConfig};
use hca::process::key_search::{find_key, key_matches};
use hca::structs::info::StreamInfo;
use hca::utils::errors::StreamError;
use hca::structs::key::{Key, KeyKind};

fn encoded_noise(key: Option<Key>) -> (StreamInfo, Vec<u8>) {
    let pcm = vec![noise(11, 12000), noise(12, 12000)];
    let config = EncoderConfig {
        key,
        ..Default::default()
    };
    let mut encoder = Encoder::new(2, 44100, 12000, &config).unwrap();
    let frames = encoder.encode_stream(&pcm).unwrap();
    (encoder.info().clone(), frames)
}

#[test]
fn test_finds_catalogue_key() {
    init_logging();
    let (info, frames) = encoded_noise(Some(Key::from_code(EXAMPLE_KEY_CODE)));

    let found = find_key(&info, &frames, &[1, EXAMPLE_KEY_CODE, 3]).unwrap();
    assert_eq!(
        found.map(|key| key.kind()),
        Some(KeyKind::Code(EXAMPLE_KEY_CODE))
    );
}

#[test]
fn test_unmatched_catalogue() {
    let (info, frames) = encoded_noise(Some(Key::from_code(EXAMPLE_KEY_CODE)));
    let found = find_key(&info, &frames, &[1, 2, 0x0123_4567_89AB_CDEF]).unwrap();
    assert!(found.is_none());
}

#[test]
fn test_fixed_tables() {
    let (info, frames) = encoded_noise(None);
    let found = find_key(&info, &frames, &[]).unwrap();
    assert_eq!(found.map(|key| key.kind()), Some(KeyKind::Type0));

    let (info, frames) = encoded_noise(Some(Key::new(KeyKind::Type1)));
    let found = find_key(&info, &frames, &[]).unwrap();
    assert_eq!(found.map(|key| key.kind()), Some(KeyKind::Type1));
}

#[test]
fn test_key_matches_rejects_wrong_key() {
    let key = Key::from_code(EXAMPLE_KEY_CODE);
    let (info, frames) = encoded_noise(Some(key.clone()));
    let chunks: Vec<&[u8]> = frames.chunks_exact(info.frame_size).take(4).collect();

    assert!(key_matches(&info, &chunks, &key));
    assert!(!key_matches(&info, &chunks, &Key::new(KeyKind::Type1)));
}

#[test]
fn test_invalid_band_split_is_an_error() {
    let (mut info, frames) = encoded_noise(None);
    info.base_band_count = 100;
    info.stereo_band_count = 40;

    let err = find_key(&info, &frames, &[EXAMPLE_KEY_CODE]).unwrap_err();
    assert!(err.downcast_ref::<StreamError>().is_some());
}
