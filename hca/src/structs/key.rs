//! Frame cipher keys.
//!
//! Encrypted streams substitute every frame byte through a 256-entry table.
//! Values 0x00 and 0xFF always map to themselves, so the sync word and zero
//! padding survive encryption. Three table derivations exist:
//!
//! - **Type 0**: identity table.
//! - **Type 1**: a fixed permutation from a linear congruential sequence.
//! - **Keyed**: a table derived from a 56-bit key code.

use std::fmt;
use std::sync::LazyLock;

/// How a key's tables were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Type0,
    Type1,
    Code(u64),
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Type0 => write!(f, "type 0"),
            KeyKind::Type1 => write!(f, "type 1"),
            KeyKind::Code(code) => write!(f, "key code {code:#016X}"),
        }
    }
}

/// A pair of inverse byte substitution tables.
#[derive(Clone)]
pub struct Key {
    kind: KeyKind,
    decryption: [u8; 256],
    encryption: [u8; 256],
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("kind", &self.kind).finish()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.decryption == other.decryption
    }
}

impl Eq for Key {}

/// Sixteen-nibble sequences for every seed byte.
static NIBBLE_ROWS: LazyLock<[[u8; 16]; 256]> =
    LazyLock::new(|| std::array::from_fn(|seed| nibble_row(seed as u8)));

fn nibble_row(seed: u8) -> [u8; 16] {
    let mul = ((seed & 1) << 3) | 5;
    let add = (seed & 0xE) | 1;
    let mut value = seed >> 4;

    std::array::from_fn(|_| {
        value = (value.wrapping_mul(mul).wrapping_add(add)) & 0xF;
        value
    })
}

impl Key {
    pub fn new(kind: KeyKind) -> Self {
        let decryption = match kind {
            KeyKind::Type0 => std::array::from_fn(|i| i as u8),
            KeyKind::Type1 => type1_table(),
            KeyKind::Code(code) => code_table(code),
        };

        let mut encryption = [0u8; 256];
        for (i, &value) in decryption.iter().enumerate() {
            encryption[value as usize] = i as u8;
        }

        Self {
            kind,
            decryption,
            encryption,
        }
    }

    pub fn from_code(code: u64) -> Self {
        Self::new(KeyKind::Code(code))
    }

    /// Key for streams whose container mixes a 16-bit subkey into the code.
    pub fn with_subkey(code: u64, subkey: u16) -> Self {
        if subkey == 0 {
            return Self::from_code(code);
        }

        let mixer = ((subkey as u64) << 16) | (u64::from(!subkey) + 2);
        Self::from_code(code.wrapping_mul(mixer))
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn decryption_table(&self) -> &[u8; 256] {
        &self.decryption
    }

    pub fn encryption_table(&self) -> &[u8; 256] {
        &self.encryption
    }

    pub fn decrypt(&self, data: &mut [u8]) {
        for byte in data {
            *byte = self.decryption[*byte as usize];
        }
    }

    pub fn encrypt(&self, data: &mut [u8]) {
        for byte in data {
            *byte = self.encryption[*byte as usize];
        }
    }
}

fn type1_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut value = 0u8;
    for entry in table.iter_mut().take(255).skip(1) {
        value = value.wrapping_mul(13).wrapping_add(11);
        if value == 0 || value == 0xFF {
            value = value.wrapping_mul(13).wrapping_add(11);
        }
        *entry = value;
    }
    table[255] = 0xFF;

    table
}

fn code_table(code: u64) -> [u8; 256] {
    let code = code.saturating_sub(1);
    let kc: [u8; 7] = std::array::from_fn(|i| (code >> (i * 8)) as u8);

    let seeds = [
        kc[1],
        kc[1] ^ kc[6],
        kc[2] ^ kc[3],
        kc[2],
        kc[2] ^ kc[1],
        kc[3] ^ kc[4],
        kc[3],
        kc[3] ^ kc[2],
        kc[4] ^ kc[5],
        kc[4],
        kc[4] ^ kc[3],
        kc[5] ^ kc[6],
        kc[5],
        kc[5] ^ kc[4],
        kc[6] ^ kc[1],
        kc[6],
    ];

    let rows = &*NIBBLE_ROWS;
    let high = rows[kc[0] as usize];
    let mut combined = [0u8; 256];
    for (r, seed) in seeds.iter().enumerate() {
        let low = rows[*seed as usize];
        for c in 0..16 {
            combined[r * 16 + c] = (high[r] << 4) | low[c];
        }
    }

    let mut table = [0u8; 256];
    let mut x = 0u8;
    let mut pos = 1;
    for _ in 0..256 {
        x = x.wrapping_add(17);
        let value = combined[x as usize];
        if value != 0 && value != 0xFF && pos < 255 {
            table[pos] = value;
            pos += 1;
        }
    }
    table[255] = 0xFF;

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds() -> Vec<KeyKind> {
        vec![
            KeyKind::Type0,
            KeyKind::Type1,
            KeyKind::Code(0),
            KeyKind::Code(1),
            KeyKind::Code(0xCF222F1FE0748978),
            KeyKind::Code(0x30DBE1AB),
            KeyKind::Code(12345),
        ]
    }

    #[test]
    fn test_tables_are_inverse_permutations() {
        for kind in kinds() {
            let key = Key::new(kind);
            for i in 0..256 {
                let b = i as u8;
                assert_eq!(key.encryption[key.decryption[i] as usize], b, "{kind}");
                assert_eq!(key.decryption[key.encryption[i] as usize], b, "{kind}");
            }
            assert_eq!(key.decryption[0], 0);
            assert_eq!(key.decryption[0xFF], 0xFF);
        }
    }

    #[test]
    fn test_reference_tables() {
        let type1 = Key::new(KeyKind::Type1);
        assert_eq!(type1.decryption[..8], [0, 11, 154, 221, 68, 127, 126, 113]);

        let keyed = Key::from_code(0xCF222F1FE0748978);
        assert_eq!(keyed.decryption[..8], [0, 20, 64, 179, 108, 93, 129, 241]);
        assert_eq!(keyed.decryption[250..], [49, 224, 218, 10, 33, 255]);

        assert_eq!(Key::from_code(0), Key::from_code(1));
        assert_eq!(Key::from_code(1).decryption[..4], [0, 102, 204, 221]);
    }

    #[test]
    fn test_subkey_mixing() {
        assert_eq!(
            Key::with_subkey(0xCF222F1FE0748978, 0x1234),
            Key::from_code(0x544208A8FCF62D18)
        );
        assert_eq!(Key::with_subkey(77, 0), Key::from_code(77));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = Key::from_code(0x30DBE1AB);
        let original: Vec<u8> = (0..=255).collect();
        let mut data = original.clone();
        key.encrypt(&mut data);
        assert_ne!(data, original);
        key.decrypt(&mut data);
        assert_eq!(data, original);
    }
}
