//! CRC validation for encoded frames.
//!
//! Every frame ends with a CRC-16 over all preceding bytes. The checksum is
//! the plain MSB-first variant: polynomial 0x8005, zero initial value, no
//! reflection and no final XOR.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-16 algorithm protecting each frame.
pub const CRC_FRAME_ALG: Algorithm<u16> = Algorithm {
    poly: 0x8005,
    init: 0x0000,
};

/// Shared frame checksum instance.
pub static FRAME_CRC: Crc16 = Crc16::new(&CRC_FRAME_ALG);

/// Shifts `len` bits through the CRC-16 register.
#[inline(always)]
pub const fn crc16(poly: u16, mut value: u16, len: usize) -> u16 {
    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 15) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc16(poly, (i as u16) << 8, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc16 {
    pub poly: u16,
    pub init: u16,
    table: [u16; 256],
}

impl Crc16 {
    pub const fn new(algorithm: &Algorithm<u16>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc16_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u16) -> u16 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u16, bytes: &[u8]) -> u16 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 8) ^ bytes[i] as u16);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u16 {
        self.update(self.init, bytes)
    }
}

#[test]
fn test_crc16_check_value() {
    assert_eq!(FRAME_CRC.checksum(b"123456789"), 0xFEE8);
    assert_eq!(FRAME_CRC.checksum(&[]), 0);
}

#[test]
fn test_crc16_table_head() {
    assert_eq!(FRAME_CRC.table[..4], [0x0000, 0x8005, 0x800F, 0x000A]);
}

#[test]
fn test_crc16_residue_is_zero() {
    let mut data = b"frame payload with trailing checksum".to_vec();
    let crc = FRAME_CRC.checksum(&data);
    data.extend_from_slice(&crc.to_be_bytes());

    assert_eq!(FRAME_CRC.checksum(&data), 0);
}
