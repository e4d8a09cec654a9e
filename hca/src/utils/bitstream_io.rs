//! Bitstream I/O utilities for frame packing and unpacking.
//!
//! All fields are packed most significant bit first. The reader supports
//! non-advancing peeks that zero-extend past the end of the buffer, which the
//! variable-length coefficient codes rely on near the end of a frame.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    /// Reads `n` bits (at most 32) as an unsigned value.
    #[inline(always)]
    pub fn get_n(&mut self, n: u32) -> io::Result<u32> {
        if n == 0 {
            return Ok(0);
        }

        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Reads an `n`-bit offset-binary value, biased by `(1 << (n - 1)) - 1`.
    #[inline(always)]
    pub fn get_offset_binary(&mut self, n: u32) -> io::Result<i32> {
        let bias = (1i32 << (n - 1)) - 1;
        Ok(self.get_n(n)? as i32 - bias)
    }

    /// Reads `n` bits without advancing. Bits past the end of the buffer read as zero.
    #[inline(always)]
    pub fn peek_n(&mut self, n: u32) -> io::Result<u32> {
        if n == 0 {
            return Ok(0);
        }

        let position = self.position()?;
        let take = (n as u64).min(self.len.saturating_sub(position)) as u32;
        if take == 0 {
            return Ok(0);
        }

        let value: u32 = self.bs.read_unsigned_var(take)?;
        self.bs.seek_bits(SeekFrom::Start(position))?;

        Ok(((value as u64) << (n - take)) as u32)
    }

    #[inline(always)]
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        if (offset < 0 && self.position()? as i64 + offset >= 0)
            || (offset >= 0 && self.available()? as i64 >= offset)
        {
            return self.bs.seek_bits(SeekFrom::Current(offset));
        }

        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "seek({}): out of bounds bits at {}",
                offset,
                self.position()?
            ),
        ))
    }

    /// Advances to the next bit position divisible by `multiple`.
    #[inline(always)]
    pub fn align(&mut self, multiple: u64) -> io::Result<()> {
        let position = self.position()?;
        let rem = position % multiple;
        if rem != 0 {
            self.seek((multiple - rem) as i64)?;
        }

        Ok(())
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        self.available().and_then(|avail| {
            if n as u64 > avail {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "skip_n: out of bounds bits",
                ))
            } else {
                self.bs.skip(n)
            }
        })
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

/// MSB-first bit writer into a growable byte buffer.
pub struct BitstreamIoWriter {
    bs: BitWriter<Vec<u8>, BigEndian>,
    position: u64,
}

impl BitstreamIoWriter {
    pub fn with_capacity(len_bytes: usize) -> Self {
        Self {
            bs: BitWriter::new(Vec::with_capacity(len_bytes)),
            position: 0,
        }
    }

    #[inline(always)]
    pub fn put(&mut self, bit: bool) -> io::Result<()> {
        self.bs.write_bit(bit)?;
        self.position += 1;
        Ok(())
    }

    /// Writes the low `n` bits (at most 32) of `value`.
    #[inline(always)]
    pub fn put_n(&mut self, n: u32, value: u32) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        self.bs.write_unsigned_var(n, value).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "put_n({}, {}): value does not fit at bit {}",
                    n, value, self.position
                ),
            )
        })?;
        self.position += n as u64;

        Ok(())
    }

    /// Zero-fills up to the next bit position divisible by `multiple`.
    #[inline(always)]
    pub fn align(&mut self, multiple: u64) -> io::Result<()> {
        let rem = self.position % multiple;
        if rem == 0 {
            return Ok(());
        }

        let mut pad = multiple - rem;
        while pad > 0 {
            let n = pad.min(32) as u32;
            self.put_n(n, 0)?;
            pad -= n as u64;
        }

        Ok(())
    }

    /// Appends `len` copies of `value`; the writer must be byte aligned.
    pub fn fill_bytes(&mut self, value: u8, len: usize) -> io::Result<()> {
        if self.position & 7 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fill_bytes: writer is not byte aligned",
            ));
        }

        self.bs.write_bytes(&vec![value; len])?;
        self.position += (len as u64) << 3;

        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Flushes any partial byte with zero bits and returns the written bytes.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        self.bs.byte_align()?;
        Ok(self.bs.into_writer())
    }
}

impl Default for BitstreamIoWriter {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[test]
fn test_put_get_every_width() {
    let mut writer = BitstreamIoWriter::default();
    let mut expected = Vec::new();
    for n in 1..=32u32 {
        let max = if n == 32 { u32::MAX } else { (1u32 << n) - 1 };
        for value in [0, 1, max, max / 3, max >> 1] {
            writer.put_n(n, value).unwrap();
            expected.push((n, value));
        }
    }
    let bytes = writer.into_bytes().unwrap();

    let mut reader = BsIoSliceReader::from_slice(&bytes);
    for (n, value) in expected {
        assert_eq!(reader.get_n(n).unwrap(), value, "width {n}");
    }
}

#[test]
fn test_put_n_rejects_wide_values() {
    let mut writer = BitstreamIoWriter::default();
    assert!(writer.put_n(3, 8).is_err());
    assert!(writer.put_n(4, 15).is_ok());
}

#[test]
fn test_peek_zero_extends() {
    let data = [0b1011_0110u8, 0b1100_0000];
    let mut reader = BsIoSliceReader::from_slice(&data);

    assert_eq!(reader.peek_n(4).unwrap(), 0b1011);
    assert_eq!(reader.position().unwrap(), 0);

    reader.skip_n(12).unwrap();
    assert_eq!(reader.peek_n(8).unwrap(), 0b0000_0000);
    reader.seek(-4).unwrap();
    assert_eq!(reader.peek_n(8).unwrap(), 0b1100_0000);

    reader.skip_n(8).unwrap();
    assert_eq!(reader.available().unwrap(), 0);
    assert_eq!(reader.peek_n(32).unwrap(), 0);
    assert!(reader.get_n(1).is_err());
}

#[test]
fn test_offset_binary() {
    let mut writer = BitstreamIoWriter::default();
    writer.put_n(3, 0).unwrap();
    writer.put_n(3, 3).unwrap();
    writer.put_n(3, 7).unwrap();
    let bytes = writer.into_bytes().unwrap();

    let mut reader = BsIoSliceReader::from_slice(&bytes);
    assert_eq!(reader.get_offset_binary(3).unwrap(), -3);
    assert_eq!(reader.get_offset_binary(3).unwrap(), 0);
    assert_eq!(reader.get_offset_binary(3).unwrap(), 4);
}

#[test]
fn test_align_and_fill() {
    let mut writer = BitstreamIoWriter::default();
    writer.put_n(5, 0b10101).unwrap();
    writer.align(8).unwrap();
    assert_eq!(writer.position(), 8);
    writer.fill_bytes(0xAB, 2).unwrap();
    assert_eq!(writer.into_bytes().unwrap(), vec![0b1010_1000, 0xAB, 0xAB]);

    let data = [0u8; 4];
    let mut reader = BsIoSliceReader::from_slice(&data);
    reader.skip_n(3).unwrap();
    reader.align(16).unwrap();
    assert_eq!(reader.position().unwrap(), 16);
    reader.align(16).unwrap();
    assert_eq!(reader.position().unwrap(), 16);
}
