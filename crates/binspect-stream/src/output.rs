//! Append-only bit sink
//!
//! Sub-byte writes accumulate in a pending byte. Big and middle endian fill
//! it from the most significant bit, little endian from the least
//! significant bit, mirroring how [`InputStream::read_bits`] numbers bits.
//! A partial last byte is padded with zero bits when the stream is closed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use binspect_core::bits::{self, mask};
use binspect_core::{Endian, Error, Result};

use crate::input::InputStream;

/// Bytes moved per read when copying from an input stream
const COPY_CHUNK: usize = 64 * 1024;

enum Sink {
    Memory(Vec<u8>),
    File(BufWriter<File>),
}

/// Output stream writing to memory or to a file
pub struct OutputStream {
    sink: Sink,
    /// Complete bytes emitted so far
    written: u64,
    pending: u8,
    pending_bits: u32,
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream {
    /// In-memory output
    pub fn new() -> Self {
        Self {
            sink: Sink::Memory(Vec::new()),
            written: 0,
            pending: 0,
            pending_bits: 0,
        }
    }

    /// Output to a newly created (or truncated) file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            written: 0,
            pending: 0,
            pending_bits: 0,
        })
    }

    /// Number of bits written so far
    pub fn size_bits(&self) -> u64 {
        self.written * 8 + u64::from(self.pending_bits)
    }

    /// `true` when the next write starts on a byte boundary
    pub fn is_aligned(&self) -> bool {
        self.pending_bits == 0
    }

    fn emit(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Memory(buf) => buf.extend_from_slice(data),
            Sink::File(writer) => writer.write_all(data)?,
        }
        self.written += data.len() as u64;
        Ok(())
    }

    fn push_bit(&mut self, bit: u64, endian: Endian) -> Result<()> {
        let bit = (bit & 1) as u8;
        match endian {
            Endian::Little => self.pending |= bit << self.pending_bits,
            Endian::Big | Endian::Middle => self.pending |= bit << (7 - self.pending_bits),
        }
        self.pending_bits += 1;
        if self.pending_bits == 8 {
            let byte = self.pending;
            self.pending = 0;
            self.pending_bits = 0;
            self.emit(&[byte])?;
        }
        Ok(())
    }

    /// Append the low `nbits` bits of `value`
    pub fn write_bits(&mut self, nbits: u32, value: u64, endian: Endian) -> Result<()> {
        if nbits > bits::MAX_BITS {
            return Err(Error::OutputStream {
                message: format!("can't write {} bits at once", nbits),
            });
        }
        if value & !mask(nbits) != 0 {
            return Err(Error::OutputStream {
                message: format!("value {} doesn't fit in {} bits", value, nbits),
            });
        }
        if nbits == 0 {
            return Ok(());
        }
        if self.is_aligned() && nbits % 8 == 0 && (endian != Endian::Middle || nbits % 16 == 0) {
            let raw = bits::long2raw(value, endian, (nbits / 8) as usize)?;
            return self.emit(&raw);
        }
        match endian {
            Endian::Big => {
                for i in (0..nbits).rev() {
                    self.push_bit(value >> i, endian)?;
                }
            }
            Endian::Little => {
                for i in 0..nbits {
                    self.push_bit(value >> i, endian)?;
                }
            }
            Endian::Middle => {
                return Err(Error::OutputStream {
                    message: format!(
                        "middle endian write of {} bits at bit {} is not word aligned",
                        nbits,
                        self.size_bits()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Append a single bit
    pub fn write_bit(&mut self, state: bool, endian: Endian) -> Result<()> {
        self.write_bits(1, u64::from(state), endian)
    }

    /// Append raw bytes
    ///
    /// At an unaligned position each byte is written most significant bit
    /// first.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.is_aligned() {
            return self.emit(data);
        }
        for &byte in data {
            self.write_bits(8, u64::from(byte), Endian::Big)?;
        }
        Ok(())
    }

    /// Append an integer of `nbytes` bytes, checking its range
    pub fn write_integer(&mut self, value: i128, signed: bool, nbytes: usize, endian: Endian) -> Result<()> {
        if !(1..=8).contains(&nbytes) {
            return Err(Error::OutputStream {
                message: format!("can't write an integer of {} bytes", nbytes),
            });
        }
        let nbits = nbytes as u32 * 8;
        let (min, max) = if signed {
            (-(1i128 << (nbits - 1)), (1i128 << (nbits - 1)) - 1)
        } else {
            (0, (1i128 << nbits) - 1)
        };
        if value < min || value > max {
            return Err(Error::OutputStream {
                message: format!("integer {} out of range [{}, {}]", value, min, max),
            });
        }
        self.write_bits(nbits, (value as u64) & mask(nbits), endian)
    }

    /// Append `nbits` bits of `source` starting at bit `offset`
    ///
    /// Whole bytes are copied directly when both sides are aligned; other
    /// ranges are shifted through 64-bit reads.
    pub fn copy_bits_from<S>(&mut self, source: &S, offset: u64, nbits: u64, endian: Endian) -> Result<()>
    where
        S: InputStream + ?Sized,
    {
        let endian = match endian {
            Endian::Middle => Endian::Big,
            other => other,
        };
        let mut offset = offset;
        let mut remaining = nbits;
        if self.is_aligned() && offset % 8 == 0 {
            while remaining >= 8 {
                let nbytes = ((remaining / 8) as usize).min(COPY_CHUNK);
                let data = source.read_bytes(offset, nbytes)?;
                self.emit(&data)?;
                offset += nbytes as u64 * 8;
                remaining -= nbytes as u64 * 8;
            }
        }
        while remaining > 0 {
            let count = remaining.min(u64::from(bits::MAX_BITS)) as u32;
            let value = source.read_bits(offset, count, endian)?;
            self.write_bits(count, value, endian)?;
            offset += u64::from(count);
            remaining -= u64::from(count);
        }
        Ok(())
    }

    /// Append `nbytes` bytes of `source` starting at bit `offset`
    pub fn copy_bytes_from<S>(&mut self, source: &S, offset: u64, nbytes: u64) -> Result<()>
    where
        S: InputStream + ?Sized,
    {
        self.copy_bits_from(source, offset, nbytes * 8, Endian::Big)
    }

    fn pad(&mut self) -> Result<()> {
        if self.pending_bits != 0 {
            let byte = self.pending;
            self.pending = 0;
            self.pending_bits = 0;
            self.emit(&[byte])?;
        }
        Ok(())
    }

    /// Close an in-memory stream and return its content
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.pad()?;
        match self.sink {
            Sink::Memory(buf) => Ok(buf),
            Sink::File(_) => Err(Error::OutputStream {
                message: "file output has no in-memory content".to_string(),
            }),
        }
    }

    /// Pad, flush and close the stream, returning the number of bytes written
    pub fn finish(mut self) -> Result<u64> {
        self.pad()?;
        if let Sink::File(writer) = &mut self.sink {
            writer.flush()?;
        }
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MemoryStream;

    #[test]
    fn test_big_endian_bits() {
        let mut out = OutputStream::new();
        out.write_bits(3, 0b101, Endian::Big).unwrap();
        out.write_bits(5, 0b00001, Endian::Big).unwrap();
        out.write_bits(4, 0xF, Endian::Big).unwrap();
        assert_eq!(out.size_bits(), 12);
        assert_eq!(out.into_bytes().unwrap(), vec![0b1010_0001, 0xF0]);
    }

    #[test]
    fn test_little_endian_bits_match_reader() {
        let mut out = OutputStream::new();
        out.write_bit(true, Endian::Little).unwrap();
        out.write_bits(3, 0b110, Endian::Little).unwrap();
        out.write_bits(4, 0b1001, Endian::Little).unwrap();
        let data = out.into_bytes().unwrap();
        let stream = MemoryStream::new(data);
        assert_eq!(stream.read_bits(0, 1, Endian::Little).unwrap(), 1);
        assert_eq!(stream.read_bits(1, 3, Endian::Little).unwrap(), 0b110);
        assert_eq!(stream.read_bits(4, 4, Endian::Little).unwrap(), 0b1001);
    }

    #[test]
    fn test_write_integer_ranges() {
        let mut out = OutputStream::new();
        out.write_integer(-1, true, 2, Endian::Little).unwrap();
        out.write_integer(0x1234, false, 2, Endian::Big).unwrap();
        assert!(out.write_integer(256, false, 1, Endian::Big).is_err());
        assert!(out.write_integer(-129, true, 1, Endian::Big).is_err());
        assert!(out.write_integer(-1, false, 1, Endian::Big).is_err());
        assert_eq!(out.into_bytes().unwrap(), vec![0xFF, 0xFF, 0x12, 0x34]);
    }

    #[test]
    fn test_middle_endian_integer() {
        let mut out = OutputStream::new();
        out.write_integer(0x3412_7856, false, 4, Endian::Middle).unwrap();
        assert_eq!(out.into_bytes().unwrap(), vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_copy_unaligned() {
        let source = MemoryStream::new(vec![0xAB, 0xCD, 0xEF]);
        let mut out = OutputStream::new();
        out.write_bits(4, 0xA, Endian::Big).unwrap();
        out.copy_bits_from(&source, 4, 20, Endian::Big).unwrap();
        assert_eq!(out.into_bytes().unwrap(), vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_copy_bytes_aligned() {
        let source = MemoryStream::new(b"hello world".to_vec());
        let mut out = OutputStream::new();
        out.copy_bytes_from(&source, 48, 5).unwrap();
        assert_eq!(out.into_bytes().unwrap(), b"world".to_vec());
    }

    #[test]
    fn test_padding_on_close() {
        let mut out = OutputStream::new();
        out.write_bytes(b"A").unwrap();
        out.write_bits(1, 1, Endian::Big).unwrap();
        assert_eq!(out.into_bytes().unwrap(), vec![b'A', 0x80]);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut out = OutputStream::new();
        out.write_bits(4, 0x1, Endian::Big).unwrap();
        out.write_bytes(&[0x23, 0x45]).unwrap();
        out.write_bits(4, 0x6, Endian::Big).unwrap();
        assert_eq!(out.into_bytes().unwrap(), vec![0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut out = OutputStream::create(&path).unwrap();
        out.write_bytes(b"abc").unwrap();
        assert_eq!(out.finish().unwrap(), 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc".to_vec());
    }
}
