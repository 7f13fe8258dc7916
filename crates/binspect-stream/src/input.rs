//! Bit-addressed input streams
//!
//! Every stream implements [`InputStream`]. Only [`InputStream::read_raw`],
//! [`InputStream::size`] and [`InputStream::source`] are mandatory; bit
//! reads, byte reads and searches are derived from them and may be
//! overridden by views that can delegate to a parent.
//!
//! Addresses and sizes are always in bits.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use regex::bytes::Regex;

use binspect_core::bits;
use binspect_core::{Charset, Endian, Error, Result};

use crate::search;

/// Hint attached to a stream, consulted by the parser guesser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTag {
    /// Name of the file the stream holds (extension hint)
    Filename(String),
    /// Identifier of the parser to try first
    Parser(String),
    /// MIME type of the content
    Mime(String),
}

/// Outcome of a tolerant read: available bits plus the shortfall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    /// Value of the bits that could be read
    pub value: u64,
    /// Number of bits actually read
    pub bits_read: u32,
    /// Number of requested bits beyond the end of the stream
    pub missing: u32,
}

/// Random-access, bit-addressed source of data
///
/// Streams are immutable once created; concurrent reads are allowed.
pub trait InputStream: Send + Sync {
    /// Size in bits, `None` while unknown
    fn size(&self) -> Option<u64>;

    /// Copy bytes starting at `byte_offset` into `buf`
    ///
    /// Returns the number of bytes copied, short only at the end of the
    /// stream.
    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Name of the data source, for diagnostics
    fn source(&self) -> &str;

    /// Parser hints set when the stream was created
    fn tags(&self) -> &[StreamTag] {
        &[]
    }

    /// Charset of the text content, if the creator knows it
    fn charset(&self) -> Option<Charset> {
        None
    }

    /// `true` if the stream holds at least `nbits` bits
    ///
    /// Cheaper than [`InputStream::size`] for streams whose size is lazy.
    fn size_ge(&self, nbits: u64) -> bool {
        if nbits == 0 {
            return true;
        }
        match self.size() {
            Some(size) => size >= nbits,
            None => {
                let mut probe = [0u8; 1];
                matches!(self.read_raw((nbits - 1) / 8, &mut probe), Ok(1))
            }
        }
    }

    /// Integer value of `nbits` bits (0 to 64) at `offset`
    fn read_bits(&self, offset: u64, nbits: u32, endian: Endian) -> Result<u64> {
        if nbits == 0 {
            return Ok(0);
        }
        let end = offset + u64::from(nbits);
        let out_of_range = || Error::BitRead {
            offset,
            nbits: u64::from(nbits),
        };
        if !self.size_ge(end) {
            return Err(out_of_range());
        }
        let (first, last) = match endian {
            Endian::Middle => (
                (offset / 8) & !1,
                end.div_ceil(8).next_multiple_of(2),
            ),
            _ => (offset / 8, end.div_ceil(8)),
        };
        let mut buf = vec![0u8; (last - first) as usize];
        let read = self.read_raw(first, &mut buf)?;
        if read < buf.len() {
            return Err(out_of_range());
        }
        bits::read_uint(&buf, offset - first * 8, nbits, endian)
    }

    /// Read up to `nbits` bits, reporting how many were missing
    fn read(&self, offset: u64, nbits: u32, endian: Endian) -> Result<ReadResult> {
        let available = match self.size() {
            Some(size) => size.saturating_sub(offset).min(u64::from(nbits)) as u32,
            None => nbits,
        };
        let value = self.read_bits(offset, available, endian)?;
        Ok(ReadResult {
            value,
            bits_read: available,
            missing: nbits - available,
        })
    }

    /// `nbytes` bytes starting at bit `offset`
    ///
    /// Unaligned offsets are served by shifting the underlying bytes.
    fn read_bytes(&self, offset: u64, nbytes: usize) -> Result<Vec<u8>> {
        if nbytes == 0 {
            return Ok(Vec::new());
        }
        let out_of_range = || Error::BitRead {
            offset,
            nbits: nbytes as u64 * 8,
        };
        if !self.size_ge(offset + nbytes as u64 * 8) {
            return Err(out_of_range());
        }
        let shift = (offset % 8) as u32;
        if shift == 0 {
            let mut buf = vec![0u8; nbytes];
            if self.read_raw(offset / 8, &mut buf)? < nbytes {
                return Err(out_of_range());
            }
            return Ok(buf);
        }
        let mut raw = vec![0u8; nbytes + 1];
        if self.read_raw(offset / 8, &mut raw)? < raw.len() {
            return Err(out_of_range());
        }
        Ok(raw
            .windows(2)
            .map(|pair| (pair[0] << shift) | (pair[1] >> (8 - shift)))
            .collect())
    }

    /// Bit address of the first byte-aligned `pattern` at or after `start`
    ///
    /// A match must end at or before `end` (stream end when `None`). Not
    /// finding the pattern is not an error.
    fn search_bytes(&self, pattern: &[u8], start: u64, end: Option<u64>) -> Result<Option<u64>> {
        search::search_stream(self, pattern, start, end)
    }

    /// Distance in bits from `start` to the pattern, optionally including it
    fn search_bytes_length(
        &self,
        pattern: &[u8],
        include_end: bool,
        start: u64,
        end: Option<u64>,
    ) -> Result<Option<u64>> {
        Ok(self.search_bytes(pattern, start, end)?.map(|address| {
            let length = address - start;
            if include_end {
                length + pattern.len() as u64 * 8
            } else {
                length
            }
        }))
    }

    /// First regex match in `[start, end)`, as a bit range
    fn search_regex(&self, regex: &Regex, start: u64, end: u64) -> Result<Option<(u64, u64)>> {
        search::search_regex(self, regex, start, end)
    }
}

impl fmt::Debug for dyn InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream")
            .field("source", &self.source())
            .field("size", &self.size())
            .finish()
    }
}

/// Stream over bytes held in memory
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Bytes,
    source: String,
    tags: Vec<StreamTag>,
    charset: Option<Charset>,
}

impl MemoryStream {
    /// Wrap a buffer
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            source: "<memory>".to_string(),
            tags: Vec::new(),
            charset: None,
        }
    }

    /// Set the diagnostic source name
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Attach a parser hint
    pub fn with_tag(mut self, tag: StreamTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Declare the charset of the content
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    /// Shared handle, ready to give to a parser
    pub fn into_shared(self) -> Arc<dyn InputStream> {
        Arc::new(self)
    }

    /// The underlying bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl InputStream for MemoryStream {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64 * 8)
    }

    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if byte_offset >= len {
            return Ok(0);
        }
        let start = byte_offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn tags(&self) -> &[StreamTag] {
        &self.tags
    }

    fn charset(&self) -> Option<Charset> {
        self.charset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(data: &[u8]) -> MemoryStream {
        MemoryStream::new(data.to_vec())
    }

    #[test]
    fn test_read_bits_boundaries() {
        let s = stream(&[0xAB, 0xCD]);
        assert_eq!(s.read_bits(0, 0, Endian::Big).unwrap(), 0);
        assert_eq!(s.read_bits(8, 8, Endian::Big).unwrap(), 0xCD);
        assert_eq!(s.read_bits(4, 8, Endian::Big).unwrap(), 0xBC);
        assert!(matches!(
            s.read_bits(9, 8, Endian::Big),
            Err(Error::BitRead { offset: 9, nbits: 8 })
        ));
    }

    #[test]
    fn test_read_reports_missing() {
        let s = stream(&[0xFF]);
        let result = s.read(4, 8, Endian::Big).unwrap();
        assert_eq!(result.bits_read, 4);
        assert_eq!(result.missing, 4);
        assert_eq!(result.value, 0x0F);
    }

    #[test]
    fn test_read_bytes_unaligned() {
        let s = stream(&[0x12, 0x34, 0x56]);
        assert_eq!(s.read_bytes(0, 2).unwrap(), vec![0x12, 0x34]);
        assert_eq!(s.read_bytes(4, 2).unwrap(), vec![0x23, 0x45]);
        assert!(s.read_bytes(12, 2).is_err());
    }

    #[test]
    fn test_size_ge() {
        let s = stream(&[0u8; 4]);
        assert!(s.size_ge(0));
        assert!(s.size_ge(32));
        assert!(!s.size_ge(33));
    }

    #[test]
    fn test_middle_endian_read() {
        let s = stream(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(s.read_bits(0, 32, Endian::Middle).unwrap(), 0x3412_7856);
    }

    #[test]
    fn test_tags() {
        let s = stream(b"x").with_tag(StreamTag::Filename("a.gz".into()));
        assert_eq!(s.tags(), &[StreamTag::Filename("a.gz".into())]);
    }
}
