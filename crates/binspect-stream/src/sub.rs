//! Views over a contiguous bit range of another stream

use std::sync::Arc;

use regex::bytes::Regex;

use binspect_core::{Charset, Endian, Error, Result};

use crate::input::{InputStream, StreamTag};

/// `size` bits of `parent` starting at bit `offset`
///
/// When no size is given the view extends to the end of the parent.
pub struct SubStream {
    parent: Arc<dyn InputStream>,
    offset: u64,
    size: Option<u64>,
    source: String,
    tags: Vec<StreamTag>,
}

impl SubStream {
    pub fn new(parent: Arc<dyn InputStream>, offset: u64, size: Option<u64>) -> Self {
        let source = format!("{}[{}:]", parent.source(), offset / 8);
        Self {
            parent,
            offset,
            size,
            source,
            tags: Vec::new(),
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

    /// Bit offset of the view in its parent
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn parent(&self) -> &Arc<dyn InputStream> {
        &self.parent
    }

    fn check(&self, offset: u64, nbits: u64) -> Result<()> {
        if let Some(size) = self.size() {
            if offset + nbits > size {
                return Err(Error::BitRead { offset, nbits });
            }
        }
        Ok(())
    }
}

impl InputStream for SubStream {
    fn size(&self) -> Option<u64> {
        match self.size {
            Some(size) => Some(size),
            None => self.parent.size().map(|s| s.saturating_sub(self.offset)),
        }
    }

    fn size_ge(&self, nbits: u64) -> bool {
        match self.size {
            Some(size) => size >= nbits && self.parent.size_ge(self.offset + nbits),
            None => self.parent.size_ge(self.offset + nbits),
        }
    }

    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Some(size) = self.size() else {
            return self.parent_raw(byte_offset, buf);
        };
        let available = size.div_ceil(8).saturating_sub(byte_offset) as usize;
        let count = buf.len().min(available);
        self.parent_raw(byte_offset, &mut buf[..count])
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn tags(&self) -> &[StreamTag] {
        &self.tags
    }

    fn charset(&self) -> Option<Charset> {
        self.parent.charset()
    }

    fn read_bits(&self, offset: u64, nbits: u32, endian: Endian) -> Result<u64> {
        self.check(offset, u64::from(nbits))?;
        self.parent
            .read_bits(self.offset + offset, nbits, endian)
            .map_err(|e| rebase(e, self.offset))
    }

    fn read_bytes(&self, offset: u64, nbytes: usize) -> Result<Vec<u8>> {
        self.check(offset, nbytes as u64 * 8)?;
        self.parent
            .read_bytes(self.offset + offset, nbytes)
            .map_err(|e| rebase(e, self.offset))
    }

    fn search_bytes(&self, pattern: &[u8], start: u64, end: Option<u64>) -> Result<Option<u64>> {
        if self.offset % 8 != 0 {
            return crate::search::search_stream(self, pattern, start, end);
        }
        let end = match (end, self.size()) {
            (Some(end), Some(size)) => Some(end.min(size)),
            (Some(end), None) => Some(end),
            (None, size) => size,
        };
        Ok(self
            .parent
            .search_bytes(pattern, self.offset + start, end.map(|e| self.offset + e))?
            .map(|address| address - self.offset))
    }

    fn search_regex(&self, regex: &Regex, start: u64, end: u64) -> Result<Option<(u64, u64)>> {
        crate::search::search_regex(self, regex, start, end)
    }
}

impl SubStream {
    /// Raw bytes of the view; unaligned views shift the parent's bytes
    fn parent_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = self.offset + byte_offset * 8;
        if self.offset % 8 == 0 {
            return self.parent.read_raw(start / 8, buf);
        }
        let count = match self.parent.size() {
            Some(size) => buf.len().min((size.saturating_sub(start) / 8) as usize),
            None => buf.len(),
        };
        let bytes = self.parent.read_bytes(start, count)?;
        buf[..count].copy_from_slice(&bytes);
        Ok(count)
    }
}

/// Report errors in the view's own address space
fn rebase(err: Error, base: u64) -> Error {
    match err {
        Error::BitRead { offset, nbits } => Error::BitRead {
            offset: offset.saturating_sub(base),
            nbits,
        },
        other => other,
    }
}

/// View over the bits of one field
///
/// Identical to a [`SubStream`] but remembers the field path, which also
/// becomes the diagnostic source name (`file.png:/chunk[3]/content`).
pub struct FieldStream {
    inner: SubStream,
    path: String,
}

impl FieldStream {
    pub fn new(root: Arc<dyn InputStream>, path: impl Into<String>, address: u64, size: u64) -> Self {
        let path = path.into();
        let source = format!("{}:{}", root.source(), path);
        Self {
            inner: SubStream::new(root, address, Some(size)).with_source(source),
            path,
        }
    }

    /// Attach a parser hint
    pub fn with_tag(mut self, tag: StreamTag) -> Self {
        self.inner = self.inner.with_tag(tag);
        self
    }

    /// Path of the field this stream covers
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute bit address of the field in the root stream
    pub fn address(&self) -> u64 {
        self.inner.offset()
    }
}

impl InputStream for FieldStream {
    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn size_ge(&self, nbits: u64) -> bool {
        self.inner.size_ge(nbits)
    }

    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_raw(byte_offset, buf)
    }

    fn source(&self) -> &str {
        self.inner.source()
    }

    fn tags(&self) -> &[StreamTag] {
        self.inner.tags()
    }

    fn charset(&self) -> Option<Charset> {
        self.inner.charset()
    }

    fn read_bits(&self, offset: u64, nbits: u32, endian: Endian) -> Result<u64> {
        self.inner.read_bits(offset, nbits, endian)
    }

    fn read_bytes(&self, offset: u64, nbytes: usize) -> Result<Vec<u8>> {
        self.inner.read_bytes(offset, nbytes)
    }

    fn search_bytes(&self, pattern: &[u8], start: u64, end: Option<u64>) -> Result<Option<u64>> {
        self.inner.search_bytes(pattern, start, end)
    }

    fn search_regex(&self, regex: &Regex, start: u64, end: u64) -> Result<Option<(u64, u64)>> {
        self.inner.search_regex(regex, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MemoryStream;

    fn parent() -> Arc<dyn InputStream> {
        MemoryStream::new(b"0123456789".to_vec()).with_source("digits").into_shared()
    }

    #[test]
    fn test_sub_stream_size_defaults_to_rest() {
        let sub = SubStream::new(parent(), 16, None);
        assert_eq!(sub.size(), Some(64));
        assert_eq!(sub.read_bytes(0, 3).unwrap(), b"234".to_vec());
    }

    #[test]
    fn test_sub_stream_bounds() {
        let sub = SubStream::new(parent(), 8, Some(16));
        assert_eq!(sub.read_bytes(0, 2).unwrap(), b"12".to_vec());
        assert!(matches!(
            sub.read_bytes(8, 2),
            Err(Error::BitRead { offset: 8, nbits: 16 })
        ));
        let mut buf = [0u8; 8];
        assert_eq!(sub.read_raw(0, &mut buf).unwrap(), 2);
    }

    #[test]
    fn test_sub_stream_search() {
        let sub = SubStream::new(parent(), 16, Some(48));
        assert_eq!(sub.search_bytes(b"5", 0, None).unwrap(), Some(24));
        // "8" lies beyond the view
        assert_eq!(sub.search_bytes(b"8", 0, None).unwrap(), None);
    }

    #[test]
    fn test_unaligned_sub_stream() {
        let bytes = MemoryStream::new(vec![0x12, 0x34, 0x56]).into_shared();
        let sub = SubStream::new(bytes, 4, None);
        assert_eq!(sub.size(), Some(20));
        assert_eq!(sub.read_bytes(0, 2).unwrap(), vec![0x23, 0x45]);
        let mut buf = [0u8; 2];
        assert_eq!(sub.read_raw(0, &mut buf).unwrap(), 2);
        assert_eq!(buf, [0x23, 0x45]);
    }

    #[test]
    fn test_field_stream() {
        let stream = FieldStream::new(parent(), "/payload", 24, 16);
        assert_eq!(stream.source(), "digits:/payload");
        assert_eq!(stream.read_bytes(0, 2).unwrap(), b"34".to_vec());
        assert_eq!(stream.address(), 24);
    }
}
