//! Stream search primitives
//!
//! Needle searches walk the stream in fixed-size windows that overlap by
//! `pattern.len() - 1` bytes, so a match straddling two windows is found
//! without loading the whole stream.

use memchr::memmem;
use regex::bytes::Regex;

use binspect_core::Result;

use crate::input::InputStream;

/// Window size for needle searches
const SEARCH_WINDOW: usize = 64 * 1024;

/// Largest range loaded for a regex search
pub const MAX_REGEX_WINDOW: u64 = 16 * 1024 * 1024 * 8;

pub(crate) fn search_stream<S: InputStream + ?Sized>(
    stream: &S,
    pattern: &[u8],
    start: u64,
    end: Option<u64>,
) -> Result<Option<u64>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    let end = match (end, stream.size()) {
        (Some(end), Some(size)) => Some(end.min(size)),
        (Some(end), None) => Some(end),
        (None, size) => size,
    };
    let mut pos = start.div_ceil(8);
    let end_byte = end.map(|e| e / 8);
    if let Some(end_byte) = end_byte {
        if pos + pattern.len() as u64 > end_byte {
            return Ok(None);
        }
    }

    let finder = memmem::Finder::new(pattern);
    let window = SEARCH_WINDOW.max(pattern.len() * 2);
    let overlap = pattern.len() - 1;
    let mut buf = vec![0u8; window];

    loop {
        let wanted = match end_byte {
            Some(end_byte) => window.min((end_byte - pos) as usize),
            None => window,
        };
        let read = stream.read_raw(pos, &mut buf[..wanted])?;
        if let Some(index) = finder.find(&buf[..read]) {
            return Ok(Some((pos + index as u64) * 8));
        }
        let exhausted = read < wanted || end_byte.is_some_and(|e| pos + read as u64 >= e);
        if exhausted || read <= overlap {
            return Ok(None);
        }
        pos += (read - overlap) as u64;
    }
}

pub(crate) fn search_regex<S: InputStream + ?Sized>(
    stream: &S,
    regex: &Regex,
    start: u64,
    end: u64,
) -> Result<Option<(u64, u64)>> {
    let end = match stream.size() {
        Some(size) => end.min(size),
        None => end,
    };
    let first = start.div_ceil(8);
    if end / 8 <= first {
        return Ok(None);
    }
    let len = (end / 8 - first).min(MAX_REGEX_WINDOW / 8) as usize;
    let mut buf = vec![0u8; len];
    let read = stream.read_raw(first, &mut buf)?;
    Ok(regex
        .find(&buf[..read])
        .map(|m| ((first + m.start() as u64) * 8, (first + m.end() as u64) * 8)))
}

#[cfg(test)]
mod tests {
    use crate::input::{InputStream, MemoryStream};
    use regex::bytes::Regex;

    #[test]
    fn test_search_bytes() {
        let s = MemoryStream::new(b"abcIENDxyz".to_vec());
        assert_eq!(s.search_bytes(b"IEND", 0, None).unwrap(), Some(24));
        assert_eq!(s.search_bytes(b"IEND", 32, None).unwrap(), None);
        assert_eq!(s.search_bytes(b"nope", 0, None).unwrap(), None);
    }

    #[test]
    fn test_search_fencepost() {
        let s = MemoryStream::new(b"abcIENDxyz".to_vec());
        // the pattern may end exactly at `end`
        assert_eq!(s.search_bytes(b"IEND", 0, Some(56)).unwrap(), Some(24));
        assert_eq!(s.search_bytes(b"IEND", 0, Some(55)).unwrap(), None);
        assert_eq!(s.search_bytes(b"a", 16, Some(16)).unwrap(), None);
    }

    #[test]
    fn test_search_unaligned_start_rounds_up() {
        let s = MemoryStream::new(b"aab".to_vec());
        assert_eq!(s.search_bytes(b"a", 1, None).unwrap(), Some(8));
    }

    #[test]
    fn test_search_across_windows() {
        let mut data = vec![0u8; super::SEARCH_WINDOW + 10];
        let at = super::SEARCH_WINDOW - 2;
        data[at..at + 4].copy_from_slice(b"MSCF");
        let s = MemoryStream::new(data);
        assert_eq!(s.search_bytes(b"MSCF", 0, None).unwrap(), Some(at as u64 * 8));
    }

    #[test]
    fn test_search_bytes_length() {
        let s = MemoryStream::new(b"test.txt\0rest".to_vec());
        assert_eq!(s.search_bytes_length(b"\0", true, 0, None).unwrap(), Some(72));
        assert_eq!(s.search_bytes_length(b"\0", false, 0, None).unwrap(), Some(64));
    }

    #[test]
    fn test_search_regex() {
        let s = MemoryStream::new(b"xxGIF89a".to_vec());
        let re = Regex::new("GIF8[79]a").unwrap();
        assert_eq!(s.search_regex(&re, 0, 64).unwrap(), Some((16, 64)));
        assert_eq!(s.search_regex(&re, 0, 56).unwrap(), None);
    }
}
