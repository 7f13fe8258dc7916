//! Logical concatenation of discontiguous ranges of a parent stream
//!
//! Packet-framed containers split their payload across many frames. A
//! [`FragmentedStream`] presents the payload as one contiguous stream; the
//! fragment list is pulled lazily from a [`FragmentSource`] and the running
//! boundaries are cached so later reads binary-search them.

use std::sync::Arc;

use parking_lot::Mutex;

use binspect_core::{Error, Result};

use crate::input::{InputStream, StreamTag};

/// Producer of `(parent_offset, length)` fragments, both in bits
///
/// Fragments must be byte-aligned. `None` ends the sequence.
pub trait FragmentSource: Send {
    fn next_fragment(&mut self) -> Result<Option<(u64, u64)>>;
}

impl<F> FragmentSource for F
where
    F: FnMut() -> Result<Option<(u64, u64)>> + Send,
{
    fn next_fragment(&mut self) -> Result<Option<(u64, u64)>> {
        self()
    }
}

#[derive(Debug, Clone, Copy)]
struct Fragment {
    /// Logical start in this stream
    start: u64,
    /// Start in the parent
    parent_offset: u64,
    length: u64,
}

struct State {
    source: Option<Box<dyn FragmentSource>>,
    fragments: Vec<Fragment>,
    /// Logical size of the loaded fragments
    loaded: u64,
}

impl State {
    /// Pull one fragment; `false` once the source is exhausted
    fn load_next(&mut self) -> Result<bool> {
        let Some(source) = self.source.as_mut() else {
            return Ok(false);
        };
        match source.next_fragment()? {
            Some((parent_offset, length)) => {
                if parent_offset % 8 != 0 || length % 8 != 0 {
                    self.source = None;
                    return Err(Error::internal(format!(
                        "unaligned fragment ({parent_offset}, {length})"
                    )));
                }
                if length > 0 {
                    self.fragments.push(Fragment {
                        start: self.loaded,
                        parent_offset,
                        length,
                    });
                    self.loaded += length;
                }
                Ok(true)
            }
            None => {
                self.source = None;
                Ok(false)
            }
        }
    }

    /// Load fragments until `nbits` logical bits are known or the source ends
    fn load_until(&mut self, nbits: u64) -> Result<()> {
        while self.loaded < nbits {
            if !self.load_next()? {
                break;
            }
        }
        Ok(())
    }

    fn load_all(&mut self) -> Result<()> {
        while self.load_next()? {}
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.source.is_none()
    }

    /// Index of the fragment holding logical bit `offset`
    fn find(&self, offset: u64) -> Option<usize> {
        let index = self.fragments.partition_point(|f| f.start + f.length <= offset);
        (index < self.fragments.len()).then_some(index)
    }
}

/// Stream whose content is a lazily discovered list of parent ranges
pub struct FragmentedStream {
    parent: Arc<dyn InputStream>,
    state: Mutex<State>,
    source: String,
    tags: Vec<StreamTag>,
}

impl FragmentedStream {
    pub fn new(parent: Arc<dyn InputStream>, fragments: impl FragmentSource + 'static) -> Self {
        let source = format!("{}<fragmented>", parent.source());
        Self {
            parent,
            state: Mutex::new(State {
                source: Some(Box::new(fragments)),
                fragments: Vec::new(),
                loaded: 0,
            }),
            source,
            tags: Vec::new(),
        }
    }

    /// Stream over a fixed fragment list
    pub fn from_fragments(parent: Arc<dyn InputStream>, fragments: Vec<(u64, u64)>) -> Self {
        let mut iter = fragments.into_iter();
        Self::new(parent, move || Ok(iter.next()))
    }

    /// Set the diagnostic source name
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Attach a parser hint, e.g. the id of the parser for the payload
    pub fn with_tag(mut self, tag: StreamTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Number of fragments discovered so far
    pub fn loaded_fragments(&self) -> usize {
        self.state.lock().fragments.len()
    }
}

impl InputStream for FragmentedStream {
    fn size(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if let Err(err) = state.load_all() {
            tracing::warn!(source = %self.source, error = %err, "fragment list truncated");
        }
        Some(state.loaded)
    }

    fn size_ge(&self, nbits: u64) -> bool {
        let mut state = self.state.lock();
        if state.load_until(nbits).is_err() {
            return false;
        }
        state.loaded >= nbits
    }

    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let start = byte_offset * 8;
        state.load_until(start + buf.len() as u64 * 8)?;

        let mut copied = 0usize;
        let Some(mut index) = state.find(start) else {
            return Ok(0);
        };
        while copied < buf.len() && index < state.fragments.len() {
            let fragment = state.fragments[index];
            let logical = start + copied as u64 * 8;
            let skip = logical - fragment.start;
            let available = ((fragment.length - skip) / 8) as usize;
            let n = available.min(buf.len() - copied);
            let bytes = self.parent.read_bytes(fragment.parent_offset + skip, n)?;
            buf[copied..copied + n].copy_from_slice(&bytes);
            copied += n;
            index += 1;
        }
        Ok(copied)
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn tags(&self) -> &[StreamTag] {
        &self.tags
    }

    fn charset(&self) -> Option<binspect_core::Charset> {
        self.parent.charset()
    }
}

impl FragmentedStream {
    /// `true` once the fragment source has been exhausted
    pub fn is_complete(&self) -> bool {
        self.state.lock().is_complete()
    }
}
