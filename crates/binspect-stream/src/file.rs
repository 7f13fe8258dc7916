//! File-backed input streams
//!
//! A [`FileStream`] owns one OS handle. Reads go through a 64 KB window
//! cache guarded by a mutex, so concurrent readers are serialized. Large
//! inputs can be memory-mapped instead with [`FileStream::open_mmap`].

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;

use binspect_core::{Error, Result};

use crate::input::{InputStream, StreamTag};

/// Default read window size
const WINDOW_SIZE: usize = 64 * 1024;

enum Backend {
    Buffered(Mutex<Window>),
    Mapped(Mmap),
}

/// Cached window of the file
struct Window {
    file: File,
    buffer: Vec<u8>,
    buffer_offset: u64,
    buffer_len: usize,
}

impl Window {
    /// Load the window starting at `offset`
    fn fill(&mut self, offset: u64) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < self.buffer.len() {
            match self.file.read(&mut self.buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.buffer_offset = offset;
        self.buffer_len = total;
        Ok(())
    }

    fn contains(&self, offset: u64) -> bool {
        offset >= self.buffer_offset && offset < self.buffer_offset + self.buffer_len as u64
    }
}

/// Stream reading a file from disk
pub struct FileStream {
    backend: Backend,
    len: u64,
    path: PathBuf,
    source: String,
    tags: Vec<StreamTag>,
}

impl FileStream {
    /// Open `path` with a buffered handle
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_file(path)?;
        let len = file.metadata()?.len();
        let window = Window {
            file,
            buffer: vec![0; WINDOW_SIZE],
            buffer_offset: 0,
            buffer_len: 0,
        };
        Ok(Self::with_backend(Backend::Buffered(Mutex::new(window)), len, path))
    }

    /// Open `path` through a read-only memory map
    pub fn open_mmap(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_file(path)?;
        // SAFETY: the map is read-only; a concurrent truncation by another
        // process is outside what this tool can defend against.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };
        let len = map.len() as u64;
        Ok(Self::with_backend(Backend::Mapped(map), len, path))
    }

    fn with_backend(backend: Backend, len: u64, path: &Path) -> Self {
        let source = path.display().to_string();
        let mut tags = Vec::new();
        if let Some(name) = path.file_name() {
            tags.push(StreamTag::Filename(name.to_string_lossy().into_owned()));
        }
        Self {
            backend,
            len,
            path: path.to_path_buf(),
            source,
            tags,
        }
    }

    /// Use another name for diagnostics and extension hints
    ///
    /// Replaces the filename tag, e.g. when reading a temporary copy.
    pub fn with_real_filename(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.tags.retain(|t| !matches!(t, StreamTag::Filename(_)));
        self.tags.push(StreamTag::Filename(name.clone()));
        self.source = name;
        self
    }

    /// Attach a parser hint
    pub fn with_tag(mut self, tag: StreamTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Path of the opened file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle, ready to give to a parser
    pub fn into_shared(self) -> Arc<dyn InputStream> {
        Arc::new(self)
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

impl InputStream for FileStream {
    fn size(&self) -> Option<u64> {
        Some(self.len * 8)
    }

    fn read_raw(&self, byte_offset: u64, buf: &mut [u8]) -> Result<usize> {
        if byte_offset >= self.len {
            return Ok(0);
        }
        let count = buf.len().min((self.len - byte_offset) as usize);
        match &self.backend {
            Backend::Mapped(map) => {
                let start = byte_offset as usize;
                buf[..count].copy_from_slice(&map[start..start + count]);
            }
            Backend::Buffered(window) => {
                let mut window = window.lock();
                let mut copied = 0;
                while copied < count {
                    let pos = byte_offset + copied as u64;
                    if !window.contains(pos) {
                        window.fill(pos)?;
                        if window.buffer_len == 0 {
                            break;
                        }
                    }
                    let start = (pos - window.buffer_offset) as usize;
                    let available = window.buffer_len - start;
                    let n = available.min(count - copied);
                    buf[copied..copied + n].copy_from_slice(&window.buffer[start..start + n]);
                    copied += n;
                }
                return Ok(copied);
            }
        }
        Ok(count)
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn tags(&self) -> &[StreamTag] {
        &self.tags
    }
}
