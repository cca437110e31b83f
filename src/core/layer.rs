//! The `Layer` contract shared by every driver
//!
//! A layer is a seekable byte stream with a known size. Layers own their
//! parent (if any) and their cursor, so a resolved stack is `Send` and
//! exclusively owned by whoever opened it.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Uniform read/seek/size contract implemented by every driver
pub trait Layer: Read + Seek + Send {
    /// Total size of the stream in bytes
    fn size(&self) -> u64;
}

impl std::fmt::Debug for dyn Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer").field("size", &self.size()).finish_non_exhaustive()
    }
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Read an entire layer from offset 0, leaving the cursor at the end
pub fn read_to_vec(layer: &mut dyn Layer) -> io::Result<Vec<u8>> {
    layer.seek(SeekFrom::Start(0))?;
    let mut out = Vec::with_capacity(usize::try_from(layer.size()).unwrap_or(0).min(64 << 20));
    layer.read_to_end(&mut out)?;
    Ok(out)
}

/// Resolve a `SeekFrom` against a cursor and stream size
///
/// Seeking past the end is allowed (reads there return 0); seeking before
/// the start is an `InvalidInput` error.
pub fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => size.checked_add_signed(delta),
    };
    target.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid seek to a negative or overflowing position",
        )
    })
}

/// Cheaply clonable, read-only byte buffer backing in-memory layers
#[derive(Clone)]
pub struct SharedBytes(Arc<dyn AsRef<[u8]> + Send + Sync>);

impl SharedBytes {
    pub fn new<B: AsRef<[u8]> + Send + Sync + 'static>(bytes: B) -> Self {
        SharedBytes(Arc::new(bytes))
    }

    pub fn empty() -> Self {
        SharedBytes::new(Vec::new())
    }

    pub fn as_slice(&self) -> &[u8] {
        AsRef::<[u8]>::as_ref(&*self.0)
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl std::fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBytes").field("len", &self.len()).finish()
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(bytes: Vec<u8>) -> Self {
        SharedBytes::new(bytes)
    }
}

/// Layer over a shared in-memory (or memory-mapped) buffer
///
/// Used for root sources from the [`SourceCache`](crate::core::cache::SourceCache),
/// resident file data, and the output of decoding transforms.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    data: SharedBytes,
    pos: u64,
}

impl MemoryLayer {
    pub fn new<B: Into<SharedBytes>>(data: B) -> Self {
        MemoryLayer {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl Read for MemoryLayer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.as_slice();
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MemoryLayer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size())?;
        Ok(self.pos)
    }
}

impl Layer for MemoryLayer {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
