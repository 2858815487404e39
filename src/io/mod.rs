//! Positional I/O over memory sources.
//!
//! A [`SourceHandle`] owns the opened device or image and is shared by every
//! block reader. Closing it releases the OS handle exactly once; readers that
//! still hold a reference fail their next read instead of touching a stale
//! descriptor.

pub mod page;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Reads at an absolute offset without moving a shared cursor.
pub trait ReadAt: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Fill `buf` completely, failing with `UnexpectedEof` on a short source.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended at offset {}", offset),
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

/// The opened memory source, shared by every block of one session.
pub struct SourceHandle {
    path: PathBuf,
    size: u64,
    closed: AtomicBool,
    inner: RwLock<Option<Box<dyn ReadAt>>>,
}

impl SourceHandle {
    /// Open a device or image read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Arc<Self>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!(path = %path.display(), size, "opened memory source");

        Ok(Self::from_reader(path, Box::new(file), size))
    }

    /// Wrap an arbitrary positional reader.
    pub fn from_reader<P: AsRef<Path>>(path: P, reader: Box<dyn ReadAt>, size: u64) -> Arc<Self> {
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            size,
            closed: AtomicBool::new(false),
            inner: RwLock::new(Some(reader)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size reported by the OS when opened (character devices report 0)
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the OS handle. Returns `true` only for the call that released it.
    ///
    /// Reads issued after this call fail at once with `NotConnected`. Reads
    /// already inside the OS are not interrupted; the descriptor is dropped
    /// once they return.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!(path = %self.path.display(), "memory source already closed");
            return false;
        }
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drop(guard.take());
        debug!(path = %self.path.display(), "closed memory source");
        true
    }

    fn closed_error(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotConnected,
            format!("{} has been closed", self.path.display()),
        )
    }
}

impl ReadAt for SourceHandle {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let guard = self
            .inner
            .read()
            .map_err(|_| io::Error::other("memory source lock poisoned"))?;
        match guard.as_ref() {
            Some(reader) => reader.read_at(buf, offset),
            None => Err(self.closed_error()),
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sequential reader over `[offset, offset + len)` of a shared source.
pub struct SectionReader {
    source: Arc<SourceHandle>,
    base: u64,
    pos: u64,
    len: u64,
}

impl SectionReader {
    pub fn new(source: Arc<SourceHandle>, offset: u64, len: u64) -> Self {
        Self {
            source,
            base: offset,
            pos: 0,
            len,
        }
    }

    /// Bytes not yet read from the section
    pub fn remaining(&self) -> u64 {
        self.len - self.pos
    }
}

impl Read for SectionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.source.read_at(&mut buf[..want], self.base + self.pos)?;
        if n == 0 {
            warn!(
                path = %self.source.path().display(),
                offset = self.base + self.pos,
                remaining,
                "source ended before the section did"
            );
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short read at offset {} ({} bytes missing)",
                    self.base + self.pos,
                    remaining
                ),
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}
