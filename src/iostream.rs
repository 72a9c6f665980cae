//! Local stream endpoints.
//!
//! A command's stdin/stdout/stderr and the local side of a file transfer are
//! bound to a [`LocalStream`]. Streams are either backed by a file
//! descriptor (a regular file, a pipe, or a duplicate of this process's
//! standard streams) or by memory. Only descriptor-backed streams can be
//! polled; memory-backed ones are always "ready".

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A stream backed by a file descriptor.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    eof: bool,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        Self { file, eof: false }
    }

    /// Opens `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        File::open(path).map(Self::new)
    }

    /// Creates (or truncates) `path` for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        File::create(path).map(Self::new)
    }

    /// Duplicates this process's standard input.
    ///
    /// The duplicate shares the open file description, so changing its
    /// blocking mode affects the real stdin until it is restored.
    pub fn stdin() -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::new(File::from(fd)))
    }

    /// Duplicates this process's standard output.
    pub fn stdout() -> io::Result<Self> {
        let fd = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::new(File::from(fd)))
    }

    /// Duplicates this process's standard error.
    pub fn stderr() -> io::Result<Self> {
        let fd = io::stderr().as_fd().try_clone_to_owned()?;
        Ok(Self::new(File::from(fd)))
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<bool> {
        let fd = self.file.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        let was_blocking = !flags.contains(OFlag::O_NONBLOCK);

        let mut new_flags = flags;
        new_flags.set(OFlag::O_NONBLOCK, !blocking);
        if new_flags != flags {
            fcntl(fd, FcntlArg::F_SETFL(new_flags))?;
        }
        Ok(was_blocking)
    }
}

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    pos: usize,
    limit: Option<usize>,
}

/// A stream backed by memory.
///
/// Clones share the same storage, which lets stdout and stderr of one
/// command be captured into a single buffer. Writes beyond the optional
/// limit are dropped silently.
#[derive(Debug, Clone, Default)]
pub struct BufferStream {
    inner: Arc<Mutex<BufferState>>,
}

impl BufferStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer that holds at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        let stream = Self::default();
        stream.lock().limit = Some(limit);
        stream
    }

    /// Creates a buffer pre-filled with `data`, ready to be read.
    pub fn from_bytes<B: Into<Vec<u8>>>(data: B) -> Self {
        let stream = Self::default();
        stream.lock().data = data.into();
        stream
    }

    /// Returns a copy of everything written to (or pre-filled into) the buffer.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Number of bytes not yet consumed by reads.
    pub fn remaining(&self) -> usize {
        let state = self.lock();
        state.data.len() - state.pos
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let mut state = self.lock();
        let start = state.pos;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.pos += n;
        n
    }

    fn write(&self, data: &[u8]) {
        let mut state = self.lock();
        let room = match state.limit {
            Some(limit) => limit.saturating_sub(state.data.len()),
            None => data.len(),
        };
        let n = room.min(data.len());
        state.data.extend_from_slice(&data[..n]);
    }
}

/// A local endpoint bound to a command stream or a file transfer.
#[derive(Debug)]
pub enum LocalStream {
    File(FileStream),
    Buffer(BufferStream),
}

impl LocalStream {
    /// Reads available bytes. `Ok(0)` means end-of-stream.
    ///
    /// A non-blocking descriptor with no data pending reports
    /// [`io::ErrorKind::WouldBlock`].
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => {
                let n = f.file.read(buf)?;
                if n == 0 && !buf.is_empty() {
                    f.eof = true;
                }
                Ok(n)
            }
            Self::Buffer(b) => Ok(b.read(buf)),
        }
    }

    /// Writes all of `data`.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::File(f) => f.file.write_all(data),
            Self::Buffer(b) => {
                b.write(data);
                Ok(())
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.file.flush(),
            Self::Buffer(_) => Ok(()),
        }
    }

    /// Whether the stream has reached logical end-of-stream.
    pub fn is_eof(&self) -> bool {
        match self {
            Self::File(f) => f.eof,
            Self::Buffer(b) => b.remaining() == 0,
        }
    }

    /// The descriptor to poll for readability, if the stream has one.
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Self::File(f) if !f.eof => Some(f.file.as_fd()),
            _ => None,
        }
    }

    /// Switches the blocking mode and returns the previous one.
    ///
    /// Memory-backed streams never block; they report `true` and ignore the
    /// request.
    pub fn set_blocking(&mut self, blocking: bool) -> io::Result<bool> {
        match self {
            Self::File(f) => f.set_blocking(blocking),
            Self::Buffer(_) => Ok(true),
        }
    }

    /// Size of the stream's content, when it can be known up front.
    ///
    /// Pipes, terminals and sockets have no size.
    pub fn filesize(&self) -> Option<u64> {
        match self {
            Self::File(f) => {
                let meta = f.file.metadata().ok()?;
                meta.is_file().then(|| meta.len())
            }
            Self::Buffer(b) => Some(b.remaining() as u64),
        }
    }

    /// Reads everything left in the stream into a memory-backed stream.
    pub fn read_all(&mut self) -> io::Result<LocalStream> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match self.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(LocalStream::Buffer(BufferStream::from_bytes(data)))
    }
}

impl From<File> for LocalStream {
    fn from(file: File) -> Self {
        Self::File(FileStream::new(file))
    }
}

impl From<FileStream> for LocalStream {
    fn from(stream: FileStream) -> Self {
        Self::File(stream)
    }
}

impl From<BufferStream> for LocalStream {
    fn from(stream: BufferStream) -> Self {
        Self::Buffer(stream)
    }
}
