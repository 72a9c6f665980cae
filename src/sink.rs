//! Output routing for progress and diagnostic bytes.
//!
//! A [`Sink`] never carries command output; that goes through the local
//! streams bound to a command. What lands here are the progress dots of
//! file transfers and similar chatter, which the caller may want on the
//! terminal, captured in memory, or dropped.

use log::warn;
use std::io::{self, Write};

/// Logical output stream a byte is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

/// Where a [`Sink`] routes its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Discard everything.
    None,
    /// Write to the process's stdout/stderr.
    Screen,
    /// Capture stdout and stderr bytes into a single bounded buffer.
    Buffer,
    /// Capture stdout and stderr bytes into two independent bounded buffers.
    BufferSeparately,
}

/// A buffer that stops growing at a fixed bound.
#[derive(Debug, Clone, Default)]
struct BoundedBuffer {
    data: Vec<u8>,
    bound: usize,
}

impl BoundedBuffer {
    fn with_bound(bound: usize) -> Self {
        Self {
            data: Vec::with_capacity(bound.min(4096)),
            bound,
        }
    }

    fn putc(&mut self, c: u8) -> bool {
        if self.data.len() >= self.bound {
            return false;
        }
        self.data.push(c);
        true
    }
}

/// Byte router for unsolicited output.
#[derive(Debug, Clone)]
pub struct Sink {
    mode: OutputMode,
    out: BoundedBuffer,
    err: BoundedBuffer,
}

impl Default for Sink {
    fn default() -> Self {
        Self::screen()
    }
}

impl Sink {
    /// Creates a sink in the given mode.
    ///
    /// Buffer modes require a nonzero `bound`; without one the sink falls
    /// back to [`OutputMode::None`].
    pub fn new(mode: OutputMode, bound: usize) -> Self {
        let mode = match mode {
            OutputMode::Buffer | OutputMode::BufferSeparately if bound == 0 => {
                warn!(
                    "no buffer space supplied for {:?} output mode, falling back to no output",
                    mode
                );
                OutputMode::None
            }
            other => other,
        };

        let (out, err) = match mode {
            OutputMode::Buffer => (BoundedBuffer::with_bound(bound), BoundedBuffer::default()),
            OutputMode::BufferSeparately => (
                BoundedBuffer::with_bound(bound),
                BoundedBuffer::with_bound(bound),
            ),
            OutputMode::None | OutputMode::Screen => {
                (BoundedBuffer::default(), BoundedBuffer::default())
            }
        };

        Self { mode, out, err }
    }

    pub fn none() -> Self {
        Self::new(OutputMode::None, 0)
    }

    pub fn screen() -> Self {
        Self::new(OutputMode::Screen, 0)
    }

    pub fn buffer(bound: usize) -> Self {
        Self::new(OutputMode::Buffer, bound)
    }

    pub fn buffer_separately(bound: usize) -> Self {
        Self::new(OutputMode::BufferSeparately, bound)
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Routes a single byte. Returns whether the byte was accepted.
    ///
    /// A full buffer silently drops the byte; this is not an error.
    pub fn putc(&mut self, channel: OutputChannel, c: u8) -> bool {
        match (self.mode, channel) {
            (OutputMode::None, _) => false,
            (OutputMode::Screen, OutputChannel::Stdout) => screen_putc(io::stdout().lock(), c),
            (OutputMode::Screen, OutputChannel::Stderr) => screen_putc(io::stderr().lock(), c),
            (OutputMode::Buffer, _) => self.out.putc(c),
            (OutputMode::BufferSeparately, OutputChannel::Stdout) => self.out.putc(c),
            (OutputMode::BufferSeparately, OutputChannel::Stderr) => self.err.putc(c),
        }
    }

    /// Routes `data` byte by byte and returns how many bytes were accepted.
    pub fn write(&mut self, channel: OutputChannel, data: &[u8]) -> usize {
        data.iter().filter(|&&c| self.putc(channel, c)).count()
    }

    /// Bytes captured for stdout (or for both streams in [`OutputMode::Buffer`]).
    pub fn stdout_bytes(&self) -> &[u8] {
        &self.out.data
    }

    /// Bytes captured for stderr in [`OutputMode::BufferSeparately`].
    pub fn stderr_bytes(&self) -> &[u8] {
        &self.err.data
    }
}

fn screen_putc<W: Write>(mut w: W, c: u8) -> bool {
    w.write_all(&[c]).and_then(|()| w.flush()).is_ok()
}
