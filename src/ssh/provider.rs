//! Boundary to the secure-channel implementation.
//!
//! The transaction and transfer engines only talk to these traits. The
//! production implementation lives in [`super::backend`]; tests drive the
//! engines against an in-memory remote.

use std::io;
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code reported when the remote command produced no exit status,
/// typically because it was killed by a signal.
pub const EXIT_STATUS_UNAVAILABLE: i32 = -1;

/// Connection parameters for one session.
///
/// Each target keeps one of these as a template; a copy with the
/// executing user filled in is made for every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key tried after the agent and before the default keys.
    pub identity: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SessionOptions {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: String::new(),
            identity: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Output stream of a remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIndex {
    Stdout,
    Stderr,
}

impl StreamIndex {
    pub fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Result of a non-blocking channel read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Pending,
    Eof,
}

/// What [`RemoteChannel::wait_readable`] found ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub stdin: bool,
}

/// Opens authenticated sessions to a remote host.
pub trait SessionProvider: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Connects and performs the transport handshake. No authentication
    /// happens yet.
    fn connect(&self, options: &SessionOptions) -> io::Result<Self::Session>;
}

/// A connected session.
pub trait RemoteSession {
    type Channel: RemoteChannel;

    /// Public-key authentication without passphrase.
    fn authenticate(&mut self, options: &SessionOptions) -> io::Result<()>;

    fn open_channel(&mut self) -> io::Result<Self::Channel>;

    fn disconnect(&mut self);
}

/// A command channel within a session.
pub trait RemoteChannel {
    fn request_pty(&mut self) -> io::Result<()>;

    fn exec(&mut self, command: &str) -> io::Result<()>;

    /// Writes to the remote stdin. May accept fewer bytes than offered.
    ///
    /// The write may block until the remote side opens its window. A remote
    /// command that stops reading its input can hold the caller past the
    /// transaction deadline, which is only checked between passes.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn read_nonblocking(&mut self, stream: StreamIndex, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Blocking read from the remote stdout. `Ok(0)` is end-of-stream.
    fn read_blocking(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send_eof(&mut self) -> io::Result<()>;

    /// Waits for the remote command to finish and returns its exit code.
    ///
    /// If the command was terminated by a signal, `on_signal` is called
    /// with the signal's short name (`"TERM"`, `"KILL"`, ...) before this
    /// returns [`EXIT_STATUS_UNAVAILABLE`].
    fn exit_status(&mut self, on_signal: &mut dyn FnMut(&str)) -> io::Result<i32>;

    /// Blocks until the session has incoming traffic, `stdin` is readable,
    /// or `timeout` elapses. An interrupted wait reports nothing ready.
    fn wait_readable(&mut self, stdin: Option<BorrowedFd<'_>>, timeout: Duration) -> io::Result<Readiness>;

    fn close(&mut self);
}

/// Writes all of `data`, failing on a zero-length write.
pub fn write_all<C: RemoteChannel + ?Sized>(channel: &mut C, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match channel.write(data)? {
            0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "channel accepted no data")),
            n => data = &data[n..],
        }
    }
    Ok(())
}
