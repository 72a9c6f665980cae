//! File copies over SCP, one session per transfer.

use super::provider::{RemoteSession, SessionOptions, SessionProvider};
use super::scp::{Scp, ScpError, ScpRequest};
use super::session::open_session;
use super::{BUFFER_SIZE, DEFAULT_USER};
use crate::command::{FileTransfer, Status};
use crate::error::{Error, Result};
use crate::iostream::LocalStream;
use crate::sink::{OutputChannel, Sink};
use log::{debug, warn};

/// A session plus the SCP exchange running on it. Dropping it closes the
/// channel and disconnects.
struct Transfer<S: RemoteSession> {
    session: S,
    scp: Option<Scp<S::Channel>>,
}

impl<S: RemoteSession> Transfer<S> {
    fn open<P>(provider: &P, template: &SessionOptions, user: &str) -> Result<Self>
    where
        P: SessionProvider<Session = S>,
    {
        let session = open_session(provider, template, user)?;
        Ok(Self { session, scp: None })
    }

    fn start_scp<F>(&mut self, start: F, status: &mut Status, err: Error) -> Result<&mut Scp<S::Channel>>
    where
        F: FnOnce(S::Channel) -> std::result::Result<Scp<S::Channel>, ScpError>,
    {
        let channel = self.session.open_channel().map_err(|e| {
            warn!("Unable to open channel for scp: {}", e);
            err
        })?;
        let scp = start(channel).map_err(|e| record(e, status, err))?;
        Ok(self.scp.insert(scp))
    }

    /// Asks a recursive `scp` source whether `dir` is a directory.
    fn remote_dir_exists(&mut self, dir: &str) -> bool {
        let channel = match self.session.open_channel() {
            Ok(channel) => channel,
            Err(e) => {
                debug!("Unable to open channel to check {}: {}", dir, e);
                return false;
            }
        };
        let mut probe = match Scp::source(channel, dir, true) {
            Ok(probe) => probe,
            Err(e) => {
                debug!("Unable to check remote directory {}: {}", dir, e);
                return false;
            }
        };
        let reply = probe.pull_request();
        probe.close();
        matches!(reply, Ok(ScpRequest::NewDir { .. }))
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &mut self,
        stream: &mut LocalStream,
        dir: &str,
        name: &str,
        size: u64,
        mode: u32,
        sink: &mut Sink,
        status: &mut Status,
    ) -> Result<()> {
        // Some scp servers turn "dir/name" into a regular file "dir" when
        // the directory is missing.
        if !self.remote_dir_exists(dir) {
            warn!("Remote directory {} does not exist", dir);
            return Err(Error::SendFile);
        }

        let scp = self.start_scp(|ch| Scp::sink(ch, dir), status, Error::SendFile)?;
        scp.push_file(name, size, mode)
            .map_err(|e| record(e, status, Error::SendFile))?;

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut remaining = size;
        let result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let chunk = chunk_len(remaining);
            match read_full(stream, &mut buf[..chunk]) {
                Ok(n) if n == chunk => {}
                Ok(n) => {
                    warn!("Local file ended after {} of {} bytes", size - remaining + n as u64, size);
                    break Err(Error::LocalFile);
                }
                Err(e) => {
                    warn!("Error reading local file: {}", e);
                    break Err(Error::LocalFile);
                }
            }
            if let Err(e) = scp.write(&buf[..chunk]) {
                break Err(record(e, status, Error::SendFile));
            }
            sink.putc(OutputChannel::Stdout, b'.');
            remaining -= chunk as u64;
        };
        sink.putc(OutputChannel::Stdout, b'\n');
        result?;

        match scp.finish() {
            Ok(0) => {}
            Ok(code) => {
                debug!("Remote scp exited with status {}", code);
                status.minor = code;
            }
            Err(e) => debug!("Unable to collect remote scp status: {}", e),
        }
        Ok(())
    }

    fn receive(
        &mut self,
        remote_name: &str,
        stream: &mut LocalStream,
        sink: &mut Sink,
        status: &mut Status,
    ) -> Result<()> {
        let scp = self.start_scp(
            |ch| Scp::source(ch, remote_name, false),
            status,
            Error::ReceiveFile,
        )?;

        let size = match scp.pull_request() {
            Ok(ScpRequest::NewFile { size, .. }) => size,
            Ok(other) => {
                warn!("Expected a file from remote scp, got {:?}", other);
                return Err(Error::ReceiveFile);
            }
            Err(e) => return Err(record(e, status, Error::ReceiveFile)),
        };
        if size == 0 {
            return Ok(());
        }

        scp.accept_request()
            .map_err(|e| record(e, status, Error::ReceiveFile))?;

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut remaining = size;
        let result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let chunk = chunk_len(remaining);
            match scp.read(&mut buf[..chunk]) {
                Ok(n) if n == chunk => {}
                Ok(n) => {
                    warn!("Short scp read: {} of {} bytes", n, chunk);
                    break Err(Error::ReceiveFile);
                }
                Err(e) => break Err(record(e, status, Error::ReceiveFile)),
            }
            if let Err(e) = stream.write_all(&buf[..chunk]) {
                warn!("Error writing local file: {}", e);
                break Err(Error::LocalFile);
            }
            sink.putc(OutputChannel::Stdout, b'.');
            remaining -= chunk as u64;
        };
        sink.putc(OutputChannel::Stdout, b'\n');
        result?;

        if let Err(e) = stream.flush() {
            warn!("Error flushing local file: {}", e);
            return Err(Error::LocalFile);
        }

        match scp.pull_request() {
            Ok(ScpRequest::Eof) => Ok(()),
            Ok(other) => {
                warn!("Expected end of transfer, got {:?}", other);
                Err(Error::ReceiveFile)
            }
            Err(e) => Err(record(e, status, Error::ReceiveFile)),
        }
    }
}

impl<S: RemoteSession> Drop for Transfer<S> {
    fn drop(&mut self) {
        if let Some(mut scp) = self.scp.take() {
            scp.close();
        }
        self.session.disconnect();
    }
}

/// Copies `xfer`'s local stream to the remote path.
pub(crate) fn inject<P: SessionProvider>(
    provider: &P,
    template: &SessionOptions,
    xfer: &mut FileTransfer,
    sink: &mut Sink,
) -> Result<Status> {
    let user = xfer.user.as_deref().unwrap_or(DEFAULT_USER);
    let mut transfer = Transfer::open(provider, template, user)?;
    let (dir, name) = split_remote_path(&xfer.remote_name);

    // SCP announces the size up front; streams that cannot tell theirs are
    // buffered whole.
    let mut buffered;
    let stream = if xfer.local_stream.filesize().is_some() {
        &mut xfer.local_stream
    } else {
        debug!("Buffering local stream of unknown size");
        buffered = xfer.local_stream.read_all().map_err(|e| {
            warn!("Error reading local stream: {}", e);
            Error::LocalFile
        })?;
        &mut buffered
    };
    let size = stream.filesize().ok_or(Error::LocalFile)?;

    debug!("Injecting {} bytes into {}/{}", size, dir, name);
    let mut status = Status::default();
    let result = transfer.send(stream, dir, name, size, xfer.remote_mode, sink, &mut status);
    conclude(result, status)
}

/// Copies the remote path into `xfer`'s local stream.
pub(crate) fn extract<P: SessionProvider>(
    provider: &P,
    template: &SessionOptions,
    xfer: &mut FileTransfer,
    sink: &mut Sink,
) -> Result<Status> {
    let user = xfer.user.as_deref().unwrap_or(DEFAULT_USER);
    let mut transfer = Transfer::open(provider, template, user)?;

    debug!("Extracting {}", xfer.remote_name);
    let mut status = Status::default();
    let result = transfer.receive(&xfer.remote_name, &mut xfer.local_stream, sink, &mut status);
    conclude(result, status)
}

fn conclude(result: Result<()>, status: Status) -> Result<Status> {
    match result {
        Ok(()) if status != Status::default() => {
            warn!("Transfer completed with remote status {}/{}", status.major, status.minor);
            Err(Error::RemoteFile)
        }
        Ok(()) => Ok(status),
        Err(e) => {
            if status.major != 0 {
                warn!("Transfer failed with remote scp status {}", status.major);
            }
            Err(e)
        }
    }
}

/// Logs an SCP failure and records the remote status byte, if any.
fn record(err: ScpError, status: &mut Status, code: Error) -> Error {
    warn!("{}", err);
    if let Some(remote) = err.remote_code() {
        status.major = remote;
    }
    code
}

fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(BUFFER_SIZE, |left| left.min(BUFFER_SIZE))
}

fn read_full(stream: &mut LocalStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Splits a remote path into the directory and the file name.
pub(crate) fn split_remote_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", path),
    }
}
