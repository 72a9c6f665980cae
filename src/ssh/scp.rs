//! SCP protocol client over a remote channel.
//!
//! Runs the remote `scp` in sink (`-t`) or source (`-f`) mode and speaks
//! its line protocol: `C<mode> <size> <name>` announces a file, `D`/`E`
//! enter and leave directories, `T` carries timestamps, and every step is
//! acknowledged with a single status byte (`0` ok, `1` warning, `2` fatal,
//! the latter two followed by a message line).

use super::provider::{write_all, RemoteChannel};
use log::{debug, trace};
use std::io;
use thiserror::Error;

const MAX_LINE: usize = 4096;

#[derive(Error, Debug)]
pub enum ScpError {
    #[error("scp I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("scp remote status {code}: {message}")]
    Remote { code: u8, message: String },

    #[error("scp protocol error: {0}")]
    Protocol(String),
}

impl ScpError {
    /// The status byte the remote side reported, if it reported one.
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            Self::Remote { code, .. } => Some(i32::from(*code)),
            _ => None,
        }
    }
}

pub type ScpResult<T> = std::result::Result<T, ScpError>;

/// A request received from a remote `scp` in source mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScpRequest {
    NewFile { size: u64, mode: u32, name: String },
    NewDir { mode: u32, name: String },
    EndDir,
    /// The remote side has nothing more to send.
    Eof,
    Warning(String),
}

pub(crate) struct Scp<C: RemoteChannel> {
    channel: C,
    started: bool,
    pending_size: Option<u64>,
    remaining: u64,
}

impl<C: RemoteChannel> Scp<C> {
    /// Starts `scp -t <dir>` and waits for it to become ready.
    pub fn sink(channel: C, dir: &str) -> ScpResult<Self> {
        let mut scp = Self::exec(channel, &format!("scp -t {}", quote(dir)))?;
        scp.read_ack()?;
        Ok(scp)
    }

    /// Starts `scp -f <path>`, or `scp -r -f <path>` when `recursive`.
    pub fn source(channel: C, path: &str, recursive: bool) -> ScpResult<Self> {
        let flags = if recursive { "-r -f" } else { "-f" };
        Self::exec(channel, &format!("scp {} {}", flags, quote(path)))
    }

    fn exec(mut channel: C, command: &str) -> ScpResult<Self> {
        debug!("Starting remote {}", command);
        channel.exec(command)?;
        Ok(Self {
            channel,
            started: false,
            pending_size: None,
            remaining: 0,
        })
    }

    /// Announces a file of `size` bytes. Exactly `size` bytes must follow
    /// through [`Scp::write`].
    pub fn push_file(&mut self, name: &str, size: u64, mode: u32) -> ScpResult<()> {
        if self.remaining != 0 {
            return Err(ScpError::Protocol("previous file incomplete".into()));
        }
        let header = format!("C{:04o} {} {}\n", mode & 0o7777, size, name);
        trace!("scp push: {}", header.trim_end());
        write_all(&mut self.channel, header.as_bytes())?;
        self.read_ack()?;

        self.remaining = size;
        if size == 0 {
            self.end_file()?;
        }
        Ok(())
    }

    /// Sends file data. Completing the announced size terminates the file.
    pub fn write(&mut self, data: &[u8]) -> ScpResult<()> {
        if data.len() as u64 > self.remaining {
            return Err(ScpError::Protocol(format!(
                "{} bytes written with {} remaining",
                data.len(),
                self.remaining
            )));
        }
        write_all(&mut self.channel, data)?;
        self.remaining -= data.len() as u64;
        if self.remaining == 0 {
            self.end_file()?;
        }
        Ok(())
    }

    fn end_file(&mut self) -> ScpResult<()> {
        write_all(&mut self.channel, &[0])?;
        self.read_ack()
    }

    /// Reads the next request from a source-mode `scp`.
    pub fn pull_request(&mut self) -> ScpResult<ScpRequest> {
        if !self.started {
            write_all(&mut self.channel, &[0])?;
            self.started = true;
        }

        loop {
            let Some(kind) = self.read_byte()? else {
                return Ok(ScpRequest::Eof);
            };
            match kind {
                1 => {
                    let message = self.read_line()?;
                    debug!("scp warning: {}", message);
                    return Ok(ScpRequest::Warning(message));
                }
                2 => {
                    let message = self.read_line()?;
                    return Err(ScpError::Remote { code: 2, message });
                }
                b'C' => {
                    let line = self.read_line()?;
                    let (mode, size, name) = parse_entry(&line)?;
                    self.pending_size = Some(size);
                    return Ok(ScpRequest::NewFile { size, mode, name });
                }
                b'D' => {
                    let line = self.read_line()?;
                    let (mode, _, name) = parse_entry(&line)?;
                    return Ok(ScpRequest::NewDir { mode, name });
                }
                b'E' => {
                    self.read_line()?;
                    write_all(&mut self.channel, &[0])?;
                    return Ok(ScpRequest::EndDir);
                }
                b'T' => {
                    let line = self.read_line()?;
                    trace!("scp timestamps: {}", line);
                    write_all(&mut self.channel, &[0])?;
                }
                other => {
                    return Err(ScpError::Protocol(format!(
                        "unexpected request byte {:#04x}",
                        other
                    )))
                }
            }
        }
    }

    /// Accepts the pending file request; its data follows through
    /// [`Scp::read`].
    pub fn accept_request(&mut self) -> ScpResult<()> {
        let size = self
            .pending_size
            .take()
            .ok_or_else(|| ScpError::Protocol("no file request to accept".into()))?;
        write_all(&mut self.channel, &[0])?;
        self.remaining = size;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of the accepted file, filling `buf`
    /// unless the file ends first.
    pub fn read(&mut self, buf: &mut [u8]) -> ScpResult<usize> {
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let mut filled = 0;
        while filled < want {
            match self.channel.read_blocking(&mut buf[filled..want])? {
                0 => return Err(ScpError::Protocol("file data truncated".into())),
                n => filled += n,
            }
        }

        self.remaining -= filled as u64;
        if self.remaining == 0 && want > 0 {
            self.read_ack()?;
            write_all(&mut self.channel, &[0])?;
        }
        Ok(filled)
    }

    /// Ends the exchange and returns the exit code of the remote `scp`.
    pub fn finish(&mut self) -> ScpResult<i32> {
        self.channel.send_eof()?;
        Ok(self.channel.exit_status(&mut |name| {
            debug!("remote scp killed by signal {}", name);
        })?)
    }

    /// Closes the channel without waiting for the remote side.
    pub fn close(&mut self) {
        self.channel.close();
    }

    fn read_byte(&mut self) -> ScpResult<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.channel.read_blocking(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn read_line(&mut self) -> ScpResult<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                Some(b'\n') => break,
                Some(byte) if line.len() < MAX_LINE => line.push(byte),
                Some(_) => return Err(ScpError::Protocol("control line too long".into())),
                None => return Err(ScpError::Protocol("unterminated control line".into())),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn read_ack(&mut self) -> ScpResult<()> {
        match self.read_byte()? {
            Some(0) => Ok(()),
            Some(code @ (1 | 2)) => {
                let message = self.read_line()?;
                Err(ScpError::Remote { code, message })
            }
            Some(other) => Err(ScpError::Protocol(format!(
                "unexpected acknowledgement byte {:#04x}",
                other
            ))),
            None => Err(ScpError::Protocol("connection closed awaiting acknowledgement".into())),
        }
    }
}

/// Parses the body of a `C` or `D` line: `<mode> <size> <name>`.
fn parse_entry(line: &str) -> ScpResult<(u32, u64, String)> {
    let malformed = || ScpError::Protocol(format!("malformed entry '{}'", line));
    let mut parts = line.splitn(3, ' ');
    let mode = parts
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(malformed)?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
    Ok((mode, size, name.to_owned()))
}

/// Single-quotes `path` for the remote shell.
fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}
