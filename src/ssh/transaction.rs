//! State of one in-flight command.

use super::interrupt::ForegroundFlags;
use super::provider::{
    RemoteChannel, RemoteSession, SessionOptions, SessionProvider, StreamIndex,
    EXIT_STATUS_UNAVAILABLE,
};
use super::session::open_session;
use super::signals::ExitSignal;
use super::BUFFER_SIZE;
use crate::command::Status;
use crate::error::{Error, Result};
use crate::iostream::LocalStream;
use log::{debug, trace, warn};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionState {
    Init,
    SessionOpened,
    Executing,
    Polling,
    Done,
    Failed,
}

pub(crate) struct StdinSlot<'io> {
    stream: Option<&'io mut LocalStream>,
    /// Set by the last poll; streams without a descriptor are always ready.
    ready: bool,
    eof: bool,
    was_blocking: Option<bool>,
}

pub(crate) struct OutputSlot<'io> {
    index: StreamIndex,
    stream: Option<&'io mut LocalStream>,
    eof: bool,
}

impl<'io> OutputSlot<'io> {
    fn new(index: StreamIndex, stream: Option<&'io mut LocalStream>) -> Self {
        Self {
            index,
            stream,
            eof: false,
        }
    }
}

/// One command's channel, stream bindings and completion state.
///
/// Dropping a transaction closes its channel, disconnects its session and
/// restores the blocking mode of the bound stdin, whatever state it is in.
pub(crate) struct Transaction<'io, S: RemoteSession> {
    session: Option<S>,
    channel: Option<S::Channel>,
    state: TransactionState,
    exception: Option<Error>,
    stdin: StdinSlot<'io>,
    stdout: OutputSlot<'io>,
    stderr: OutputSlot<'io>,
    deadline: Instant,
    flags: Arc<ForegroundFlags>,
    exit_signal: ExitSignal,
    status: Option<Status>,
}

impl<'io, S: RemoteSession> Transaction<'io, S> {
    pub fn new(
        flags: Arc<ForegroundFlags>,
        timeout: Duration,
        stdin: Option<&'io mut LocalStream>,
        stdout: Option<&'io mut LocalStream>,
        stderr: Option<&'io mut LocalStream>,
    ) -> Self {
        Self {
            session: None,
            channel: None,
            state: TransactionState::Init,
            exception: None,
            stdin: StdinSlot {
                stream: stdin,
                ready: true,
                eof: false,
                was_blocking: None,
            },
            stdout: OutputSlot::new(StreamIndex::Stdout, stdout),
            stderr: OutputSlot::new(StreamIndex::Stderr, stderr),
            deadline: Instant::now() + timeout,
            flags,
            exit_signal: ExitSignal::None,
            status: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        trace!("transaction state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Records a failure. The first failure sticks and is the one returned.
    pub fn fail(&mut self, err: Error) -> Error {
        self.state = TransactionState::Failed;
        *self.exception.get_or_insert(err)
    }

    #[cfg(test)]
    pub fn exception(&self) -> Option<Error> {
        self.exception
    }

    /// Opens the session and the command channel.
    pub fn open<P>(&mut self, provider: &P, template: &SessionOptions, user: &str) -> Result<()>
    where
        P: SessionProvider<Session = S>,
    {
        let mut session = open_session(provider, template, user).map_err(|e| self.fail(e))?;
        match session.open_channel() {
            Ok(channel) => {
                self.session = Some(session);
                self.channel = Some(channel);
                self.set_state(TransactionState::SessionOpened);
                Ok(())
            }
            Err(e) => {
                warn!("Unable to open channel: {}", e);
                session.disconnect();
                Err(self.fail(Error::OpenSession))
            }
        }
    }

    /// Allocates a pty if requested, switches stdin to non-blocking mode and
    /// starts the command.
    pub fn execute(&mut self, command: &str) -> Result<()> {
        let use_tty = self.flags.use_tty();
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(Error::OpenSession));
        };

        if use_tty {
            if let Err(e) = channel.request_pty() {
                warn!("Unable to allocate pty: {}", e);
                self.teardown();
                return Err(self.fail(Error::OpenSession));
            }
        }

        if let Some(stream) = self.stdin.stream.as_deref_mut() {
            match stream.set_blocking(false) {
                Ok(was_blocking) => self.stdin.was_blocking = Some(was_blocking),
                Err(e) => debug!("Unable to make stdin non-blocking: {}", e),
            }
        }

        debug!("Executing remote command: {}", command);
        if let Err(e) = channel.exec(command) {
            warn!("Unable to execute '{}': {}", command, e);
            return Err(self.fail(Error::SendCommand));
        }
        self.set_state(TransactionState::Executing);
        Ok(())
    }

    /// Time left before the deadline, `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    pub fn outputs_done(&self) -> bool {
        self.stdout.eof && self.stderr.eof
    }

    /// Writes a queued `^C` to the channel. Returns whether one was sent.
    ///
    /// Once end-of-input is sent a queued interrupt is left alone: either
    /// `send_eof` already flushed it or the requester
    /// withdraws it and reports failure.
    pub fn deliver_interrupt(&mut self) -> Result<bool> {
        if self.channel.is_none() || self.flags.eof_sent() || !self.flags.take_pending() {
            return Ok(false);
        }
        match self.write_interrupt() {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Unable to send interrupt: {}", e);
                Err(self.fail(Error::ForwardInput))
            }
        }
    }

    fn write_interrupt(&mut self) -> io::Result<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no channel"))?;
        debug!("Sending interrupt to remote command");
        match channel.write(&[CTRL_C])? {
            1 => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::WriteZero, "short write of ^C")),
        }
    }

    /// Sends end-of-input once per transaction: a queued `^C` and `^D` first
    /// under a tty, then the channel EOF.
    fn send_eof(&mut self) -> io::Result<()> {
        if self.flags.mark_eof_sent() {
            return Ok(());
        }
        if self.flags.take_pending() {
            self.write_interrupt()?;
        }
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no channel"))?;

        debug!("Sending end-of-input");
        if self.flags.use_tty() && channel.write(&[CTRL_D])? != 1 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write of ^D"));
        }
        channel.send_eof()
    }

    /// Forwards available stdin bytes as a single channel write. Returns
    /// whether anything happened.
    pub fn forward_stdin(&mut self) -> Result<bool> {
        if self.stdin.eof {
            return Ok(false);
        }

        let Some(stream) = self.stdin.stream.as_deref_mut() else {
            self.stdin.eof = true;
            return self.close_stdin().map(|_| true);
        };
        if stream.poll_fd().is_some() && !self.stdin.ready {
            return Ok(false);
        }
        self.stdin.ready = false;

        let mut buf = [0u8; BUFFER_SIZE];
        let count = match stream.read(&mut buf) {
            Ok(0) if stream.is_eof() => {
                self.stdin.eof = true;
                return self.close_stdin().map(|_| true);
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(false)
            }
            Err(e) => {
                warn!("Error reading local stdin: {}", e);
                return Err(self.fail(Error::ForwardInput));
            }
        };
        if count == 0 {
            return Ok(false);
        }

        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(Error::ForwardInput));
        };
        match channel.write(&buf[..count]) {
            Ok(written) if written == count => {
                trace!("forwarded {} bytes of stdin", count);
                Ok(true)
            }
            Ok(written) => {
                warn!("Short write forwarding stdin: {} of {} bytes", written, count);
                Err(self.fail(Error::ForwardInput))
            }
            Err(e) => {
                warn!("Error forwarding stdin: {}", e);
                Err(self.fail(Error::ForwardInput))
            }
        }
    }

    fn close_stdin(&mut self) -> Result<()> {
        self.send_eof().map_err(|e| {
            warn!("Unable to send end-of-input: {}", e);
            self.fail(Error::ForwardInput)
        })
    }

    /// Drains one chunk of remote output into the bound local stream.
    /// Returns whether anything happened.
    pub fn drain(&mut self, index: StreamIndex) -> Result<bool> {
        use super::provider::ReadOutcome;

        let slot = match index {
            StreamIndex::Stdout => &mut self.stdout,
            StreamIndex::Stderr => &mut self.stderr,
        };
        if slot.eof {
            return Ok(false);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(Error::ReceiveResults));
        };

        let mut buf = [0u8; BUFFER_SIZE];
        let outcome = match channel.read_nonblocking(slot.index, &mut buf) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Error reading remote {}: {}", index.name(), e);
                return Err(self.fail(Error::ReceiveResults));
            }
        };

        match outcome {
            ReadOutcome::Pending => Ok(false),
            ReadOutcome::Eof => {
                debug!("Remote {} reached end-of-stream", index.name());
                slot.eof = true;
                Ok(true)
            }
            ReadOutcome::Data(n) => {
                trace!("received {} bytes on {}", n, index.name());
                if let Some(stream) = slot.stream.as_deref_mut() {
                    if let Err(e) = stream.write_all(&buf[..n]).and_then(|()| stream.flush()) {
                        warn!("Error writing local {}: {}", index.name(), e);
                        return Err(self.fail(Error::ReceiveResults));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Blocks until the channel or stdin has something, or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> Result<()> {
        let stdin_fd = if self.stdin.eof {
            None
        } else {
            self.stdin.stream.as_deref().and_then(LocalStream::poll_fd)
        };
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(Error::ReceiveResults));
        };

        match channel.wait_readable(stdin_fd, timeout) {
            Ok(readiness) => {
                if readiness.stdin {
                    self.stdin.ready = true;
                }
                Ok(())
            }
            Err(e) => {
                warn!("Error polling remote channel: {}", e);
                Err(self.fail(Error::ReceiveResults))
            }
        }
    }

    /// Sends end-of-input if still pending, collects the exit status and
    /// produces the command's status. Later calls return the same status.
    pub fn finish(&mut self) -> Result<Status> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        if let Err(e) = self.send_eof() {
            warn!("Unable to send end-of-input: {}", e);
            return Err(self.fail(Error::ReceiveResults));
        }

        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(Error::ReceiveResults));
        };
        let exit_signal = &mut self.exit_signal;
        let code = match channel.exit_status(&mut |name| *exit_signal = ExitSignal::from_name(name)) {
            Ok(code) => code,
            Err(e) => {
                warn!("Unable to get exit status: {}", e);
                return Err(self.fail(Error::ReceiveResults));
            }
        };

        let status = match self.exit_signal.number() {
            Some(signo) if code == EXIT_STATUS_UNAVAILABLE => {
                debug!("Remote command killed by signal {}", signo);
                Status::signaled(signo)
            }
            _ => {
                debug!("Command exit code: {}", code);
                Status::exited(code)
            }
        };

        self.status = Some(status);
        self.set_state(TransactionState::Done);
        Ok(status)
    }

    fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut session) = self.session.take() {
            session.disconnect();
        }
    }

    fn restore_stdin(&mut self) {
        if let (Some(stream), Some(was_blocking)) =
            (self.stdin.stream.as_deref_mut(), self.stdin.was_blocking.take())
        {
            if let Err(e) = stream.set_blocking(was_blocking) {
                debug!("Unable to restore stdin blocking mode: {}", e);
            }
        }
    }
}

impl<S: RemoteSession> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        self.restore_stdin();
        self.teardown();
    }
}
