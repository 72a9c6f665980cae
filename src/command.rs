//! Command and file-transfer descriptors handed to a transport.

use crate::iostream::LocalStream;
use std::time::Duration;

/// Default time a command may run before it is abandoned.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default permission bits for injected files.
pub const DEFAULT_REMOTE_MODE: u32 = 0o644;

/// A command to run on the system under test.
///
/// Streams left as `None` are not connected: stdin reads as empty, output
/// is discarded.
#[derive(Debug)]
pub struct Command {
    pub command: String,
    /// Remote user; the transport's default applies when unset.
    pub user: Option<String>,
    pub timeout: Duration,
    pub request_tty: bool,
    pub stdin: Option<LocalStream>,
    pub stdout: Option<LocalStream>,
    pub stderr: Option<LocalStream>,
}

impl Command {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            user: None,
            timeout: DEFAULT_TIMEOUT,
            request_tty: false,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tty(mut self, request_tty: bool) -> Self {
        self.request_tty = request_tty;
        self
    }

    pub fn stdin<S: Into<LocalStream>>(mut self, stream: S) -> Self {
        self.stdin = Some(stream.into());
        self
    }

    pub fn stdout<S: Into<LocalStream>>(mut self, stream: S) -> Self {
        self.stdout = Some(stream.into());
        self
    }

    pub fn stderr<S: Into<LocalStream>>(mut self, stream: S) -> Self {
        self.stderr = Some(stream.into());
        self
    }
}

/// Completion status of a command or transfer.
///
/// `major` carries local or plugin-level codes (`EFAULT` when the remote
/// process died from a signal, an SCP status after a remote transfer
/// failure). `minor` is the remote exit code, or the signal number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub major: i32,
    pub minor: i32,
}

impl Status {
    pub fn exited(code: i32) -> Self {
        Self {
            major: 0,
            minor: code,
        }
    }

    pub fn signaled(signo: i32) -> Self {
        Self {
            major: nix::libc::EFAULT,
            minor: signo,
        }
    }

    /// The signal number if the remote process died from a signal.
    pub fn signal(&self) -> Option<i32> {
        (self.major == nix::libc::EFAULT).then_some(self.minor)
    }
}

/// A single file copy between the local side and the system under test.
#[derive(Debug)]
pub struct FileTransfer {
    pub user: Option<String>,
    pub local_stream: LocalStream,
    pub remote_name: String,
    pub remote_mode: u32,
}

impl FileTransfer {
    pub fn new<S: Into<LocalStream>, N: Into<String>>(local_stream: S, remote_name: N) -> Self {
        Self {
            user: None,
            local_stream: local_stream.into(),
            remote_name: remote_name.into(),
            remote_mode: DEFAULT_REMOTE_MODE,
        }
    }

    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.remote_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iostream::BufferStream;

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new("uname -a");
        assert_eq!(cmd.command, "uname -a");
        assert!(cmd.user.is_none());
        assert_eq!(cmd.timeout, DEFAULT_TIMEOUT);
        assert!(!cmd.request_tty);
        assert!(cmd.stdin.is_none() && cmd.stdout.is_none() && cmd.stderr.is_none());
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("cat")
            .user("testuser")
            .timeout(Duration::from_secs(5))
            .tty(true)
            .stdin(BufferStream::from_bytes("x"));
        assert_eq!(cmd.user.as_deref(), Some("testuser"));
        assert_eq!(cmd.timeout, Duration::from_secs(5));
        assert!(cmd.request_tty);
        assert!(cmd.stdin.is_some());
    }

    #[test]
    fn test_status_signal() {
        assert_eq!(Status::exited(3).signal(), None);
        assert_eq!(Status::signaled(9).signal(), Some(9));
        assert_eq!(Status::default(), Status::exited(0));
    }

    #[test]
    fn test_transfer_default_mode() {
        let xfer = FileTransfer::new(BufferStream::new(), "/tmp/file");
        assert_eq!(xfer.remote_mode, 0o644);
        assert_eq!(xfer.mode(0o755).remote_mode, 0o755);
    }
}
