use super::{Interrupter, PluginKind, Transport};
use crate::command::{Command, FileTransfer, Status};
use crate::error::Result;
use crate::iostream::{BufferStream, FileStream, LocalStream};
use crate::sink::Sink;
use log::debug;
use std::fmt;

/// A configured endpoint bound to exactly one transport.
pub struct Target {
    kind: PluginKind,
    ops: Box<dyn Transport>,
    sink: Sink,
}

impl Target {
    pub(crate) fn new(kind: PluginKind, ops: Box<dyn Transport>) -> Self {
        Self {
            kind,
            ops,
            sink: Sink::default(),
        }
    }

    pub fn plugin(&self) -> PluginKind {
        self.kind
    }

    /// Replaces the sink that receives progress output.
    pub fn set_output(&mut self, sink: Sink) {
        self.sink = sink;
    }

    pub fn output(&self) -> &Sink {
        &self.sink
    }

    pub fn run_test(&mut self, cmd: &mut Command) -> Result<Status> {
        debug!("{}: running '{}'", self.kind, cmd.command);
        self.ops.run_test(cmd)
    }

    pub fn inject_file(&mut self, xfer: &mut FileTransfer) -> Result<Status> {
        debug!("{}: injecting {}", self.kind, xfer.remote_name);
        self.ops.inject_file(xfer, &mut self.sink)
    }

    pub fn extract_file(&mut self, xfer: &mut FileTransfer) -> Result<Status> {
        debug!("{}: extracting {}", self.kind, xfer.remote_name);
        self.ops.extract_file(xfer, &mut self.sink)
    }

    pub fn interrupt_command(&self) -> Result<()> {
        self.ops.interrupt_command()
    }

    /// A handle for interrupting commands from another thread, if the
    /// transport supports it.
    pub fn interrupter(&self) -> Option<Interrupter> {
        self.ops.interrupter()
    }

    pub fn exit_remote(&mut self) -> Result<()> {
        self.ops.exit_remote()
    }

    pub fn end(self) {
        debug!("{}: ending target", self.kind);
        self.ops.end();
    }

    /// Runs `command` with its output on this process's stdout and stderr.
    pub fn test_and_print_results(&mut self, user: Option<&str>, command: &str) -> Result<Status> {
        let mut cmd = Self::build(user, command);
        cmd.stdout = Some(stdio(FileStream::stdout)?);
        cmd.stderr = Some(stdio(FileStream::stderr)?);
        self.run_test(&mut cmd)
    }

    /// Runs `command` and discards its output.
    pub fn test_and_drop_results(&mut self, user: Option<&str>, command: &str) -> Result<Status> {
        let mut cmd = Self::build(user, command);
        self.run_test(&mut cmd)
    }

    /// Runs `command` and captures stdout and stderr interleaved into
    /// `buffer`.
    pub fn test_and_store_results_together(
        &mut self,
        user: Option<&str>,
        command: &str,
        buffer: &BufferStream,
    ) -> Result<Status> {
        let mut cmd = Self::build(user, command)
            .stdout(buffer.clone())
            .stderr(buffer.clone());
        self.run_test(&mut cmd)
    }

    /// Runs `command` and captures stdout and stderr into separate buffers.
    pub fn test_and_store_results_separately(
        &mut self,
        user: Option<&str>,
        command: &str,
        stdout: &BufferStream,
        stderr: &BufferStream,
    ) -> Result<Status> {
        let mut cmd = Self::build(user, command)
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        self.run_test(&mut cmd)
    }

    fn build(user: Option<&str>, command: &str) -> Command {
        let mut cmd = Command::new(command);
        cmd.user = user.map(str::to_owned);
        cmd
    }
}

fn stdio(open: fn() -> std::io::Result<FileStream>) -> Result<LocalStream> {
    open().map(LocalStream::from).map_err(|e| {
        debug!("Unable to duplicate standard stream: {}", e);
        crate::error::Error::LocalFile
    })
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("plugin", &self.kind)
            .field("sink", &self.sink.mode())
            .finish_non_exhaustive()
    }
}
