//! Transport plugins and the generic target.
//!
//! A target spec such as `ssh:sut.example.com:2222` names a plugin and
//! hands the rest of the string to that plugin's `init`. The
//! [`PluginRegistry`] resolves the name, loads the plugin once, and returns
//! a [`Target`] which dispatches every generic operation to the plugin's
//! [`Transport`].

mod registry;
mod target;

pub use registry::{InitFn, LoaderFn, PluginModule, PluginOps, PluginRegistry};
pub use target::Target;

use crate::command::{Command, FileTransfer, Status};
use crate::error::{Error, Result};
use crate::sink::Sink;
use std::fmt;
use std::sync::Arc;

/// The closed set of transport plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Virtio,
    Ssh,
    Serial,
}

impl PluginKind {
    pub const ALL: [PluginKind; 3] = [PluginKind::Virtio, PluginKind::Ssh, PluginKind::Serial];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Virtio => "virtio",
            Self::Ssh => "ssh",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations a transport plugin provides for one target.
///
/// Every operation a plugin does not implement reports
/// [`Error::NotSupported`].
pub trait Transport: Send {
    fn plugin(&self) -> PluginKind;

    /// Runs a command to completion and returns its status.
    fn run_test(&mut self, _cmd: &mut Command) -> Result<Status> {
        Err(Error::NotSupported)
    }

    /// Copies a local stream to a remote file. Progress goes to `sink`.
    fn inject_file(&mut self, _xfer: &mut FileTransfer, _sink: &mut Sink) -> Result<Status> {
        Err(Error::NotSupported)
    }

    /// Copies a remote file into a local stream. Progress goes to `sink`.
    fn extract_file(&mut self, _xfer: &mut FileTransfer, _sink: &mut Sink) -> Result<Status> {
        Err(Error::NotSupported)
    }

    /// Interrupts the foreground command.
    fn interrupt_command(&self) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// A handle that can interrupt the foreground command from another
    /// thread while `run_test` is in progress.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }

    /// Asks the remote test server to exit.
    fn exit_remote(&mut self) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Releases the target.
    fn end(self: Box<Self>) {}
}

/// Something that can interrupt a running command.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self) -> Result<()>;
}

/// Cloneable, thread-safe handle for interrupting a target's foreground
/// command.
#[derive(Clone)]
pub struct Interrupter {
    inner: Arc<dyn Interrupt>,
}

impl Interrupter {
    pub fn new<I: Interrupt + 'static>(inner: I) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn interrupt(&self) -> Result<()> {
        self.inner.interrupt()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_names() {
        for kind in PluginKind::ALL {
            assert_eq!(PluginKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(PluginKind::from_name("telnet"), None);
        assert_eq!(PluginKind::from_name("SSH"), None);
        assert_eq!(PluginKind::Serial.to_string(), "serial");
    }
}
