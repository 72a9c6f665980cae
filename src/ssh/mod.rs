//! SSH transport.
//!
//! Every command and every file transfer runs on its own session, opened
//! from the target's connection template. Commands are driven by a
//! single-threaded poll loop (see [`multiplex`]); file transfers speak the
//! SCP protocol over a session channel.

pub mod backend;
mod interrupt;
mod multiplex;
pub mod provider;
mod scp;
mod session;
pub mod signals;
mod transaction;
mod transfer;

#[cfg(test)]
mod testing;

pub use backend::Ssh2Provider;
pub use scp::{ScpError, ScpRequest};
pub use signals::ExitSignal;

use crate::command::{Command, FileTransfer, Status};
use crate::error::{Error, Result};
use crate::plugin::{Interrupt, Interrupter, PluginKind, PluginModule, PluginOps, Transport};
use crate::sink::Sink;
use interrupt::{ForegroundFlags, ForegroundSlot};
use log::debug;
use provider::{SessionOptions, SessionProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use transaction::Transaction;

/// Chunk size for stream forwarding and file transfers.
pub const BUFFER_SIZE: usize = 16384;

/// User commands and transfers run as unless told otherwise.
pub const DEFAULT_USER: &str = "root";

pub const DEFAULT_PORT: u16 = 22;

/// Connection settings shared by every SSH target a registry creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub identity: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            identity: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// The SSH plugin's capability table.
pub fn plugin_module(settings: SshSettings) -> PluginModule {
    PluginModule::new(PluginOps::new(PluginKind::Ssh.name(), move |spec| {
        SshTarget::with_provider(spec, Ssh2Provider, &settings)
            .map(|target| Box::new(target) as Box<dyn Transport>)
    }))
}

/// Splits `host`, `host:port` or `[addr]:port` into host and port.
///
/// The port must be decimal and below 65535. Anything else yields `None`.
pub fn parse_target(spec: &str) -> Option<(String, u16)> {
    let Some((host, port)) = spec.rsplit_once(':') else {
        return Some((spec.to_owned(), DEFAULT_PORT));
    };

    let port = match port {
        "" => 0,
        digits if digits.bytes().all(|b| b.is_ascii_digit()) => match digits.parse::<u32>() {
            Ok(port) if port < 65535 => port as u16,
            _ => {
                debug!("Port out of range in ssh target '{}'", spec);
                return None;
            }
        },
        _ => {
            debug!("Invalid port '{}' in ssh target '{}'", port, spec);
            return None;
        }
    };

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host.to_owned(), port))
}

/// An SSH endpoint.
pub struct SshTarget<P: SessionProvider = Ssh2Provider> {
    template: SessionOptions,
    provider: P,
    foreground: ForegroundSlot,
}

impl SshTarget<Ssh2Provider> {
    /// Creates a target from `host[:port]` with default settings. No
    /// connection is made.
    pub fn init(spec: &str) -> Option<Self> {
        Self::with_provider(spec, Ssh2Provider, &SshSettings::default())
    }
}

impl<P: SessionProvider> SshTarget<P> {
    pub fn with_provider(spec: &str, provider: P, settings: &SshSettings) -> Option<Self> {
        let (host, port) = parse_target(spec)?;
        let mut template = SessionOptions::new(host, port);
        template.identity = settings.identity.clone();
        template.connect_timeout = settings.connect_timeout;

        Some(Self {
            template,
            provider,
            foreground: ForegroundSlot::default(),
        })
    }

    pub fn host(&self) -> &str {
        &self.template.host
    }

    pub fn port(&self) -> u16 {
        self.template.port
    }
}

impl<P: SessionProvider> Transport for SshTarget<P> {
    fn plugin(&self) -> PluginKind {
        PluginKind::Ssh
    }

    fn run_test(&mut self, cmd: &mut Command) -> Result<Status> {
        if cmd.command.is_empty() {
            return Err(Error::Parameter);
        }
        let user = cmd.user.as_deref().unwrap_or(DEFAULT_USER);

        let flags = Arc::new(ForegroundFlags::new(cmd.request_tty));
        let _foreground = self.foreground.install(Arc::clone(&flags));

        let mut trans: Transaction<'_, P::Session> = Transaction::new(
            flags,
            cmd.timeout,
            cmd.stdin.as_mut(),
            cmd.stdout.as_mut(),
            cmd.stderr.as_mut(),
        );
        trans.open(&self.provider, &self.template, user)?;
        trans.execute(&cmd.command)?;
        multiplex::run(&mut trans)
    }

    fn inject_file(&mut self, xfer: &mut FileTransfer, sink: &mut Sink) -> Result<Status> {
        transfer::inject(&self.provider, &self.template, xfer, sink)
    }

    fn extract_file(&mut self, xfer: &mut FileTransfer, sink: &mut Sink) -> Result<Status> {
        transfer::extract(&self.provider, &self.template, xfer, sink)
    }

    fn interrupt_command(&self) -> Result<()> {
        self.foreground.interrupt()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        Some(Interrupter::new(self.foreground.clone()))
    }

    /// There is no remote test server to stop.
    fn exit_remote(&mut self) -> Result<()> {
        Err(Error::NotSupported)
    }
}
