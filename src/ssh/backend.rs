//! libssh2-backed session provider.

use super::provider::{
    ReadOutcome, Readiness, RemoteChannel, RemoteSession, SessionOptions, SessionProvider,
    StreamIndex, EXIT_STATUS_UNAVAILABLE,
};
use log::{debug, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use ssh2::{BlockDirections, Channel, Session};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;
use std::time::Duration;

/// Default private keys, tried in order after the agent and the configured
/// identity.
const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// Connects over TCP and speaks SSH through libssh2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Provider;

impl SessionProvider for Ssh2Provider {
    type Session = Ssh2Session;

    fn connect(&self, options: &SessionOptions) -> io::Result<Ssh2Session> {
        debug!("Connecting to {}:{}", options.host, options.port);

        let addr = (options.host.as_str(), options.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No addresses found for host '{}'", options.host),
                )
            })?;

        let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)?;
        // libssh2 owns the stream; keep a handle on the socket for polling.
        let socket = tcp.try_clone()?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        debug!("SSH handshake with {} complete", options.host);
        Ok(Ssh2Session { session, socket })
    }
}

pub struct Ssh2Session {
    session: Session,
    socket: TcpStream,
}

impl Ssh2Session {
    fn identity_candidates(options: &SessionOptions) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = options.identity.iter().cloned().collect();
        if let Some(home) = dirs::home_dir() {
            let ssh_dir = home.join(".ssh");
            keys.extend(DEFAULT_IDENTITIES.iter().map(|name| ssh_dir.join(name)));
        }
        keys
    }
}

impl RemoteSession for Ssh2Session {
    type Channel = Ssh2Channel;

    fn authenticate(&mut self, options: &SessionOptions) -> io::Result<()> {
        debug!("Authenticating as user: {}", options.user);

        match self.session.userauth_agent(&options.user) {
            Ok(()) if self.session.authenticated() => {
                debug!("Agent authentication successful");
                return Ok(());
            }
            Ok(()) => {}
            Err(e) => debug!("Agent authentication failed: {}", e),
        }

        for key in Self::identity_candidates(options) {
            if !key.exists() {
                continue;
            }
            debug!("Attempting public key authentication with: {:?}", key);
            match self.session.userauth_pubkey_file(&options.user, None, &key, None) {
                Ok(()) if self.session.authenticated() => {
                    debug!("Public key authentication successful");
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => debug!("Public key {:?} rejected: {}", key, e),
            }
        }

        warn!("SSH authentication failed for user {}", options.user);
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("public key authentication failed for user {}", options.user),
        ))
    }

    fn open_channel(&mut self) -> io::Result<Ssh2Channel> {
        self.session.set_blocking(true);
        let channel = self.session.channel_session()?;
        Ok(Ssh2Channel {
            session: self.session.clone(),
            socket: self.socket.try_clone()?,
            channel,
        })
    }

    fn disconnect(&mut self) {
        self.session.set_blocking(true);
        if let Err(e) = self.session.disconnect(None, "bye", None) {
            debug!("Error while disconnecting: {}", e);
        }
    }
}

pub struct Ssh2Channel {
    session: Session,
    socket: TcpStream,
    channel: Channel,
}

impl RemoteChannel for Ssh2Channel {
    fn request_pty(&mut self) -> io::Result<()> {
        self.session.set_blocking(true);
        self.channel.request_pty("xterm", None, None)?;
        Ok(())
    }

    fn exec(&mut self, command: &str) -> io::Result<()> {
        self.session.set_blocking(true);
        self.channel.exec(command)?;
        Ok(())
    }

    // Blocks while the remote window is full.
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.session.set_blocking(true);
        self.channel.write_all(data)?;
        Ok(data.len())
    }

    fn read_nonblocking(&mut self, stream: StreamIndex, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        self.session.set_blocking(false);
        let result = match stream {
            StreamIndex::Stdout => self.channel.read(buf),
            StreamIndex::Stderr => self.channel.stderr().read(buf),
        };
        self.session.set_blocking(true);

        match result {
            Ok(0) if self.channel.eof() => Ok(ReadOutcome::Eof),
            Ok(0) => Ok(ReadOutcome::Pending),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Pending),
            Err(e) => Err(e),
        }
    }

    fn read_blocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.session.set_blocking(true);
        self.channel.read(buf)
    }

    fn send_eof(&mut self) -> io::Result<()> {
        self.session.set_blocking(true);
        self.channel.send_eof()?;
        Ok(())
    }

    fn exit_status(&mut self, on_signal: &mut dyn FnMut(&str)) -> io::Result<i32> {
        self.session.set_blocking(true);
        self.channel.close()?;
        self.channel.wait_close()?;

        if let Some(name) = self.channel.exit_signal()?.exit_signal {
            debug!("Remote command terminated by signal {}", name);
            on_signal(&name);
            return Ok(EXIT_STATUS_UNAVAILABLE);
        }
        Ok(self.channel.exit_status()?)
    }

    fn wait_readable(&mut self, stdin: Option<BorrowedFd<'_>>, timeout: Duration) -> io::Result<Readiness> {
        let mut socket_events = PollFlags::POLLIN;
        if matches!(
            self.session.block_directions(),
            BlockDirections::Outbound | BlockDirections::Both
        ) {
            socket_events |= PollFlags::POLLOUT;
        }

        let mut fds = vec![PollFd::new(self.socket.as_fd(), socket_events)];
        if let Some(fd) = stdin {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(e) => return Err(e.into()),
        }

        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let stdin_ready = fds
            .get(1)
            .and_then(|fd| fd.revents())
            .is_some_and(|events| events.intersects(ready));
        Ok(Readiness { stdin: stdin_ready })
    }

    fn close(&mut self) {
        self.session.set_blocking(true);
        if let Err(e) = self.channel.close() {
            debug!("Error while closing channel: {}", e);
        }
    }
}
