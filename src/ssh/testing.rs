//! In-memory remote for exercising the engines.
//!
//! Understands a handful of shell commands (`cat`, `sleep`, `echo`,
//! `>&2 echo`, `exit N`, `kill -SIG`) and the three `scp` invocations the
//! transfer engine issues, backed by an in-memory filesystem.

use super::provider::{
    ReadOutcome, Readiness, RemoteChannel, RemoteSession, SessionOptions, SessionProvider,
    StreamIndex, EXIT_STATUS_UNAVAILABLE,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct FakeRemote {
    pub dirs: HashSet<String>,
    pub files: HashMap<String, Vec<u8>>,
    pub modes: HashMap<String, u32>,

    pub connects: usize,
    pub disconnects: usize,
    pub channels_closed: usize,
    pub eofs: usize,
    pub ptys: usize,
    pub users: Vec<String>,
    pub executed: Vec<String>,
    pub written: Vec<u8>,

    pub fail_connect: bool,
    pub fail_auth: bool,
    pub fail_exec: bool,
    pub fail_pty: bool,
    pub fail_read: bool,
    pub fail_eof: bool,
    pub short_writes: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct MockProvider {
    remote: Arc<Mutex<FakeRemote>>,
}

impl MockProvider {
    pub fn new() -> Self {
        let mut remote = FakeRemote::default();
        for dir in ["/", "/tmp", "/root"] {
            remote.dirs.insert(dir.to_string());
        }
        Self {
            remote: Arc::new(Mutex::new(remote)),
        }
    }

    pub fn remote(&self) -> MutexGuard<'_, FakeRemote> {
        self.remote.lock().unwrap()
    }
}

impl SessionProvider for MockProvider {
    type Session = FakeSession;

    fn connect(&self, _options: &SessionOptions) -> io::Result<FakeSession> {
        let mut remote = self.remote();
        remote.connects += 1;
        if remote.fail_connect {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        Ok(FakeSession {
            remote: Arc::clone(&self.remote),
        })
    }
}

pub(crate) struct FakeSession {
    remote: Arc<Mutex<FakeRemote>>,
}

impl RemoteSession for FakeSession {
    type Channel = FakeChannel;

    fn authenticate(&mut self, options: &SessionOptions) -> io::Result<()> {
        let mut remote = self.remote.lock().unwrap();
        remote.users.push(options.user.clone());
        if remote.fail_auth {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "auth rejected"));
        }
        Ok(())
    }

    fn open_channel(&mut self) -> io::Result<FakeChannel> {
        Ok(FakeChannel::new(Arc::clone(&self.remote)))
    }

    fn disconnect(&mut self) {
        self.remote.lock().unwrap().disconnects += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Code(i32),
    Signal(String),
}

#[derive(Debug)]
enum Program {
    Idle,
    Cat,
    Sleep,
    Finished,
    ScpSink { dir: String, state: SinkState },
    ScpSource { path: String, state: SourceState },
    ScpProbe { dir: String, started: bool },
}

#[derive(Debug)]
enum SinkState {
    Header,
    Data { path: String, mode: u32, remaining: usize, data: Vec<u8> },
    Trailer { path: String, mode: u32, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    AwaitStart,
    AwaitAccept,
    AwaitAck,
}

pub(crate) struct FakeChannel {
    remote: Arc<Mutex<FakeRemote>>,
    tty: bool,
    program: Program,
    input: Vec<u8>,
    out: VecDeque<u8>,
    err: VecDeque<u8>,
    out_eof: bool,
    err_eof: bool,
    exit: Option<Exit>,
}

impl FakeChannel {
    fn new(remote: Arc<Mutex<FakeRemote>>) -> Self {
        Self {
            remote,
            tty: false,
            program: Program::Idle,
            input: Vec::new(),
            out: VecDeque::new(),
            err: VecDeque::new(),
            out_eof: false,
            err_eof: false,
            exit: None,
        }
    }

    fn finish(&mut self, exit: Exit) {
        self.program = Program::Finished;
        self.exit = Some(exit);
        self.out_eof = true;
        self.err_eof = true;
    }

    fn say(&mut self, text: &str) {
        self.out.extend(text.as_bytes());
    }

    fn scp_error(&mut self, message: &str) {
        self.out.push_back(1);
        self.say(&format!("scp: {}\n", message));
    }

    fn start(&mut self, command: &str) {
        let unquote = |arg: &str| arg.trim_matches('\'').to_string();

        if command == "cat" {
            self.program = Program::Cat;
        } else if command.starts_with("sleep") {
            self.program = Program::Sleep;
        } else if let Some(text) = command.strip_prefix(">&2 echo ") {
            self.err.extend(format!("{}\n", text).as_bytes());
            self.finish(Exit::Code(0));
        } else if let Some(text) = command.strip_prefix("echo ") {
            self.say(&format!("{}\n", text));
            self.finish(Exit::Code(0));
        } else if let Some(code) = command.strip_prefix("exit ") {
            self.finish(Exit::Code(code.trim().parse().unwrap_or(2)));
        } else if let Some(signal) = command.strip_prefix("kill -") {
            self.finish(Exit::Signal(signal.to_string()));
        } else if let Some(dir) = command.strip_prefix("scp -t ") {
            self.out.push_back(0);
            self.program = Program::ScpSink {
                dir: unquote(dir),
                state: SinkState::Header,
            };
        } else if let Some(dir) = command.strip_prefix("scp -r -f ") {
            self.program = Program::ScpProbe {
                dir: unquote(dir),
                started: false,
            };
        } else if let Some(path) = command.strip_prefix("scp -f ") {
            self.program = Program::ScpSource {
                path: unquote(path),
                state: SourceState::AwaitStart,
            };
        } else {
            self.err.extend(format!("sh: {}: command not found\n", command).as_bytes());
            self.finish(Exit::Code(127));
        }
    }

    fn feed(&mut self, data: &[u8]) {
        match self.program {
            Program::Cat if self.tty => {
                for &byte in data {
                    match byte {
                        0x03 => return self.finish(Exit::Signal("INT".into())),
                        0x04 => return self.finish(Exit::Code(0)),
                        _ => self.out.push_back(byte),
                    }
                }
            }
            Program::Cat => self.out.extend(data),
            Program::Sleep => {
                if self.tty && data.contains(&0x03) {
                    self.finish(Exit::Signal("INT".into()));
                }
            }
            Program::ScpSink { .. } | Program::ScpSource { .. } | Program::ScpProbe { .. } => {
                self.input.extend_from_slice(data);
                self.run_scp();
            }
            Program::Idle | Program::Finished => {}
        }
    }

    fn run_scp(&mut self) {
        loop {
            let program = std::mem::replace(&mut self.program, Program::Finished);
            let (program, more) = match program {
                Program::ScpSink { dir, state } => self.step_sink(dir, state),
                Program::ScpSource { path, state } => self.step_source(path, state),
                Program::ScpProbe { dir, started } => self.step_probe(dir, started),
                other => (other, false),
            };
            if self.exit.is_none() {
                self.program = program;
            }
            if !more {
                break;
            }
        }
    }

    fn step_sink(&mut self, dir: String, state: SinkState) -> (Program, bool) {
        let keep = |state| Program::ScpSink {
            dir: dir.clone(),
            state,
        };
        match state {
            SinkState::Header => {
                let Some(end) = self.input.iter().position(|&b| b == b'\n') else {
                    return (keep(SinkState::Header), false);
                };
                let line: Vec<u8> = self.input.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                if line.starts_with('T') {
                    self.out.push_back(0);
                    return (keep(SinkState::Header), true);
                }
                let Some(entry) = line.strip_prefix('C') else {
                    self.out.push_back(2);
                    self.say("scp: protocol error\n");
                    self.finish(Exit::Code(1));
                    return (Program::Finished, false);
                };
                let mut parts = entry.splitn(3, ' ');
                let mode = u32::from_str_radix(parts.next().unwrap_or(""), 8).unwrap_or(0);
                let size: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let name = parts.next().unwrap_or("");
                let path = join(&dir, name);

                if !self.remote.lock().unwrap().dirs.contains(&dir) {
                    self.scp_error(&format!("{}: No such file or directory", path));
                    return (keep(SinkState::Header), true);
                }
                self.out.push_back(0);
                let next = if size == 0 {
                    SinkState::Trailer { path, mode, data: Vec::new() }
                } else {
                    SinkState::Data { path, mode, remaining: size, data: Vec::new() }
                };
                (keep(next), true)
            }
            SinkState::Data { path, mode, remaining, mut data } => {
                let take = remaining.min(self.input.len());
                data.extend(self.input.drain(..take));
                let remaining = remaining - take;
                if remaining == 0 {
                    (keep(SinkState::Trailer { path, mode, data }), true)
                } else {
                    (keep(SinkState::Data { path, mode, remaining, data }), false)
                }
            }
            SinkState::Trailer { path, mode, data } => {
                if self.input.is_empty() {
                    return (keep(SinkState::Trailer { path, mode, data }), false);
                }
                self.input.remove(0);
                {
                    let mut remote = self.remote.lock().unwrap();
                    remote.modes.insert(path.clone(), mode);
                    remote.files.insert(path, data);
                }
                self.out.push_back(0);
                (keep(SinkState::Header), true)
            }
        }
    }

    fn step_source(&mut self, path: String, state: SourceState) -> (Program, bool) {
        if self.input.is_empty() {
            return (Program::ScpSource { path, state }, false);
        }
        self.input.remove(0);

        let next = match state {
            SourceState::AwaitStart => {
                let size = self.remote.lock().unwrap().files.get(&path).map(Vec::len);
                match size {
                    Some(size) => {
                        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                        self.say(&format!("C0644 {} {}\n", size, name));
                        SourceState::AwaitAccept
                    }
                    None => {
                        self.scp_error(&format!("{}: No such file or directory", path));
                        self.finish(Exit::Code(1));
                        return (Program::Finished, false);
                    }
                }
            }
            SourceState::AwaitAccept => {
                let data = self.remote.lock().unwrap().files.get(&path).cloned().unwrap_or_default();
                self.out.extend(data);
                self.out.push_back(0);
                SourceState::AwaitAck
            }
            SourceState::AwaitAck => {
                self.finish(Exit::Code(0));
                return (Program::Finished, false);
            }
        };
        (Program::ScpSource { path, state: next }, true)
    }

    fn step_probe(&mut self, dir: String, started: bool) -> (Program, bool) {
        if started || self.input.is_empty() {
            return (Program::ScpProbe { dir, started }, false);
        }
        self.input.remove(0);

        let (is_dir, file_size) = {
            let remote = self.remote.lock().unwrap();
            (remote.dirs.contains(&dir), remote.files.get(&dir).map(Vec::len))
        };
        let name = dir.rsplit('/').next().unwrap_or(&dir).to_string();
        if is_dir {
            self.say(&format!("D0755 0 {}\n", name));
        } else if let Some(size) = file_size {
            self.say(&format!("C0644 {} {}\n", size, name));
        } else {
            self.scp_error(&format!("{}: No such file or directory", dir));
            self.finish(Exit::Code(1));
            return (Program::Finished, false);
        }
        (Program::ScpProbe { dir, started: true }, false)
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

impl RemoteChannel for FakeChannel {
    fn request_pty(&mut self) -> io::Result<()> {
        let mut remote = self.remote.lock().unwrap();
        if remote.fail_pty {
            return Err(io::Error::new(io::ErrorKind::Other, "pty refused"));
        }
        remote.ptys += 1;
        self.tty = true;
        Ok(())
    }

    fn exec(&mut self, command: &str) -> io::Result<()> {
        {
            let mut remote = self.remote.lock().unwrap();
            if remote.fail_exec {
                return Err(io::Error::new(io::ErrorKind::Other, "exec refused"));
            }
            remote.executed.push(command.to_string());
        }
        self.start(command);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        {
            let mut remote = self.remote.lock().unwrap();
            if remote.short_writes && data.len() > 1 {
                return Ok(data.len() - 1);
            }
            remote.written.extend_from_slice(data);
        }
        self.feed(data);
        Ok(data.len())
    }

    fn read_nonblocking(&mut self, stream: StreamIndex, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if self.remote.lock().unwrap().fail_read {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "channel reset"));
        }
        let (queue, eof) = match stream {
            StreamIndex::Stdout => (&mut self.out, self.out_eof),
            StreamIndex::Stderr => (&mut self.err, self.err_eof),
        };
        if queue.is_empty() {
            return Ok(if eof { ReadOutcome::Eof } else { ReadOutcome::Pending });
        }
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(ReadOutcome::Data(n))
    }

    fn read_blocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out.is_empty() {
            if self.out_eof {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "fake remote has nothing to send"));
        }
        let n = buf.len().min(self.out.len());
        for (slot, byte) in buf.iter_mut().zip(self.out.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send_eof(&mut self) -> io::Result<()> {
        {
            let mut remote = self.remote.lock().unwrap();
            if remote.fail_eof {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
            }
            remote.eofs += 1;
        }
        match self.program {
            Program::Cat => self.finish(Exit::Code(0)),
            Program::ScpSink { .. } => self.finish(Exit::Code(0)),
            Program::ScpSource { .. } | Program::ScpProbe { .. } => self.finish(Exit::Code(1)),
            Program::Idle | Program::Sleep | Program::Finished => {}
        }
        Ok(())
    }

    fn exit_status(&mut self, on_signal: &mut dyn FnMut(&str)) -> io::Result<i32> {
        match &self.exit {
            Some(Exit::Code(code)) => Ok(*code),
            Some(Exit::Signal(name)) => {
                on_signal(name);
                Ok(EXIT_STATUS_UNAVAILABLE)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "command still running")),
        }
    }

    fn wait_readable(&mut self, stdin: Option<BorrowedFd<'_>>, timeout: Duration) -> io::Result<Readiness> {
        thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(Readiness {
            stdin: stdin.is_some(),
        })
    }

    fn close(&mut self) {
        self.remote.lock().unwrap().channels_closed += 1;
    }
}
